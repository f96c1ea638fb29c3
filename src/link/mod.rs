mod arp_packet;
pub use arp_packet::*;

mod ether_type;
pub use ether_type::*;

mod ethernet2_header;
pub use ethernet2_header::*;
