mod icmpv4;
pub use icmpv4::*;

mod icmpv6;
pub use icmpv6::*;

mod igmp_message;
pub use igmp_message::*;

mod ip_number;
pub use ip_number::*;

mod ipv4_header;
pub use ipv4_header::*;

mod ipv6_exts;
pub use ipv6_exts::*;

mod ipv6_fragment_header;
pub use ipv6_fragment_header::*;

mod ipv6_header;
pub use ipv6_header::*;
