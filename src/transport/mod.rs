mod tcp_header;
pub use tcp_header::*;

mod tcp_options;
pub use tcp_options::*;

mod udp_header;
pub use udp_header::*;
