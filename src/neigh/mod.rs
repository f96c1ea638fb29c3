//! Link-address resolution state: the ARP cache (IPv4, RFC 826) and
//! the neighbor cache (IPv6, RFC 4861).
//!
//! Both caches only keep state and decide transitions; the stack
//! builds and transmits the request/solicitation packets the tick
//! actions ask for.

mod arp_cache;
pub use arp_cache::*;

mod nd_cache;
pub use nd_cache::*;
