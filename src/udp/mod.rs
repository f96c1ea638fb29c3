//! UDP endpoints and demultiplexing.

use alloc::boxed::Box;

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::buf::Buf;
use crate::pool::{Pool, PoolId};

mod api;

mod ctx;
pub use ctx::*;

/// Handle to a UDP endpoint owned by the stack.
pub type UdpId = PoolId<UdpEndpoint>;

/// Application hooks of a UDP endpoint.
#[allow(unused_variables)]
pub trait UdpHooks {
    /// A datagram arrived for this endpoint.
    fn received(&mut self, cx: &mut UdpCtx<'_>, src: (IpAddr, u16), data: Buf) {}
}

/// One UDP endpoint.
pub struct UdpEndpoint {
    /// Bound local address (unspecified = any).
    pub local_ip: IpAddr,
    pub local_port: u16,
    /// Remote tuple; only meaningful when `connected`.
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    /// Filter input to the exact remote tuple and use it as the
    /// default send destination.
    pub connected: bool,
    /// Send datagrams without a checksum (IPv4 only; IPv6 always
    /// checksums).
    pub checksum_disabled: bool,
    /// TTL / hop limit for transmissions.
    pub ttl: u8,
    pub(crate) hooks: Option<Box<dyn UdpHooks>>,
}

impl UdpEndpoint {
    pub(crate) fn new(ttl: u8) -> UdpEndpoint {
        UdpEndpoint {
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port: 0,
            remote_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            remote_port: 0,
            connected: false,
            checksum_disabled: false,
            ttl,
            hooks: None,
        }
    }

    /// True if the bound local address matches `dst` (same family and
    /// equal, or wildcard).
    pub(crate) fn local_matches(&self, dst: IpAddr) -> bool {
        match (self.local_ip, dst) {
            (IpAddr::V4(local), IpAddr::V4(dst)) => {
                local == Ipv4Addr::UNSPECIFIED || local == dst
            }
            (IpAddr::V6(local), IpAddr::V6(dst)) => {
                local == Ipv6Addr::UNSPECIFIED || local == dst
            }
            _ => false,
        }
    }
}

/// Find the endpoint a unicast datagram belongs to: first the exact
/// connected tuple, then a local (port, address) match accepting any
/// remote.
pub(crate) fn demux_unicast(
    endpoints: &Pool<UdpEndpoint>,
    dst: IpAddr,
    dst_port: u16,
    src: IpAddr,
    src_port: u16,
) -> Option<UdpId> {
    // pass 1: connected endpoints with the exact tuple
    for (id, ep) in endpoints.iter() {
        if ep.connected
            && ep.local_port == dst_port
            && ep.local_matches(dst)
            && ep.remote_ip == src
            && ep.remote_port == src_port
        {
            return Some(id);
        }
    }
    // pass 2: unconnected endpoints bound to the port
    for (id, ep) in endpoints.iter() {
        if !ep.connected && ep.local_port == dst_port && ep.local_matches(dst) {
            return Some(id);
        }
    }
    None
}

/// All endpoints a broadcast/multicast datagram is delivered to.
pub(crate) fn demux_group(
    endpoints: &Pool<UdpEndpoint>,
    dst_is_v6: bool,
    dst_port: u16,
) -> alloc::vec::Vec<UdpId> {
    endpoints
        .iter()
        .filter(|(_, ep)| {
            !ep.connected
                && ep.local_port == dst_port
                && matches!(
                    (ep.local_ip, dst_is_v6),
                    (IpAddr::V4(_), false) | (IpAddr::V6(_), true)
                )
        })
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(entries: &[(&str, u16, Option<(&str, u16)>)]) -> Pool<UdpEndpoint> {
        let mut pool = Pool::new(8);
        for (local, port, remote) in entries {
            let mut ep = UdpEndpoint::new(64);
            ep.local_ip = local.parse::<Ipv4Addr>().unwrap().into();
            ep.local_port = *port;
            if let Some((rip, rport)) = remote {
                ep.remote_ip = rip.parse::<Ipv4Addr>().unwrap().into();
                ep.remote_port = *rport;
                ep.connected = true;
            }
            pool.acquire(ep).unwrap();
        }
        pool
    }

    #[test]
    fn connected_beats_wildcard() {
        let pool = pool_with(&[
            ("0.0.0.0", 53, None),
            ("10.0.0.1", 53, Some(("10.0.0.2", 1000))),
        ]);
        let hit = demux_unicast(
            &pool,
            "10.0.0.1".parse::<Ipv4Addr>().unwrap().into(),
            53,
            "10.0.0.2".parse::<Ipv4Addr>().unwrap().into(),
            1000,
        )
        .unwrap();
        let ep = pool.get(hit).unwrap();
        assert!(ep.connected);
    }

    #[test]
    fn wildcard_catches_other_remotes() {
        let pool = pool_with(&[
            ("0.0.0.0", 53, None),
            ("10.0.0.1", 53, Some(("10.0.0.2", 1000))),
        ]);
        let hit = demux_unicast(
            &pool,
            "10.0.0.1".parse::<Ipv4Addr>().unwrap().into(),
            53,
            "10.0.0.9".parse::<Ipv4Addr>().unwrap().into(),
            2000,
        )
        .unwrap();
        let ep = pool.get(hit).unwrap();
        assert_eq!(false, ep.connected);
    }

    #[test]
    fn no_match_for_unbound_port() {
        let pool = pool_with(&[("0.0.0.0", 53, None)]);
        assert!(demux_unicast(
            &pool,
            "10.0.0.1".parse::<Ipv4Addr>().unwrap().into(),
            54,
            "10.0.0.2".parse::<Ipv4Addr>().unwrap().into(),
            1000,
        )
        .is_none());
    }

    #[test]
    fn group_demux_skips_connected() {
        let pool = pool_with(&[
            ("0.0.0.0", 5353, None),
            ("10.0.0.1", 5353, Some(("10.0.0.2", 1))),
        ]);
        let hits = demux_group(&pool, false, 5353);
        assert_eq!(hits.len(), 1);
    }
}
