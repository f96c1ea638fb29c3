//! Raw IP endpoints: demultiplexed by protocol number only.

use alloc::boxed::Box;

use crate::addr::IpAddr;
use crate::buf::Buf;
use crate::pool::{Pool, PoolId};
use crate::stack::Stack;
use crate::IpNumber;

/// Handle to a raw endpoint owned by the stack.
pub type RawId = PoolId<RawEndpoint>;

mod api;

/// Application hooks of a raw endpoint.
#[allow(unused_variables)]
pub trait RawHooks {
    /// A datagram of the registered protocol arrived (IP header
    /// already stripped). Return `true` to claim the datagram: a
    /// claimed datagram is not passed on to the built-in protocol
    /// handlers.
    fn received(&mut self, cx: &mut RawCtx<'_>, src: IpAddr, data: Buf) -> bool {
        false
    }
}

/// One raw endpoint.
pub struct RawEndpoint {
    /// Protocol this endpoint receives.
    pub protocol: IpNumber,
    /// Receive IPv6 (true) or IPv4 (false) datagrams.
    pub is_ipv6: bool,
    /// TTL / hop limit for transmissions.
    pub ttl: u8,
    pub(crate) hooks: Option<Box<dyn RawHooks>>,
}

/// Endpoint view handed to [`RawHooks`].
pub struct RawCtx<'a> {
    pub(crate) stack: &'a mut Stack,
    pub(crate) raw: RawId,
}

impl<'a> RawCtx<'a> {
    #[inline]
    pub fn id(&self) -> RawId {
        self.raw
    }

    #[inline]
    pub fn stack(&mut self) -> &mut Stack {
        self.stack
    }

    /// Send a datagram of the registered protocol.
    pub fn send_to(&mut self, dst: IpAddr, data: &[u8]) -> Result<(), crate::err::StackError> {
        self.stack.raw_send_to(self.raw, dst, data)
    }
}

/// Endpoints registered for `protocol` in the given family.
pub(crate) fn demux(
    endpoints: &Pool<RawEndpoint>,
    protocol: IpNumber,
    is_ipv6: bool,
) -> alloc::vec::Vec<RawId> {
    endpoints
        .iter()
        .filter(|(_, ep)| ep.protocol == protocol && ep.is_ipv6 == is_ipv6)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_by_protocol_and_family() {
        let mut pool: Pool<RawEndpoint> = Pool::new(4);
        pool.acquire(RawEndpoint {
            protocol: IpNumber::ICMP,
            is_ipv6: false,
            ttl: 64,
            hooks: None,
        })
        .unwrap();
        pool.acquire(RawEndpoint {
            protocol: IpNumber::IPV6_ICMP,
            is_ipv6: true,
            ttl: 64,
            hooks: None,
        })
        .unwrap();

        assert_eq!(demux(&pool, IpNumber::ICMP, false).len(), 1);
        assert_eq!(demux(&pool, IpNumber::ICMP, true).len(), 0);
        assert_eq!(demux(&pool, IpNumber::IPV6_ICMP, true).len(), 1);
        assert_eq!(demux(&pool, IpNumber::TCP, false).len(), 0);
    }
}
