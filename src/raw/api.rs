//! Raw endpoint API and delivery.

use alloc::boxed::Box;

use crate::addr::IpAddr;
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::raw::{demux, RawCtx, RawEndpoint, RawHooks, RawId};
use crate::stack::Stack;
use crate::IpNumber;

impl Stack {
    /// Create a raw endpoint receiving `protocol` datagrams.
    pub fn raw_new(&mut self, protocol: IpNumber, is_ipv6: bool) -> Result<RawId, StackError> {
        if !self.cfg.raw {
            return Err(StackError::Argument);
        }
        self.raw
            .acquire(RawEndpoint {
                protocol,
                is_ipv6,
                ttl: self.cfg.ip_default_ttl,
                hooks: None,
            })
            .ok_or(StackError::OutOfMemory)
    }

    /// Install the receive hooks of a raw endpoint.
    pub fn raw_set_hooks(&mut self, id: RawId, hooks: Box<dyn RawHooks>) -> Result<(), StackError> {
        let ep = self.raw.get_mut(id).ok_or(StackError::Argument)?;
        ep.hooks = Some(hooks);
        Ok(())
    }

    /// Delete a raw endpoint.
    pub fn raw_remove(&mut self, id: RawId) -> Result<(), StackError> {
        self.raw.release(id).map(|_| ()).ok_or(StackError::Argument)
    }

    /// Send a datagram of the endpoint's protocol; the stack builds
    /// the IP header.
    pub fn raw_send_to(&mut self, id: RawId, dst: IpAddr, data: &[u8]) -> Result<(), StackError> {
        let (protocol, is_ipv6, ttl) = {
            let ep = self.raw.get(id).ok_or(StackError::Argument)?;
            (ep.protocol, ep.is_ipv6, ep.ttl)
        };
        let mut payload = Buf::alloc_heap(Headroom::Ip, data.len());
        payload.copy_from_slice(0, data).expect("sized allocation");
        match dst {
            IpAddr::V4(dst) if !is_ipv6 => {
                self.ipv4_output(payload, None, dst, ttl, 0, protocol)
            }
            IpAddr::V6(dst) if is_ipv6 => self.ipv6_output(payload, None, dst, ttl, protocol),
            _ => Err(StackError::Argument),
        }
    }

    /// Offer a received datagram to the raw endpoints registered for
    /// its protocol. Each matching endpoint sees a clone; returns
    /// true when one of them claimed the datagram.
    pub(crate) fn raw_deliver(
        &mut self,
        protocol: IpNumber,
        packet: &Buf,
        is_ipv6: bool,
        src: IpAddr,
    ) -> bool {
        let mut claimed = false;
        for id in demux(&self.raw, protocol, is_ipv6) {
            let Some(mut hooks) = self.raw.get_mut(id).and_then(|ep| ep.hooks.take()) else {
                continue;
            };
            {
                let mut cx = RawCtx { stack: self, raw: id };
                claimed = hooks.received(&mut cx, src, packet.clone());
            }
            if let Some(ep) = self.raw.get_mut(id) {
                if ep.hooks.is_none() {
                    ep.hooks = Some(hooks);
                }
            }
            if claimed {
                break;
            }
        }
        claimed
    }
}
