//! The TCP protocol machine.
//!
//! `seq` and `segment` are the arithmetic building blocks, `tcb` the
//! per-connection state, and the `api`/`input`/`output`/`timer`
//! submodules the operations on the owning [`Stack`]. Endpoints live
//! in one pool; the listen, active and time-wait tables are membership
//! lists over that pool.

use alloc::boxed::Box;

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::err::StackError;
use crate::stack::Stack;

mod api;
pub use api::TcpInfo;
mod input;
mod output;
mod timer;

mod seq;
pub use seq::*;

mod segment;
pub use segment::*;

mod tcb;
pub use tcb::*;

/// Endpoint view handed to [`TcpHooks`]: the stack plus the endpoint
/// the hook fired on.
pub struct TcpCtx<'a> {
    pub(crate) stack: &'a mut Stack,
    pub(crate) tcb: TcbId,
}

impl<'a> TcpCtx<'a> {
    /// The endpoint this context addresses.
    #[inline]
    pub fn id(&self) -> TcbId {
        self.tcb
    }

    /// Access to the whole stack.
    #[inline]
    pub fn stack(&mut self) -> &mut Stack {
        self.stack
    }

    /// Queue data for transmission; returns the number of bytes
    /// accepted into the send buffer.
    pub fn write(&mut self, data: &[u8], push: bool) -> Result<usize, StackError> {
        self.stack.tcp_write(self.tcb, data, push)
    }

    /// Drive the output pipeline now.
    pub fn output(&mut self) -> Result<(), StackError> {
        self.stack.tcp_output(self.tcb)
    }

    /// Reopen `n` bytes of receive window after consuming delivered
    /// data.
    pub fn recved(&mut self, n: usize) {
        let _ = self.stack.tcp_recved(self.tcb, n);
    }

    /// Graceful close (FIN).
    pub fn close(&mut self) -> Result<(), StackError> {
        self.stack.tcp_close(self.tcb)
    }

    /// Hard abort (RST).
    pub fn abort(&mut self) {
        self.stack.tcp_abort(self.tcb);
    }
}

/// True when the two addresses are equal or `bound` is the family
/// wildcard.
fn local_addr_matches(bound: IpAddr, dst: IpAddr) -> bool {
    match (bound, dst) {
        (IpAddr::V4(b), IpAddr::V4(d)) => b == Ipv4Addr::UNSPECIFIED || b == d,
        (IpAddr::V6(b), IpAddr::V6(d)) => b == Ipv6Addr::UNSPECIFIED || b == d,
        _ => false,
    }
}

impl Stack {
    /// Exact tuple match in the active table.
    pub(crate) fn tcp_find_active(
        &self,
        local: IpAddr,
        local_port: u16,
        remote: IpAddr,
        remote_port: u16,
    ) -> Option<TcbId> {
        self.tcp_active.iter().copied().find(|id| {
            self.tcbs.get(*id).is_some_and(|tcb| {
                tcb.local_port == local_port
                    && tcb.remote_port == remote_port
                    && tcb.local_ip == local
                    && tcb.remote_ip == remote
            })
        })
    }

    /// Exact tuple match in the time-wait table.
    pub(crate) fn tcp_find_time_wait(
        &self,
        local: IpAddr,
        local_port: u16,
        remote: IpAddr,
        remote_port: u16,
    ) -> Option<TcbId> {
        self.tcp_time_wait.iter().copied().find(|id| {
            self.tcbs.get(*id).is_some_and(|tcb| {
                tcb.local_port == local_port
                    && tcb.remote_port == remote_port
                    && tcb.local_ip == local
                    && tcb.remote_ip == remote
            })
        })
    }

    /// Wildcard-remote match in the listen table.
    pub(crate) fn tcp_find_listen(&self, local: IpAddr, local_port: u16) -> Option<TcbId> {
        // exact local address beats the wildcard
        let mut wildcard = None;
        for id in self.tcp_listen.iter().copied() {
            let Some(tcb) = self.tcbs.get(id) else {
                continue;
            };
            if tcb.local_port != local_port {
                continue;
            }
            if tcb.local_ip == local {
                return Some(id);
            }
            if local_addr_matches(tcb.local_ip, local) && wildcard.is_none() {
                wildcard = Some(id);
            }
        }
        wildcard
    }

    /// Remove `id` from whichever table holds it.
    pub(crate) fn tcp_detach(&mut self, id: TcbId) {
        self.tcp_bound.retain(|other| *other != id);
        self.tcp_listen.retain(|other| *other != id);
        self.tcp_active.retain(|other| *other != id);
        self.tcp_time_wait.retain(|other| *other != id);
    }

    /// Detach, release and return the TCB (queued buffers drop with
    /// it).
    pub(crate) fn tcp_release(&mut self, id: TcbId) -> Option<Tcb> {
        self.tcp_detach(id);
        self.tcbs.release(id)
    }

    /// Release the endpoint and fire its error hook. The hooks are
    /// consumed: after this the endpoint handle is dead.
    pub(crate) fn tcp_fire_error(&mut self, id: TcbId, reason: StackError) {
        if let Some(mut tcb) = self.tcp_release(id) {
            log::debug!("tcp: releasing endpoint with {reason}");
            if let Some(hooks) = tcb.hooks.take() {
                hooks.error(reason);
            }
        }
    }

    /// Run `f` with the endpoint's hooks temporarily taken out, so the
    /// hook can call back into the stack.
    pub(crate) fn with_tcp_hooks(
        &mut self,
        id: TcbId,
        f: impl FnOnce(&mut Box<dyn TcpHooks>, &mut TcpCtx<'_>),
    ) {
        let Some(mut hooks) = self.tcbs.get_mut(id).and_then(|tcb| tcb.hooks.take()) else {
            return;
        };
        {
            let mut cx = TcpCtx { stack: self, tcb: id };
            f(&mut hooks, &mut cx);
        }
        if let Some(tcb) = self.tcbs.get_mut(id) {
            if tcb.hooks.is_none() {
                tcb.hooks = Some(hooks);
            }
        }
    }

    /// Abort every endpoint bound to a vanishing netif.
    pub(crate) fn tcp_abort_on_netif(&mut self, netif: crate::iface::NetifId) {
        let ids: alloc::vec::Vec<TcbId> = self
            .tcp_active
            .iter()
            .chain(self.tcp_time_wait.iter())
            .copied()
            .filter(|id| {
                self.tcbs
                    .get(*id)
                    .is_some_and(|tcb| tcb.netif == Some(netif))
            })
            .collect();
        for id in ids {
            self.tcp_fire_error(id, StackError::Routing);
        }
    }

    /// An ICMP unreachable names this flow: tear it down.
    pub(crate) fn tcp_abort_unreachable(
        &mut self,
        local: IpAddr,
        local_port: u16,
        remote: IpAddr,
        remote_port: u16,
    ) {
        if let Some(id) = self.tcp_find_active(local, local_port, remote, remote_port) {
            self.tcp_fire_error(id, StackError::Unreachable);
        }
    }
}
