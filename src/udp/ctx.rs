use crate::addr::IpAddr;
use crate::err::StackError;
use crate::stack::Stack;
use crate::udp::UdpId;

/// Endpoint view handed to [`UdpHooks`](crate::udp::UdpHooks): the
/// stack plus the endpoint the hook fired on.
pub struct UdpCtx<'a> {
    pub(crate) stack: &'a mut Stack,
    pub(crate) udp: UdpId,
}

impl<'a> UdpCtx<'a> {
    /// The endpoint this context addresses.
    #[inline]
    pub fn id(&self) -> UdpId {
        self.udp
    }

    /// Access to the whole stack (further endpoint operations, timer
    /// registration).
    #[inline]
    pub fn stack(&mut self) -> &mut Stack {
        self.stack
    }

    /// Send a datagram to an explicit destination.
    pub fn send_to(&mut self, dst: IpAddr, dst_port: u16, data: &[u8]) -> Result<(), StackError> {
        self.stack.udp_send_to(self.udp, dst, dst_port, data)
    }

    /// Send to the connected remote.
    pub fn send(&mut self, data: &[u8]) -> Result<(), StackError> {
        self.stack.udp_send(self.udp, data)
    }
}
