use crate::addr::IpAddr;
use crate::buf::Buf;
use crate::err::StackError;

/// Link-layer driver of a [`Netif`](crate::iface::Netif).
///
/// The stack calls `link_output` with fully framed packets: an
/// Ethernet frame for netifs with the `ethernet` flag, a raw IP packet
/// otherwise. Drivers feed received frames back either through
/// `poll_receive` (polled drivers like the loopback) or by posting
/// frames into the stack's input from the embedder's receive path.
pub trait LinkDriver {
    /// Transmit one framed packet.
    fn link_output(&mut self, frame: &Buf) -> Result<(), StackError>;

    /// Update the hardware multicast filter (drivers without one keep
    /// receiving everything and simply accept).
    fn multicast_filter(&mut self, _group: IpAddr, _join: bool) -> Result<(), StackError> {
        Ok(())
    }

    /// Hand one received frame to the stack. Called repeatedly during
    /// `Stack::poll` until it returns `None`.
    fn poll_receive(&mut self) -> Option<Buf> {
        None
    }
}
