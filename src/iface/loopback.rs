use alloc::collections::VecDeque;

use crate::buf::Buf;
use crate::err::StackError;
use crate::iface::LinkDriver;

/// Loopback driver: every transmitted packet reappears on the receive
/// side at the next `Stack::poll`.
///
/// Use with a non-ethernet netif (raw IP framing) so no address
/// resolution is involved.
#[derive(Default)]
pub struct LoopbackDriver {
    queue: VecDeque<Buf>,
    /// Maximum number of packets held; further transmissions are
    /// dropped and counted.
    pub queue_limit: usize,
    /// Packets dropped because the queue was full.
    pub dropped: usize,
}

impl LoopbackDriver {
    pub fn new() -> LoopbackDriver {
        LoopbackDriver {
            queue: VecDeque::new(),
            queue_limit: 16,
            dropped: 0,
        }
    }
}

impl LinkDriver for LoopbackDriver {
    fn link_output(&mut self, frame: &Buf) -> Result<(), StackError> {
        if self.queue.len() >= self.queue_limit {
            self.dropped += 1;
            return Err(StackError::OutOfMemory);
        }
        // sharing the chain is enough, the receive path never mutates
        // in place without copy-on-write
        self.queue.push_back(frame.clone());
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Buf> {
        self.queue.pop_front()
    }
}
