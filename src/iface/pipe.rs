use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::buf::Buf;
use crate::err::StackError;
use crate::iface::LinkDriver;

/// One end of an in-memory point-to-point link.
///
/// `PipeDriver::pair()` creates two connected ends; what one end
/// transmits the other receives on its next poll. The scenario tests
/// wire two stacks together with this.
pub struct PipeDriver {
    tx: Rc<RefCell<VecDeque<Buf>>>,
    rx: Rc<RefCell<VecDeque<Buf>>>,
    /// Maximum queued packets per direction.
    pub queue_limit: usize,
    /// Packets dropped because the peer queue was full.
    pub dropped: usize,
    /// When true, transmitted packets are discarded instead of
    /// delivered (for loss simulation in tests).
    pub blackhole: bool,
}

impl PipeDriver {
    /// Create both ends of a pipe.
    pub fn pair() -> (PipeDriver, PipeDriver) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        (
            PipeDriver {
                tx: a_to_b.clone(),
                rx: b_to_a.clone(),
                queue_limit: 64,
                dropped: 0,
                blackhole: false,
            },
            PipeDriver {
                tx: b_to_a,
                rx: a_to_b,
                queue_limit: 64,
                dropped: 0,
                blackhole: false,
            },
        )
    }
}

impl LinkDriver for PipeDriver {
    fn link_output(&mut self, frame: &Buf) -> Result<(), StackError> {
        if self.blackhole {
            return Ok(());
        }
        let mut queue = self.tx.borrow_mut();
        if queue.len() >= self.queue_limit {
            self.dropped += 1;
            return Err(StackError::OutOfMemory);
        }
        queue.push_back(frame.clone());
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Buf> {
        self.rx.borrow_mut().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_cross_connected() {
        let (mut a, mut b) = PipeDriver::pair();
        a.link_output(&Buf::from_static(b"to b")).unwrap();
        b.link_output(&Buf::from_static(b"to a")).unwrap();
        assert_eq!(b.poll_receive().unwrap().to_vec(), b"to b");
        assert_eq!(a.poll_receive().unwrap().to_vec(), b"to a");
    }

    #[test]
    fn blackhole_discards() {
        let (mut a, mut b) = PipeDriver::pair();
        a.blackhole = true;
        a.link_output(&Buf::from_static(b"lost")).unwrap();
        assert!(b.poll_receive().is_none());
    }
}
