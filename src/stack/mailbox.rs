//! The threaded mailbox around the single-threaded core.
//!
//! The core itself never blocks; this module gives it a home thread
//! that drains a bounded message queue (received frames, deferred
//! calls) and fires the timers. Other threads interact exclusively
//! through a cloned [`StackHandle`] — nothing else may touch the
//! [`Stack`].

use std::boxed::Box;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::vec::Vec;

use crate::buf::Buf;
use crate::err::StackError;
use crate::iface::NetifId;
use crate::stack::{Config, Stack};
use crate::time::Instant;

/// A message posted into the core context.
pub enum Msg {
    /// A received link frame (owned bytes; the core wraps them into a
    /// buffer chain).
    Frame { netif: NetifId, frame: Vec<u8> },
    /// Run a closure in the core context.
    Call(Box<dyn FnOnce(&mut Stack) + Send>),
    /// Stop the runner.
    Shutdown,
}

/// Clonable producer side of the core mailbox. Messages from one
/// handle stay in order; the queue is bounded, so frame posting
/// applies backpressure by dropping.
#[derive(Clone)]
pub struct StackHandle {
    tx: SyncSender<Msg>,
}

impl StackHandle {
    /// Post one received frame. When the mailbox is full the frame is
    /// dropped and `OutOfMemory` returned — ingress backpressure is
    /// "drop and account" by design.
    pub fn post_frame(&self, netif: NetifId, frame: Vec<u8>) -> Result<(), StackError> {
        match self.tx.try_send(Msg::Frame { netif, frame }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(StackError::OutOfMemory),
            Err(TrySendError::Disconnected(_)) => Err(StackError::Connection),
        }
    }

    /// Run `f` in the core context (fire and forget). This is the only
    /// safe way for an external thread to touch core state beyond the
    /// endpoint API.
    pub fn call(&self, f: impl FnOnce(&mut Stack) + Send + 'static) -> Result<(), StackError> {
        self.tx
            .send(Msg::Call(Box::new(f)))
            .map_err(|_| StackError::Connection)
    }

    /// Run `f` in the core context and wait for its result, with an
    /// optional caller-side deadline. On timeout the call still runs
    /// eventually; only the waiting stops.
    pub fn with<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Stack) -> R + Send + 'static,
        deadline: Option<std::time::Duration>,
    ) -> Result<R, StackError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.call(move |stack| {
            let _ = reply_tx.send(f(stack));
        })?;
        match deadline {
            Some(deadline) => reply_rx
                .recv_timeout(deadline)
                .map_err(|_| StackError::Timeout),
            None => reply_rx.recv().map_err(|_| StackError::Connection),
        }
    }

    /// Ask the runner to stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

/// The core thread: owns the [`Stack`], drains the mailbox, fires the
/// timers.
pub struct StackRunner {
    handle: StackHandle,
    thread: Option<JoinHandle<()>>,
}

impl StackRunner {
    /// Spawn the core thread. The stack is built inside the thread
    /// (its internals are deliberately not `Send`); `setup` runs first
    /// and typically adds the netifs.
    pub fn spawn(
        cfg: Config,
        mailbox_depth: usize,
        setup: impl FnOnce(&mut Stack) + Send + 'static,
    ) -> StackRunner {
        let (tx, rx) = sync_channel(mailbox_depth);
        let thread = std::thread::Builder::new()
            .name("picostack-core".into())
            .spawn(move || run_core(cfg, rx, setup))
            .expect("spawn core thread");
        StackRunner {
            handle: StackHandle { tx },
            thread: Some(thread),
        }
    }

    /// A producer handle for this runner.
    pub fn handle(&self) -> StackHandle {
        self.handle.clone()
    }

    /// Stop the core thread and wait for it.
    pub fn join(mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StackRunner {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_core(cfg: Config, rx: Receiver<Msg>, setup: impl FnOnce(&mut Stack)) {
    let origin = std::time::Instant::now();
    let now = || Instant::from_millis(origin.elapsed().as_millis() as u64);

    let mut stack = Stack::new(cfg);
    setup(&mut stack);
    stack.poll(now());

    loop {
        // sleep until the next timer deadline or the next message
        let timeout = match stack.poll_at() {
            Some(deadline) => {
                let deadline = deadline.as_millis();
                let current = now().as_millis();
                std::time::Duration::from_millis(deadline.saturating_sub(current).max(1))
            }
            None => std::time::Duration::from_millis(50),
        };
        match rx.recv_timeout(timeout) {
            Ok(Msg::Frame { netif, frame }) => {
                stack.poll(now());
                stack.input(Buf::from_vec(frame), netif);
            }
            Ok(Msg::Call(f)) => {
                stack.poll(now());
                f(&mut stack);
            }
            Ok(Msg::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        stack.poll(now());
    }
}
