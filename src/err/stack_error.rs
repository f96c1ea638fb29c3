/// Errors surfaced by the stateful parts of the stack (pools, routing,
/// endpoint operations, connection lifecycle).
///
/// Only [`StackError::OutOfMemory`] is retryable. Every other value that
/// reaches an endpoint's error hook is terminal for that endpoint: after
/// the hook has run the endpoint has been released by the stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StackError {
    /// A pool or the heap is exhausted. The caller may retry later.
    OutOfMemory,
    /// A requested header adjust or copy does not fit in the buffer chain.
    Buffer,
    /// A blocking operation reached its deadline (mailbox layer only,
    /// the core never blocks).
    Timeout,
    /// No route to the destination address.
    Routing,
    /// The requested local address/port is already bound.
    AddressInUse,
    /// An ICMP unreachable was received for this flow.
    Unreachable,
    /// The operation is not valid in the endpoint's current state.
    Connection,
    /// The peer sent a RST.
    Reset,
    /// The remote side closed the connection gracefully.
    Closed,
    /// The connection was aborted locally.
    Abort,
    /// The caller supplied an invalid value.
    Argument,
    /// A nonblocking connect (or similar operation) is still in progress.
    InProgress,
    /// A nonblocking operation would have to block.
    WouldBlock,
}

impl StackError {
    /// True if the error is terminal for the connection it was
    /// reported on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StackError::OutOfMemory | StackError::InProgress | StackError::WouldBlock
        )
    }
}

impl core::fmt::Display for StackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use StackError::*;
        match self {
            OutOfMemory => write!(f, "out of memory (pool or heap exhausted)"),
            Buffer => write!(f, "operation does not fit in the buffer chain"),
            Timeout => write!(f, "operation timed out"),
            Routing => write!(f, "no route to destination"),
            AddressInUse => write!(f, "address already in use"),
            Unreachable => write!(f, "destination unreachable"),
            Connection => write!(f, "operation invalid in the current connection state"),
            Reset => write!(f, "connection reset by peer"),
            Closed => write!(f, "connection closed by peer"),
            Abort => write!(f, "connection aborted"),
            Argument => write!(f, "invalid argument"),
            InProgress => write!(f, "operation in progress"),
            WouldBlock => write!(f, "operation would block"),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
