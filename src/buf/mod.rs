//! The buffer chain subsystem.
//!
//! [`Buf`] is the container every datagram and stream chunk travels in:
//! a chain of segments, each a view into reference counted backing
//! storage. Allocation reserves protocol dependent headroom so headers
//! can be prepended in place without copying.

mod buf_impl;
pub use buf_impl::*;

mod headroom;
pub use headroom::*;

mod storage;
pub use storage::*;
