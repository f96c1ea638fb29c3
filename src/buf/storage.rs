use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::pool::PoolStats;

/// Storage class of a buffer segment. Determines who owns the backing
/// bytes and how they are released when the last reference drops.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StorageClass {
    /// Fixed-size block leased from a [`BufPool`]; returned to the
    /// pool's free list on release.
    Pool,
    /// Heap allocation sized to the request.
    Heap,
    /// Read-only bytes with static lifetime.
    Rom,
    /// Reference counted bytes handed in by the application or another
    /// subsystem (the reference count doubles as the free function).
    Shared,
}

/// Backing bytes of one buffer segment.
///
/// Cloning is cheap (a reference count bump); the last clone to drop
/// releases the storage according to its class.
#[derive(Clone, Debug)]
pub enum Storage {
    Pool(PoolBlock),
    Heap(Rc<[u8]>),
    Rom(&'static [u8]),
    Shared(Rc<[u8]>),
}

impl Storage {
    /// Allocate zeroed heap storage of the given size.
    pub fn heap(size: usize) -> Storage {
        Storage::Heap(alloc::vec![0u8; size].into())
    }

    /// The class tag of this storage.
    #[inline]
    pub fn class(&self) -> StorageClass {
        match self {
            Storage::Pool(_) => StorageClass::Pool,
            Storage::Heap(_) => StorageClass::Heap,
            Storage::Rom(_) => StorageClass::Rom,
            Storage::Shared(_) => StorageClass::Shared,
        }
    }

    /// All backing bytes (not just the segment view).
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Storage::Pool(block) => block.bytes(),
            Storage::Heap(bytes) => bytes,
            Storage::Rom(bytes) => bytes,
            Storage::Shared(bytes) => bytes,
        }
    }

    /// Size of the backing storage in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    /// Exclusive access to the backing bytes. Fails when the storage
    /// is read-only or still referenced by another chain.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Storage::Pool(block) => block.bytes_mut(),
            Storage::Heap(bytes) | Storage::Shared(bytes) => Rc::get_mut(bytes),
            Storage::Rom(_) => None,
        }
    }

    /// True if no other reference to the backing bytes exists.
    pub fn is_unique(&self) -> bool {
        match self {
            Storage::Pool(block) => Rc::strong_count(&block.inner) == 1,
            Storage::Heap(bytes) | Storage::Shared(bytes) => Rc::strong_count(bytes) == 1,
            Storage::Rom(_) => false,
        }
    }
}

/// A fixed-size block leased from a [`BufPool`].
///
/// The block returns itself to the pool's free list when the last
/// clone drops. If the pool was dropped first the bytes are simply
/// freed.
#[derive(Clone, Debug)]
pub struct PoolBlock {
    pub(crate) inner: Rc<BlockInner>,
}

impl PoolBlock {
    #[inline]
    fn bytes(&self) -> &[u8] {
        self.inner.bytes.as_ref().expect("live block has bytes")
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        Rc::get_mut(&mut self.inner).map(|inner| {
            inner.bytes.as_mut().expect("live block has bytes").as_mut()
        })
    }
}

#[derive(Debug)]
pub(crate) struct BlockInner {
    bytes: Option<Box<[u8]>>,
    home: Weak<RefCell<BufPoolShared>>,
}

impl Drop for BlockInner {
    fn drop(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            if let Some(home) = self.home.upgrade() {
                let mut shared = home.borrow_mut();
                shared.stats.used -= 1;
                shared.free.push(bytes);
            }
        }
    }
}

#[derive(Debug)]
struct BufPoolShared {
    free: Vec<Box<[u8]>>,
    block_size: usize,
    stats: PoolStats,
}

/// Pool of equally sized byte blocks backing [`StorageClass::Pool`]
/// buffer segments.
///
/// The handle is cheap to clone; all clones draw from the same free
/// list. The pool is single-context state: it must only be used from
/// the core context.
#[derive(Clone, Debug)]
pub struct BufPool {
    shared: Rc<RefCell<BufPoolShared>>,
}

impl BufPool {
    /// Create a pool of `block_count` blocks of `block_size` bytes.
    pub fn new(block_count: usize, block_size: usize) -> BufPool {
        let mut free = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            free.push(alloc::vec![0u8; block_size].into_boxed_slice());
        }
        BufPool {
            shared: Rc::new(RefCell::new(BufPoolShared {
                free,
                block_size,
                stats: PoolStats::default(),
            })),
        }
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.shared.borrow().block_size
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.borrow().stats
    }

    /// Lease one block. Returns `None` (and counts a failure) when the
    /// pool is exhausted.
    pub fn take_block(&self) -> Option<PoolBlock> {
        let mut shared = self.shared.borrow_mut();
        let Some(bytes) = shared.free.pop() else {
            shared.stats.failed += 1;
            return None;
        };
        shared.stats.used += 1;
        if shared.stats.used > shared.stats.peak {
            shared.stats.peak = shared.stats.used;
        }
        Some(PoolBlock {
            inner: Rc::new(BlockInner {
                bytes: Some(bytes),
                home: Rc::downgrade(&self.shared),
            }),
        })
    }
}
