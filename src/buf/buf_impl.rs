use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::buf::{BufPool, Headroom, Storage, StorageClass};
use crate::err::StackError;

/// One segment of a buffer chain: a `(start, len)` view into reference
/// counted backing storage.
#[derive(Clone, Debug)]
pub struct Segment {
    storage: Storage,
    start: usize,
    len: usize,
}

impl Segment {
    /// The bytes this segment represents.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.storage.bytes()[self.start..self.start + self.len]
    }

    /// Bytes available in front of the payload.
    #[inline]
    fn headroom(&self) -> usize {
        self.start
    }

    /// Bytes available after the payload.
    #[inline]
    fn tailroom(&self) -> usize {
        self.storage.capacity() - self.start - self.len
    }

    /// Mutable payload access; copies the view into fresh heap storage
    /// first when the current backing is shared or read-only.
    fn payload_mut(&mut self) -> &mut [u8] {
        if self.storage.bytes_mut().is_none() {
            // copy on write: shared and rom storage is never written
            // through, each chain keeps its own view consistent
            let copy: Rc<[u8]> = self.payload().into();
            self.storage = Storage::Heap(copy);
            self.start = 0;
        }
        let start = self.start;
        let len = self.len;
        &mut self.storage.bytes_mut().expect("storage unique after copy")[start..start + len]
    }
}

/// A chain of segments jointly representing one datagram or stream
/// chunk.
///
/// The chain invariant `tot_len == Σ segment len` is maintained by
/// every operation.
#[derive(Clone, Debug, Default)]
pub struct Buf {
    segs: VecDeque<Segment>,
    tot_len: usize,
    /// Deliver-without-delay hint (maps to the TCP PSH bit).
    pub push: bool,
}

impl Buf {
    /// An empty chain.
    pub fn empty() -> Buf {
        Buf::default()
    }

    /// Allocate a single heap backed segment of exactly `n` payload
    /// bytes with `headroom` reserved in front.
    pub fn alloc_heap(headroom: Headroom, n: usize) -> Buf {
        let reserve = headroom.reserved();
        let mut segs = VecDeque::with_capacity(1);
        segs.push_back(Segment {
            storage: Storage::heap(reserve + n),
            start: reserve,
            len: n,
        });
        Buf {
            segs,
            tot_len: n,
            push: false,
        }
    }

    /// Allocate a chain of pool blocks covering exactly `n` payload
    /// bytes with `headroom` reserved in the first segment.
    ///
    /// Fails with [`StackError::OutOfMemory`] when the pool cannot
    /// supply enough blocks (already taken blocks are returned).
    pub fn alloc_pool(pool: &BufPool, headroom: Headroom, n: usize) -> Result<Buf, StackError> {
        let reserve = headroom.reserved();
        if reserve > pool.block_size() {
            return Err(StackError::Argument);
        }

        let mut buf = Buf::empty();
        let mut remaining = n;
        let mut first = true;
        loop {
            let offset = if first { reserve } else { 0 };
            let room = pool.block_size() - offset;
            let take = remaining.min(room);
            let Some(block) = pool.take_block() else {
                // blocks already chained return to the pool on drop
                return Err(StackError::OutOfMemory);
            };
            buf.segs.push_back(Segment {
                storage: Storage::Pool(block),
                start: offset,
                len: take,
            });
            buf.tot_len += take;
            remaining -= take;
            first = false;
            if remaining == 0 {
                return Ok(buf);
            }
        }
    }

    /// Wrap read-only bytes with static lifetime (no copy).
    pub fn from_static(bytes: &'static [u8]) -> Buf {
        let len = bytes.len();
        let mut segs = VecDeque::with_capacity(1);
        segs.push_back(Segment {
            storage: Storage::Rom(bytes),
            start: 0,
            len,
        });
        Buf {
            segs,
            tot_len: len,
            push: false,
        }
    }

    /// Take ownership of a byte vector (heap class, no headroom).
    pub fn from_vec(bytes: Vec<u8>) -> Buf {
        let len = bytes.len();
        let mut segs = VecDeque::with_capacity(1);
        segs.push_back(Segment {
            storage: Storage::Heap(bytes.into()),
            start: 0,
            len,
        });
        Buf {
            segs,
            tot_len: len,
            push: false,
        }
    }

    /// Wrap reference counted bytes handed in by the application.
    pub fn from_shared(bytes: Rc<[u8]>) -> Buf {
        let len = bytes.len();
        let mut segs = VecDeque::with_capacity(1);
        segs.push_back(Segment {
            storage: Storage::Shared(bytes),
            start: 0,
            len,
        });
        Buf {
            segs,
            tot_len: len,
            push: false,
        }
    }

    /// Total number of payload bytes across the chain.
    #[inline]
    pub fn tot_len(&self) -> usize {
        self.tot_len
    }

    /// True if the chain holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tot_len == 0
    }

    /// Number of segments in the chain.
    #[inline]
    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    /// Storage class of the first segment.
    pub fn class(&self) -> Option<StorageClass> {
        self.segs.front().map(|seg| seg.storage.class())
    }

    /// Iterate over the payload slices of all segments.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segs.iter().map(Segment::payload)
    }

    /// Move the front of the payload by `delta` bytes.
    ///
    /// A positive `delta` exposes bytes in front of the current
    /// payload (prepending header room); it fails with
    /// [`StackError::Buffer`] when the first segment does not have
    /// that much headroom. A negative `delta` hides bytes at the
    /// front; it fails when it would cross the first segment.
    pub fn header_adjust(&mut self, delta: i32) -> Result<(), StackError> {
        if delta >= 0 {
            let grow = delta as usize;
            let Some(first) = self.segs.front_mut() else {
                return if grow == 0 {
                    Ok(())
                } else {
                    Err(StackError::Buffer)
                };
            };
            if first.headroom() < grow {
                return Err(StackError::Buffer);
            }
            first.start -= grow;
            first.len += grow;
            self.tot_len += grow;
            Ok(())
        } else {
            let hide = -(delta as i64) as usize;
            let Some(first) = self.segs.front_mut() else {
                return Err(StackError::Buffer);
            };
            if first.len < hide {
                return Err(StackError::Buffer);
            }
            first.start += hide;
            first.len -= hide;
            self.tot_len -= hide;
            Ok(())
        }
    }

    /// Like [`Buf::header_adjust`] but a negative move may cross
    /// segment boundaries (used on receive to strip stacked headers
    /// regardless of how the chain is segmented).
    pub fn header_adjust_force(&mut self, delta: i32) -> Result<(), StackError> {
        if delta >= 0 {
            return self.header_adjust(delta);
        }
        let mut hide = -(delta as i64) as usize;
        if hide > self.tot_len {
            return Err(StackError::Buffer);
        }
        while hide > 0 {
            let first = self.segs.front_mut().expect("tot_len covers hide");
            if first.len > hide {
                first.start += hide;
                first.len -= hide;
                self.tot_len -= hide;
                hide = 0;
            } else {
                hide -= first.len;
                self.tot_len -= first.len;
                self.segs.pop_front();
            }
        }
        Ok(())
    }

    /// Append `other` to this chain, taking ownership.
    pub fn concat(&mut self, other: Buf) {
        self.tot_len += other.tot_len;
        self.segs.extend(other.segs);
    }

    /// Append a reference to `other`: the segments are shared, the
    /// caller keeps its chain.
    pub fn chain(&mut self, other: &Buf) {
        self.tot_len += other.tot_len;
        self.segs.extend(other.segs.iter().cloned());
    }

    /// Detach everything after the first segment and return it.
    pub fn dechain(&mut self) -> Option<Buf> {
        if self.segs.len() < 2 {
            return None;
        }
        let rest_segs: VecDeque<Segment> = self.segs.drain(1..).collect();
        let rest_len: usize = rest_segs.iter().map(|seg| seg.len).sum();
        self.tot_len -= rest_len;
        Some(Buf {
            segs: rest_segs,
            tot_len: rest_len,
            push: false,
        })
    }

    /// Split the chain at byte offset `at`; `self` keeps `[0, at)` and
    /// the returned chain holds `[at, tot_len)`. Splitting inside a
    /// segment shares its storage between the two chains.
    pub fn split_off(&mut self, at: usize) -> Result<Buf, StackError> {
        if at > self.tot_len {
            return Err(StackError::Argument);
        }
        let mut rest = Buf::empty();
        rest.push = self.push;

        // find the segment containing `at`
        let mut covered = 0usize;
        let mut split_index = self.segs.len();
        for (i, seg) in self.segs.iter().enumerate() {
            if covered + seg.len > at {
                split_index = i;
                break;
            }
            covered += seg.len;
        }

        if split_index < self.segs.len() {
            let within = at - covered;
            if within > 0 {
                // share the storage, disjoint views
                let seg = &mut self.segs[split_index];
                let tail = Segment {
                    storage: seg.storage.clone(),
                    start: seg.start + within,
                    len: seg.len - within,
                };
                seg.len = within;
                rest.segs.push_back(tail);
                split_index += 1;
            }
            for seg in self.segs.drain(split_index..) {
                rest.segs.push_back(seg);
            }
        }

        rest.tot_len = self.tot_len - at;
        self.tot_len = at;
        Ok(rest)
    }

    /// Split off everything beyond 65 535 bytes (the maximum a single
    /// IP datagram length field can express). Returns `None` when the
    /// chain already fits.
    pub fn split_64k(&mut self) -> Option<Buf> {
        if self.tot_len <= 0xffff {
            None
        } else {
            Some(self.split_off(0xffff).expect("tot_len > 0xffff"))
        }
    }

    /// Shrink the chain to `new_len` bytes, dropping trailing
    /// segments.
    pub fn realloc(&mut self, new_len: usize) -> Result<(), StackError> {
        if new_len > self.tot_len {
            return Err(StackError::Argument);
        }
        let tail = self.split_off(new_len)?;
        drop(tail);
        // drop now-empty trailing segments left by a boundary split
        while matches!(self.segs.back(), Some(seg) if seg.len == 0) && self.segs.len() > 1 {
            self.segs.pop_back();
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn copy_to_slice(&self, offset: usize, dst: &mut [u8]) -> Result<(), StackError> {
        if offset + dst.len() > self.tot_len {
            return Err(StackError::Buffer);
        }
        let mut skipped = 0usize;
        let mut written = 0usize;
        for seg in &self.segs {
            if written == dst.len() {
                break;
            }
            let payload = seg.payload();
            let seg_end = skipped + payload.len();
            if seg_end > offset + written {
                let from = (offset + written).max(skipped) - skipped;
                let take = (payload.len() - from).min(dst.len() - written);
                dst[written..written + take].copy_from_slice(&payload[from..from + take]);
                written += take;
            }
            skipped = seg_end;
        }
        debug_assert_eq!(written, dst.len());
        Ok(())
    }

    /// Copy `src` into the chain starting at `offset`. Shared or
    /// read-only segments are copied on write.
    pub fn copy_from_slice(&mut self, offset: usize, src: &[u8]) -> Result<(), StackError> {
        if offset + src.len() > self.tot_len {
            return Err(StackError::Buffer);
        }
        let mut skipped = 0usize;
        let mut read = 0usize;
        for seg in self.segs.iter_mut() {
            if read == src.len() {
                break;
            }
            let seg_len = seg.len;
            let seg_end = skipped + seg_len;
            if seg_end > offset + read && seg_len > 0 {
                let from = (offset + read).max(skipped) - skipped;
                let take = (seg_len - from).min(src.len() - read);
                seg.payload_mut()[from..from + take].copy_from_slice(&src[read..read + take]);
                read += take;
            }
            skipped = seg_end;
        }
        debug_assert_eq!(read, src.len());
        Ok(())
    }

    /// Append bytes into the tailroom of the last segment without
    /// allocating. Returns how many bytes were taken (0 when the last
    /// segment is shared or full).
    pub fn append_in_tail(&mut self, src: &[u8]) -> usize {
        let Some(last) = self.segs.back_mut() else {
            return 0;
        };
        if !last.storage.is_unique() {
            return 0;
        }
        let take = last.tailroom().min(src.len());
        if take == 0 {
            return 0;
        }
        let start = last.start;
        let len = last.len;
        let bytes = last
            .storage
            .bytes_mut()
            .expect("unique storage is writable");
        bytes[start + len..start + len + take].copy_from_slice(&src[..take]);
        last.len += take;
        self.tot_len += take;
        take
    }

    /// Read one byte at `offset`.
    pub fn read_u8_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.tot_len {
            return None;
        }
        let mut skipped = 0usize;
        for seg in &self.segs {
            if offset < skipped + seg.len {
                return Some(seg.payload()[offset - skipped]);
            }
            skipped += seg.len;
        }
        None
    }

    /// Write one byte at `offset`.
    pub fn write_u8_at(&mut self, offset: usize, value: u8) -> Result<(), StackError> {
        self.copy_from_slice(offset, &[value])
    }

    /// Compare the bytes at `offset` with `other`. True when all of
    /// `other` matches.
    pub fn eq_at(&self, offset: usize, other: &[u8]) -> bool {
        if offset + other.len() > self.tot_len {
            return false;
        }
        other
            .iter()
            .enumerate()
            .all(|(i, byte)| self.read_u8_at(offset + i) == Some(*byte))
    }

    /// Find the first occurrence of `needle` at or after `start`.
    pub fn find(&self, needle: &[u8], start: usize) -> Option<usize> {
        if needle.is_empty() {
            return Some(start.min(self.tot_len));
        }
        if needle.len() > self.tot_len {
            return None;
        }
        for offset in start..=(self.tot_len - needle.len()) {
            if self.eq_at(offset, needle) {
                return Some(offset);
            }
        }
        None
    }

    /// Make the first `n` bytes contiguous and return them.
    ///
    /// When the first segment is already long enough this is free;
    /// otherwise the first segments are coalesced into one heap
    /// backed segment.
    pub fn pullup(&mut self, n: usize) -> Result<&[u8], StackError> {
        if n > self.tot_len {
            return Err(StackError::Buffer);
        }
        if n == 0 {
            return Ok(&[]);
        }
        let first_len = self.segs.front().map(|seg| seg.len).unwrap_or(0);
        if first_len < n {
            // coalesce the front of the chain
            let mut flat = alloc::vec![0u8; n];
            self.copy_to_slice(0, &mut flat)?;
            let rest = self.split_off(n)?;
            let mut merged = Buf::from_vec(flat);
            merged.push = self.push;
            merged.concat(rest);
            *self = merged;
        }
        Ok(&self.segs.front().expect("chain is non empty for n > 0").payload()[..n])
    }

    /// Copy the whole chain into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut flat = alloc::vec![0u8; self.tot_len];
        self.copy_to_slice(0, &mut flat)
            .expect("tot_len sized copy succeeds");
        flat
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let sum: usize = self.segs.iter().map(|seg| seg.len).sum();
        assert_eq!(sum, self.tot_len, "tot_len equals sum of segment lens");
        for seg in &self.segs {
            assert!(seg.start + seg.len <= seg.storage.capacity());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(headroom: Headroom, bytes: &[u8]) -> Buf {
        let mut buf = Buf::alloc_heap(headroom, bytes.len());
        buf.copy_from_slice(0, bytes).unwrap();
        buf
    }

    #[test]
    fn alloc_heap() {
        let buf = Buf::alloc_heap(Headroom::Transport, 100);
        assert_eq!(buf.tot_len(), 100);
        assert_eq!(buf.seg_count(), 1);
        assert_eq!(buf.class(), Some(StorageClass::Heap));
        buf.check_invariants();
    }

    #[test]
    fn alloc_pool_chains_blocks() {
        let pool = BufPool::new(4, 128);
        let buf = Buf::alloc_pool(&pool, Headroom::Raw, 300).unwrap();
        assert_eq!(buf.tot_len(), 300);
        assert_eq!(buf.seg_count(), 3);
        assert_eq!(pool.stats().used, 3);
        drop(buf);
        assert_eq!(pool.stats().used, 0);
    }

    #[test]
    fn alloc_pool_headroom_only_in_first_block() {
        let pool = BufPool::new(4, 100);
        let buf = Buf::alloc_pool(&pool, Headroom::Ip, 100).unwrap();
        // 100 - 54 headroom = 46 in the first block, 54 in the second
        assert_eq!(buf.seg_count(), 2);
        assert_eq!(buf.tot_len(), 100);
        buf.check_invariants();
    }

    #[test]
    fn alloc_pool_exhaustion_is_clean() {
        let pool = BufPool::new(2, 64);
        assert_eq!(
            Buf::alloc_pool(&pool, Headroom::Raw, 200).unwrap_err(),
            StackError::OutOfMemory
        );
        // partially taken blocks were returned
        assert_eq!(pool.stats().used, 0);
        assert!(Buf::alloc_pool(&pool, Headroom::Raw, 100).is_ok());
    }

    #[test]
    fn header_adjust_grow_and_hide() {
        let mut buf = filled(Headroom::Link, &[1, 2, 3, 4]);
        // expose 14 bytes of link headroom
        buf.header_adjust(14).unwrap();
        assert_eq!(buf.tot_len(), 18);
        // no more headroom
        assert_eq!(buf.header_adjust(1).unwrap_err(), StackError::Buffer);
        // hide the link header again
        buf.header_adjust(-14).unwrap();
        assert_eq!(buf.tot_len(), 4);
        assert_eq!(buf.to_vec(), [1, 2, 3, 4]);
        // cannot hide more than the first segment holds
        assert_eq!(buf.header_adjust(-5).unwrap_err(), StackError::Buffer);
        buf.check_invariants();
    }

    #[test]
    fn header_adjust_force_crosses_segments() {
        let pool = BufPool::new(4, 16);
        let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, 40).unwrap();
        let data: Vec<u8> = (0u8..40).collect();
        buf.copy_from_slice(0, &data).unwrap();
        assert_eq!(buf.seg_count(), 3);

        // non-force fails across the 16 byte segment boundary
        assert_eq!(buf.header_adjust(-20).unwrap_err(), StackError::Buffer);
        // force succeeds
        buf.header_adjust_force(-20).unwrap();
        assert_eq!(buf.tot_len(), 20);
        assert_eq!(buf.to_vec(), &data[20..]);
        buf.check_invariants();
    }

    #[test]
    fn concat_and_dechain() {
        let mut a = filled(Headroom::Raw, &[1, 2]);
        let b = filled(Headroom::Raw, &[3, 4, 5]);
        a.concat(b);
        assert_eq!(a.tot_len(), 5);
        assert_eq!(a.seg_count(), 2);
        assert_eq!(a.to_vec(), [1, 2, 3, 4, 5]);

        let rest = a.dechain().unwrap();
        assert_eq!(a.tot_len(), 2);
        assert_eq!(rest.to_vec(), [3, 4, 5]);
        assert!(a.dechain().is_none());
        a.check_invariants();
        rest.check_invariants();
    }

    #[test]
    fn chain_shares_segments() {
        let pool = BufPool::new(2, 64);
        let mut a = Buf::alloc_pool(&pool, Headroom::Raw, 10).unwrap();
        let b = Buf::alloc_pool(&pool, Headroom::Raw, 10).unwrap();
        a.chain(&b);
        assert_eq!(a.tot_len(), 20);
        // both chains alive: blocks still leased
        drop(b);
        assert_eq!(pool.stats().used, 2);
        drop(a);
        assert_eq!(pool.stats().used, 0);
    }

    #[test]
    fn copy_round_trip_across_segments() {
        let pool = BufPool::new(8, 16);
        let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, 100).unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        buf.copy_from_slice(0, &data).unwrap();
        let mut out = alloc::vec![0u8; 100];
        buf.copy_to_slice(0, &mut out).unwrap();
        assert_eq!(out, data);

        // partial copy with offset
        let mut part = alloc::vec![0u8; 30];
        buf.copy_to_slice(25, &mut part).unwrap();
        assert_eq!(&part[..], &data[25..55]);

        // out of range
        assert_eq!(
            buf.copy_to_slice(90, &mut part).unwrap_err(),
            StackError::Buffer
        );
    }

    #[test]
    fn copy_on_write_after_chain_share() {
        let mut a = filled(Headroom::Raw, &[1, 2, 3, 4]);
        let mut b = Buf::empty();
        b.chain(&a);
        // writing through a must not change b
        a.copy_from_slice(0, &[9, 9]).unwrap();
        assert_eq!(a.to_vec(), [9, 9, 3, 4]);
        assert_eq!(b.to_vec(), [1, 2, 3, 4]);
    }

    #[test]
    fn rom_copy_on_write() {
        let mut buf = Buf::from_static(b"hello world");
        assert_eq!(buf.class(), Some(StorageClass::Rom));
        buf.copy_from_slice(0, b"H").unwrap();
        assert_eq!(buf.to_vec(), b"Hello world");
        // class changed by the copy
        assert_eq!(buf.class(), Some(StorageClass::Heap));
    }

    #[test]
    fn split_off_mid_segment() {
        let mut buf = filled(Headroom::Raw, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let rest = buf.split_off(3).unwrap();
        assert_eq!(buf.to_vec(), [0, 1, 2]);
        assert_eq!(rest.to_vec(), [3, 4, 5, 6, 7]);
        buf.check_invariants();
        rest.check_invariants();
    }

    #[test]
    fn split_64k() {
        let mut big = Buf::alloc_heap(Headroom::Raw, 70_000);
        let rest = big.split_64k().unwrap();
        assert_eq!(big.tot_len(), 0xffff);
        assert_eq!(rest.tot_len(), 70_000 - 0xffff);

        let mut small = Buf::alloc_heap(Headroom::Raw, 100);
        assert!(small.split_64k().is_none());
    }

    #[test]
    fn split_64k_concat_restores_payload() {
        let mut big = Buf::alloc_heap(Headroom::Raw, 70_000);
        let data: Vec<u8> = (0..70_000usize).map(|i| (i % 251) as u8).collect();
        big.copy_from_slice(0, &data).unwrap();
        let original = big.to_vec();

        let rest = big.split_64k().unwrap();
        big.concat(rest);
        assert_eq!(big.to_vec(), original);
    }

    #[test]
    fn find_and_eq_at() {
        let pool = BufPool::new(8, 8);
        let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, 26).unwrap();
        buf.copy_from_slice(0, b"abcdefghijklmnopqrstuvwxyz").unwrap();

        assert!(buf.eq_at(3, b"def"));
        assert_eq!(false, buf.eq_at(3, b"xyz"));
        // needle crossing a segment boundary (segments are 8 bytes)
        assert_eq!(buf.find(b"ghij", 0), Some(6));
        assert_eq!(buf.find(b"ghij", 7), None);
        assert_eq!(buf.find(b"nosuch", 0), None);
    }

    #[test]
    fn pullup() {
        let pool = BufPool::new(8, 8);
        let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, 20).unwrap();
        let data: Vec<u8> = (0..20u8).collect();
        buf.copy_from_slice(0, &data).unwrap();
        assert_eq!(buf.seg_count(), 3);

        let head = buf.pullup(12).unwrap();
        assert_eq!(head, &data[..12]);
        assert_eq!(buf.tot_len(), 20);
        assert_eq!(buf.to_vec(), data);
        buf.check_invariants();
    }

    #[test]
    fn append_in_tail() {
        let mut buf = Buf::alloc_heap(Headroom::Raw, 0);
        // heap alloc of size 0 has no tailroom
        assert_eq!(buf.append_in_tail(b"xy"), 0);

        let pool = BufPool::new(1, 16);
        let mut buf2 = Buf::alloc_pool(&pool, Headroom::Raw, 4).unwrap();
        buf2.copy_from_slice(0, b"abcd").unwrap();
        assert_eq!(buf2.append_in_tail(b"efgh"), 4);
        assert_eq!(buf2.to_vec(), b"abcdefgh");
        // fill to capacity
        assert_eq!(buf2.append_in_tail(&[0u8; 100]), 8);
        assert_eq!(buf2.tot_len(), 16);
        assert_eq!(buf2.append_in_tail(b"z"), 0);
        drop(buf);
    }

    #[test]
    fn realloc_shrinks() {
        let pool = BufPool::new(4, 8);
        let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, 30).unwrap();
        buf.realloc(10).unwrap();
        assert_eq!(buf.tot_len(), 10);
        // segments past the cut were released
        assert_eq!(pool.stats().used, 2);
        assert_eq!(buf.realloc(20).unwrap_err(), StackError::Argument);
        buf.check_invariants();
    }

    #[test]
    fn free_restores_pool_levels() {
        let pool = BufPool::new(4, 32);
        let before = pool.stats();
        {
            let mut a = Buf::alloc_pool(&pool, Headroom::Link, 50).unwrap();
            let b = Buf::alloc_pool(&pool, Headroom::Raw, 20).unwrap();
            a.chain(&b);
            drop(b);
            let _rest = a.split_off(30).unwrap();
        }
        let after = pool.stats();
        assert_eq!(before.used, after.used);
        assert_eq!(after.used, 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn tot_len_invariant_after_random_ops(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            split_at_ratio in 0.0f64..1.0,
            hide in 0usize..64,
        ) {
            let pool = BufPool::new(64, 48);
            let mut buf = Buf::alloc_pool(&pool, Headroom::Link, data.len()).unwrap();
            buf.copy_from_slice(0, &data).unwrap();
            buf.check_invariants();

            let split_at = ((data.len() as f64) * split_at_ratio) as usize;
            let rest = buf.split_off(split_at).unwrap();
            buf.check_invariants();
            rest.check_invariants();
            prop_assert_eq!(buf.tot_len() + rest.tot_len(), data.len());

            buf.concat(rest);
            buf.check_invariants();
            prop_assert_eq!(buf.to_vec(), data.clone());

            if hide <= buf.tot_len() {
                buf.header_adjust_force(-(hide as i32)).unwrap();
                buf.check_invariants();
                prop_assert_eq!(buf.to_vec(), data[hide..].to_vec());
            }
        }

        #[test]
        fn copy_round_trip(
            data in proptest::collection::vec(any::<u8>(), 0..256),
            offset in 0usize..128,
        ) {
            let total = offset + data.len() + 7;
            let pool = BufPool::new(64, 32);
            let mut buf = Buf::alloc_pool(&pool, Headroom::Raw, total).unwrap();
            buf.copy_from_slice(offset, &data).unwrap();
            let mut out = alloc::vec![0u8; data.len()];
            buf.copy_to_slice(offset, &mut out).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
