//! Fragment reassembly shared by the IPv4 and IPv6 input pipelines.
//!
//! One [`ReassemblyPool`] tracks every in-progress datagram, keyed by
//! the protocol specific (source, destination, identification) tuple.
//! Received ranges are tracked exactly; any overlap discards the whole
//! block (a reassembly attack is not worth guessing about).

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::IpNumber;

/// Identification of one in-progress reassembly.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReassKey {
    V4 {
        source: [u8; 4],
        destination: [u8; 4],
        identification: u16,
        protocol: u8,
    },
    V6 {
        source: [u8; 16],
        destination: [u8; 16],
        identification: u32,
    },
}

/// Errors while integrating a fragment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReassError {
    /// The fragment overlaps already received data; the whole block
    /// was discarded.
    Overlap,
    /// offset + len exceeds the maximum datagram size or conflicts
    /// with a previously seen final fragment; the block was discarded.
    BadLength,
    /// Too many blocks in progress, fragment dropped.
    PoolExhausted,
}

/// Range of bytes already received, `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct FragRange {
    start: u32,
    end: u32,
}

impl FragRange {
    /// True if the ranges share at least one byte.
    fn overlaps(&self, other: FragRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Merge ranges that touch exactly (end == start).
    fn try_join(&self, other: FragRange) -> Option<FragRange> {
        if self.end == other.start || other.end == self.start {
            Some(FragRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct ReassBlock {
    protocol: IpNumber,
    data: Vec<u8>,
    sections: Vec<FragRange>,
    /// Total length, known once the fragment without more-fragments
    /// arrived.
    end: Option<u32>,
    /// Milliseconds this block has been waiting.
    age_ms: u32,
}

impl ReassBlock {
    fn is_complete(&self) -> bool {
        match self.end {
            Some(end) => {
                self.sections.len() == 1
                    && self.sections[0].start == 0
                    && self.sections[0].end == end
            }
            None => false,
        }
    }
}

/// All in-progress reassemblies.
#[derive(Debug)]
pub struct ReassemblyPool {
    active: HashMap<ReassKey, ReassBlock>,
    /// Maximum parallel blocks.
    max_blocks: usize,
    /// Age after which a block is discarded.
    max_age_ms: u32,
}

/// The reassembled datagram payload handed back on completion.
#[derive(Debug)]
pub struct Reassembled {
    pub protocol: IpNumber,
    pub payload: Vec<u8>,
}

impl ReassemblyPool {
    /// Largest reassembled datagram accepted (the IP total length
    /// field cannot express more).
    pub const MAX_DATAGRAM: u32 = 0xffff;

    pub fn new(max_blocks: usize, max_age_ms: u32) -> ReassemblyPool {
        ReassemblyPool {
            active: HashMap::new(),
            max_blocks,
            max_age_ms,
        }
    }

    /// Number of blocks in progress.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True if nothing is being reassembled.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Integrate one fragment. Returns the completed datagram when
    /// this fragment was the last missing piece.
    pub fn add(
        &mut self,
        key: ReassKey,
        protocol: IpNumber,
        offset: u32,
        more_fragments: bool,
        payload: &[u8],
    ) -> Result<Option<Reassembled>, ReassError> {
        let end = offset + payload.len() as u32;
        if end > Self::MAX_DATAGRAM {
            self.active.remove(&key);
            return Err(ReassError::BadLength);
        }

        if !self.active.contains_key(&key) {
            if self.active.len() >= self.max_blocks {
                return Err(ReassError::PoolExhausted);
            }
            self.active.insert(
                key.clone(),
                ReassBlock {
                    protocol,
                    data: Vec::new(),
                    sections: Vec::new(),
                    end: None,
                    age_ms: 0,
                },
            );
        }
        let block = self.active.get_mut(&key).expect("inserted above");

        // a final fragment pins the total length; a second, different
        // final fragment or data beyond the known end discards
        if let Some(known_end) = block.end {
            if end > known_end || (!more_fragments && end != known_end) {
                self.active.remove(&key);
                return Err(ReassError::BadLength);
            }
        }
        if !more_fragments {
            block.end = Some(end);
        }

        // exact-range bookkeeping: overlap discards the block
        let mut new_section = FragRange { start: offset, end };
        for section in &block.sections {
            if section.overlaps(new_section) {
                self.active.remove(&key);
                return Err(ReassError::Overlap);
            }
        }
        block.sections.retain_mut(|section| {
            if let Some(joined) = section.try_join(new_section) {
                new_section = joined;
                false
            } else {
                true
            }
        });
        // a join can make two previously separate sections adjacent
        loop {
            let mut joined_any = false;
            block.sections.retain_mut(|section| {
                if let Some(joined) = section.try_join(new_section) {
                    new_section = joined;
                    joined_any = true;
                    false
                } else {
                    true
                }
            });
            if !joined_any {
                break;
            }
        }
        block.sections.push(new_section);

        // copy the payload into place
        let needed = end as usize;
        if block.data.len() < needed {
            block.data.resize(needed, 0);
        }
        block.data[offset as usize..end as usize].copy_from_slice(payload);

        if block.is_complete() {
            let block = self.active.remove(&key).expect("present");
            let mut payload = block.data;
            payload.truncate(block.end.expect("complete has end") as usize);
            return Ok(Some(Reassembled {
                protocol: block.protocol,
                payload,
            }));
        }
        Ok(None)
    }

    /// Age all blocks by `elapsed_ms`; expired blocks are removed and
    /// their keys returned together with whether the first fragment
    /// had arrived (only those blocks get an ICMP time exceeded).
    pub fn tick(&mut self, elapsed_ms: u32) -> Vec<(ReassKey, bool)> {
        let max_age_ms = self.max_age_ms;
        let mut expired = Vec::new();
        self.active.retain(|key, block| {
            block.age_ms = block.age_ms.saturating_add(elapsed_ms);
            if block.age_ms >= max_age_ms {
                let has_first = block.sections.iter().any(|section| section.start == 0);
                expired.push((key.clone(), has_first));
                false
            } else {
                true
            }
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u16) -> ReassKey {
        ReassKey::V4 {
            source: [10, 0, 0, 1],
            destination: [10, 0, 0, 2],
            identification: id,
            protocol: IpNumber::UDP.0,
        }
    }

    fn payload(start: usize, len: usize) -> Vec<u8> {
        (start..start + len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn in_order_reassembly() {
        let mut pool = ReassemblyPool::new(4, 15000);
        assert!(pool
            .add(key(1), IpNumber::UDP, 0, true, &payload(0, 16))
            .unwrap()
            .is_none());
        assert!(pool
            .add(key(1), IpNumber::UDP, 16, true, &payload(16, 16))
            .unwrap()
            .is_none());
        let done = pool
            .add(key(1), IpNumber::UDP, 32, false, &payload(32, 8))
            .unwrap()
            .unwrap();
        assert_eq!(done.protocol, IpNumber::UDP);
        assert_eq!(done.payload, payload(0, 40));
        assert!(pool.is_empty());
    }

    #[test]
    fn every_permutation_reassembles() {
        // three fragments in all 6 arrival orders
        let frags = [
            (0u32, true, payload(0, 16)),
            (16, true, payload(16, 16)),
            (32, false, payload(32, 8)),
        ];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut pool = ReassemblyPool::new(4, 15000);
            let mut done = None;
            for i in order {
                let (offset, more, data) = &frags[i];
                done = pool
                    .add(key(7), IpNumber::UDP, *offset, *more, data)
                    .unwrap();
            }
            assert_eq!(done.unwrap().payload, payload(0, 40), "order {order:?}");
        }
    }

    #[test]
    fn overlap_discards_block() {
        let mut pool = ReassemblyPool::new(4, 15000);
        pool.add(key(1), IpNumber::UDP, 0, true, &payload(0, 16))
            .unwrap();
        assert_eq!(
            pool.add(key(1), IpNumber::UDP, 8, true, &payload(8, 16))
                .unwrap_err(),
            ReassError::Overlap
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn conflicting_end_discards_block() {
        let mut pool = ReassemblyPool::new(4, 15000);
        pool.add(key(1), IpNumber::UDP, 32, false, &payload(32, 8))
            .unwrap();
        // data beyond the known end
        assert_eq!(
            pool.add(key(1), IpNumber::UDP, 48, true, &payload(48, 16))
                .unwrap_err(),
            ReassError::BadLength
        );
    }

    #[test]
    fn oversize_rejected() {
        let mut pool = ReassemblyPool::new(4, 15000);
        assert_eq!(
            pool.add(key(1), IpNumber::UDP, 0xffff - 4, true, &payload(0, 16))
                .unwrap_err(),
            ReassError::BadLength
        );
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool = ReassemblyPool::new(1, 15000);
        pool.add(key(1), IpNumber::UDP, 0, true, &payload(0, 16))
            .unwrap();
        assert_eq!(
            pool.add(key(2), IpNumber::UDP, 0, true, &payload(0, 16))
                .unwrap_err(),
            ReassError::PoolExhausted
        );
        // the existing block is unaffected
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn expiry_emits_no_stale_data() {
        let mut pool = ReassemblyPool::new(4, 1000);
        pool.add(key(1), IpNumber::UDP, 0, true, &payload(0, 16))
            .unwrap();
        let expired = pool.tick(1000);
        assert_eq!(expired, alloc::vec![(key(1), true)]);
        assert!(pool.is_empty());
        // late fragment starts a new block rather than completing the
        // old one
        let result = pool
            .add(key(1), IpNumber::UDP, 16, false, &payload(16, 8))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn separate_keys_do_not_mix() {
        let mut pool = ReassemblyPool::new(4, 15000);
        pool.add(key(1), IpNumber::UDP, 0, true, &payload(0, 16))
            .unwrap();
        pool.add(key(2), IpNumber::TCP, 0, true, &payload(100, 16))
            .unwrap();
        let done = pool
            .add(key(2), IpNumber::TCP, 16, false, &payload(116, 8))
            .unwrap()
            .unwrap();
        assert_eq!(done.protocol, IpNumber::TCP);
        assert_eq!(&done.payload[..16], &payload(100, 16)[..]);
        assert_eq!(pool.len(), 1);
    }
}
