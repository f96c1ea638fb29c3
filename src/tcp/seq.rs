/// A TCP sequence number: a point in the 32 bit cyclic sequence space.
///
/// All comparisons are modular: `a < b` iff `(a - b) mod 2^32 >= 2^31`.
/// Plain `Ord` is deliberately not implemented.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// Advance by `n` (wrapping).
    #[inline]
    pub fn add(self, n: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(n))
    }

    /// Go back by `n` (wrapping).
    #[inline]
    pub fn sub(self, n: u32) -> SeqNum {
        SeqNum(self.0.wrapping_sub(n))
    }

    /// Signed distance from `other` to `self` (how far `self` is ahead).
    #[inline]
    pub fn diff(self, other: SeqNum) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Cyclic less-than.
    #[inline]
    pub fn lt(self, other: SeqNum) -> bool {
        self.0.wrapping_sub(other.0) >= 0x8000_0000
    }

    /// Cyclic less-or-equal.
    #[inline]
    pub fn le(self, other: SeqNum) -> bool {
        self == other || self.lt(other)
    }

    /// Cyclic greater-than.
    #[inline]
    pub fn gt(self, other: SeqNum) -> bool {
        other.lt(self)
    }

    /// Cyclic greater-or-equal.
    #[inline]
    pub fn ge(self, other: SeqNum) -> bool {
        other.le(self)
    }

    /// True if `self` lies in the half-open window `[start, start+len)`.
    #[inline]
    pub fn in_window(self, start: SeqNum, len: u32) -> bool {
        len > 0 && start.le(self) && self.lt(start.add(len))
    }
}

impl core::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        assert!(SeqNum(1).lt(SeqNum(2)));
        assert!(SeqNum(2).gt(SeqNum(1)));
        assert!(SeqNum(5).le(SeqNum(5)));
        assert!(SeqNum(5).ge(SeqNum(5)));
        assert_eq!(false, SeqNum(2).lt(SeqNum(1)));
    }

    #[test]
    fn ordering_across_wrap() {
        let near_max = SeqNum(0xffff_fff0);
        let wrapped = near_max.add(0x100);
        assert!(near_max.lt(wrapped));
        assert!(wrapped.gt(near_max));
        assert_eq!(wrapped, SeqNum(0xf0));
    }

    #[test]
    fn diff() {
        assert_eq!(SeqNum(10).diff(SeqNum(4)), 6);
        assert_eq!(SeqNum(4).diff(SeqNum(10)), -6);
        assert_eq!(SeqNum(5).diff(SeqNum(0xffff_fffb)), 10);
    }

    #[test]
    fn window_membership() {
        let start = SeqNum(1000);
        assert!(SeqNum(1000).in_window(start, 100));
        assert!(SeqNum(1099).in_window(start, 100));
        assert_eq!(false, SeqNum(1100).in_window(start, 100));
        assert_eq!(false, SeqNum(999).in_window(start, 100));
        // empty window contains nothing
        assert_eq!(false, SeqNum(1000).in_window(start, 0));
        // wrap-around window
        let start = SeqNum(0xffff_ffa0);
        assert!(SeqNum(0x10).in_window(start, 0x100));
    }

    #[test]
    fn cyclic_lt_matches_definition() {
        // lt(a,b) := (a - b) mod 2^32 >= 2^31, over a sample grid
        for a in [0u32, 1, 0x7fff_ffff, 0x8000_0000, 0xffff_ffff] {
            for b in [0u32, 1, 0x7fff_ffff, 0x8000_0000, 0xffff_ffff] {
                let expected = a.wrapping_sub(b) >= 0x8000_0000;
                assert_eq!(SeqNum(a).lt(SeqNum(b)), expected, "a={a} b={b}");
            }
        }
    }
}
