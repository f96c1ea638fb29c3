//! Millisecond time-keeping for the core.
//!
//! The core never reads a system clock: the embedder advances time by
//! passing `now` into `Stack::poll`. This keeps the protocol machines
//! deterministic and testable.

mod timer_queue;
pub use timer_queue::*;

/// A point in time, in milliseconds since an arbitrary epoch chosen by
/// the embedder.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instant {
    millis: u64,
}

impl Instant {
    /// The zero instant (epoch).
    pub const ZERO: Instant = Instant { millis: 0 };

    /// Instant at the given milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(millis: u64) -> Instant {
        Instant { millis }
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.millis
    }

    /// Time elapsed since `earlier` (saturating at zero).
    #[inline]
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Instant;
    #[inline]
    fn add(self, duration: Duration) -> Instant {
        Instant {
            millis: self.millis + duration.millis,
        }
    }
}

impl core::ops::Sub<Instant> for Instant {
    type Output = Duration;
    #[inline]
    fn sub(self, earlier: Instant) -> Duration {
        self.duration_since(earlier)
    }
}

impl core::fmt::Display for Instant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

/// A span of time in milliseconds.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0 };

    #[inline]
    pub const fn from_millis(millis: u64) -> Duration {
        Duration { millis }
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Duration {
        Duration {
            millis: secs * 1000,
        }
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.millis
    }
}

impl core::ops::Add for Duration {
    type Output = Duration;
    #[inline]
    fn add(self, other: Duration) -> Duration {
        Duration {
            millis: self.millis + other.millis,
        }
    }
}

impl core::ops::Mul<u32> for Duration {
    type Output = Duration;
    #[inline]
    fn mul(self, times: u32) -> Duration {
        Duration {
            millis: self.millis * u64::from(times),
        }
    }
}

impl core::fmt::Display for Duration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}
