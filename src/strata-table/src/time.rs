use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// A point in time, in nanoseconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Time(pub i64);

/// A signed span of time, in nanoseconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Duration(pub i64);

impl Time {
    pub const MIN: Self = Self(i64::MIN);
    pub const MAX: Self = Self(i64::MAX);

    pub fn nanos(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.0))
    }

    #[must_use]
    pub fn sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.0))
    }

    /// Rounds down to a multiple of `every`; non-positive spans leave the time unchanged.
    #[must_use]
    pub fn truncate(self, every: Duration) -> Self {
        if every.0 <= 0 {
            return self;
        }
        Self(self.0 - self.0.rem_euclid(every.0))
    }
}

impl Duration {
    pub const ZERO: Self = Self(0);

    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub fn nanos(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}ns", self.0)
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}ns", self.0)
    }
}

/// Half-open time range `[start, stop)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub start: Time,
    pub stop: Time,
}

impl Bounds {
    pub fn new(start: Time, stop: Time) -> Self {
        Self { start, stop }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    pub fn contains(&self, t: Time) -> bool {
        self.start <= t && t < self.stop
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
        }
    }
}

impl Display for Bounds {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}
