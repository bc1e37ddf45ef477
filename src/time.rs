//! Millisecond-resolution instants and half-open date ranges.
//!
//! The segment algebra and tree evaluation only ever need ordering and
//! arithmetic over a single `i64` axis; calendar arithmetic (leap years,
//! time zones, ...) is a concern for callers converting real dates into
//! [`Instant`], not for the core algorithms here.

use std::fmt;

use chrono::{DateTime, Utc};

/// A point in time, millisecond resolution, unanchored to any calendar.
///
/// `EPOCH` and `MAX` delimit the universe the engine reasons about: every
/// [`crate::DateRange`] lives inside `[EPOCH, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(i64);

impl Instant {
    /// The start of time as far as this engine is concerned.
    pub const EPOCH: Instant = Instant(0);
    /// The end of time as far as this engine is concerned.
    pub const MAX: Instant = Instant(i64::MAX);

    /// Build an `Instant` from raw epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Instant(millis)
    }

    /// Raw epoch milliseconds.
    pub const fn millis(self) -> i64 {
        self.0
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(dt: DateTime<Utc>) -> Self {
        Instant(dt.timestamp_millis())
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Instant::MAX {
            write!(f, "MAX")
        } else if *self == Instant::EPOCH {
            write!(f, "EPOCH")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

/// A half-open interval `[start, finish)` over [`Instant`].
///
/// Half-open throughout: two ranges that share an endpoint (`a.finish ==
/// b.start`) are adjacent, not overlapping, which keeps segment slicing
/// free of off-by-one boundary cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: Instant,
    pub finish: Instant,
}

impl DateRange {
    /// The full universe, `[EPOCH, MAX)`.
    pub const UNBOUNDED: DateRange = DateRange { start: Instant::EPOCH, finish: Instant::MAX };

    /// Construct a range, requiring `start < finish`.
    pub fn new(start: Instant, finish: Instant) -> Result<Self, crate::Error> {
        if start >= finish {
            return Err(crate::Error::InvalidArgument {
                reason: format!("non-chronological range: start {start} >= finish {finish}"),
            });
        }
        Ok(DateRange { start, finish })
    }

    /// True if `instant` falls inside `[start, finish)`.
    pub fn contains_instant(&self, instant: Instant) -> bool {
        self.start <= instant && instant < self.finish
    }

    /// True if either endpoint of `other` falls strictly inside `self`, per
    /// the "slice-in-segment" predicate of  step 5:
    /// `seg.start <= s.start < seg.end` OR `seg.start < s.end <= seg.end`.
    pub fn contains_endpoint_of(&self, other: &DateRange) -> bool {
        (self.start <= other.start && other.start < self.finish) || (self.start < other.finish && other.finish <= self.finish)
    }

    /// True if `self` and `other` touch end-to-end with no gap and no
    /// overlap (`self.finish == other.start` or `other.finish == self.start`).
    pub fn touches(&self, other: &DateRange) -> bool {
        self.finish == other.start || other.finish == self.start
    }

    /// True if `self` and `other` share any instant.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.finish && other.start < self.finish
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.finish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_chronological_range() {
        assert!(DateRange::new(Instant::from_millis(10), Instant::from_millis(10)).is_err());
        assert!(DateRange::new(Instant::from_millis(10), Instant::from_millis(5)).is_err());
    }

    #[test]
    fn contains_instant_is_half_open() {
        let r = DateRange::new(Instant::from_millis(0), Instant::from_millis(10)).unwrap();
        assert!(r.contains_instant(Instant::from_millis(0)));
        assert!(r.contains_instant(Instant::from_millis(9)));
        assert!(!r.contains_instant(Instant::from_millis(10)));
    }

    #[test]
    fn touches_detects_adjacency_not_overlap() {
        let a = DateRange::new(Instant::from_millis(0), Instant::from_millis(10)).unwrap();
        let b = DateRange::new(Instant::from_millis(10), Instant::from_millis(20)).unwrap();
        assert!(a.touches(&b));
        assert!(!a.overlaps(&b));
    }
}
