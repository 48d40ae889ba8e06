// SPDX-License-Identifier: MIT OR Apache-2.0
//! Half-open time intervals.

use crate::{TimeError, Timestamp};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open interval `[start, end)` of [`Timestamp`]s with `start ≤ end`.
///
/// An empty range (`start == end`) is valid and contains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: Timestamp,
    end: Timestamp,
}

impl TimeRange {
    /// Construct a range, validating `start ≤ end`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidRange`] when `start > end`.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, TimeError> {
        if start > end {
            return Err(TimeError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The empty range anchored at `at`.
    pub fn empty(at: Timestamp) -> Self {
        Self { start: at, end: at }
    }

    /// Inclusive start of the interval.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive end of the interval.
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Returns `true` when the range contains no instants.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns `true` when `t` lies within `[start, end)`.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns `true` when `other` lies entirely within this range.
    ///
    /// The empty range is contained in everything anchored inside it.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns `true` when the two ranges share at least one instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two ranges, or `None` when they are disjoint.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Remove the prefix of this range covered by `covered`.
    ///
    /// When `covered` starts at or before this range and reaches into it,
    /// the result is `[covered.end, end)`.  When `covered` starts after
    /// this range's start it is not a prefix and the range is returned
    /// unchanged; when `covered` swallows the whole range, the result is
    /// empty.
    pub fn strip_prefix(&self, covered: &TimeRange) -> TimeRange {
        if covered.start > self.start {
            return *self;
        }
        let start = covered.end.max(self.start).min(self.end);
        Self {
            start,
            end: self.end,
        }
    }

    /// Shift the start backward by `lookback`, leaving the end in place.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::NegativeLookback`] for a negative delta.
    pub fn extend_back(&self, lookback: TimeDelta) -> Result<TimeRange, TimeError> {
        if lookback < TimeDelta::zero() {
            return Err(TimeError::NegativeLookback);
        }
        Ok(Self {
            start: self.start - lookback,
            end: self.end,
        })
    }

    /// Total span of the interval.
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(ts(start), ts(end)).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = TimeRange::new(ts("2020-01-02T00:00:00Z"), ts("2020-01-01T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, TimeError::InvalidRange { .. }));
    }

    #[test]
    fn half_open_containment() {
        let r = range("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z");
        assert!(r.contains(ts("2020-01-01T00:00:00Z")));
        assert!(r.contains(ts("2020-01-01T23:59:59Z")));
        assert!(!r.contains(ts("2020-01-02T00:00:00Z")));
    }

    #[test]
    fn empty_range_contains_nothing() {
        let r = TimeRange::empty(ts("2020-01-01T00:00:00Z"));
        assert!(r.is_empty());
        assert!(!r.contains(ts("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn intersection_of_overlapping_ranges() {
        let a = range("2020-01-01T00:00:00Z", "2020-01-03T00:00:00Z");
        let b = range("2020-01-02T00:00:00Z", "2020-01-04T00:00:00Z");
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.start(), ts("2020-01-02T00:00:00Z"));
        assert_eq!(i.end(), ts("2020-01-03T00:00:00Z"));
    }

    #[test]
    fn intersection_of_disjoint_ranges_is_none() {
        let a = range("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z");
        let b = range("2020-01-03T00:00:00Z", "2020-01-04T00:00:00Z");
        assert!(a.intersect(&b).is_none());
        // Touching endpoints share no instant either.
        let c = range("2020-01-02T00:00:00Z", "2020-01-03T00:00:00Z");
        assert!(a.intersect(&c).is_none());
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn strip_prefix_leaves_tail() {
        let target = range("2020-01-01T00:00:00Z", "2020-01-10T00:00:00Z");
        let covered = range("2019-12-01T00:00:00Z", "2020-01-04T00:00:00Z");
        let missing = target.strip_prefix(&covered);
        assert_eq!(missing.start(), ts("2020-01-04T00:00:00Z"));
        assert_eq!(missing.end(), ts("2020-01-10T00:00:00Z"));
    }

    #[test]
    fn strip_prefix_ignores_non_prefix_coverage() {
        let target = range("2020-01-01T00:00:00Z", "2020-01-10T00:00:00Z");
        let middle = range("2020-01-04T00:00:00Z", "2020-01-06T00:00:00Z");
        assert_eq!(target.strip_prefix(&middle), target);
    }

    #[test]
    fn strip_prefix_of_full_coverage_is_empty() {
        let target = range("2020-01-01T00:00:00Z", "2020-01-10T00:00:00Z");
        let covered = range("2019-12-01T00:00:00Z", "2020-02-01T00:00:00Z");
        assert!(target.strip_prefix(&covered).is_empty());
    }

    #[test]
    fn extend_back_shifts_only_the_start() {
        let target = range("2020-02-01T00:00:00Z", "2020-02-05T00:00:00Z");
        let fetched = target.extend_back(TimeDelta::days(30)).unwrap();
        assert_eq!(fetched.start(), ts("2020-01-02T00:00:00Z"));
        assert_eq!(fetched.end(), ts("2020-02-05T00:00:00Z"));
    }

    #[test]
    fn extend_back_rejects_negative_lookback() {
        let target = range("2020-02-01T00:00:00Z", "2020-02-05T00:00:00Z");
        assert!(matches!(
            target.extend_back(TimeDelta::days(-1)),
            Err(TimeError::NegativeLookback)
        ));
    }

    #[test]
    fn zero_lookback_is_identity() {
        let target = range("2020-02-01T00:00:00Z", "2020-02-05T00:00:00Z");
        assert_eq!(target.extend_back(TimeDelta::zero()).unwrap(), target);
    }
}
