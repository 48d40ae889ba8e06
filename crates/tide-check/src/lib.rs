// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-check
//!
//! Completion policies: given a target range and the coverage of whatever
//! is already persisted, decide whether the output is up to date.
//!
//! A checker only ever inspects the *end* of the existing coverage.
//! Backward-expanding inputs (earlier rows appearing later) are not
//! detected here; that is a documented limitation of the completion
//! protocol, and the opt-in front-edge assertion lives with the runner.
//!
//! Timestamps in this crate are offset-qualified by construction, so the
//! classic "naive timestamp" completion failure is unrepresentable; what
//! remains fatal is asking a calendar checker about a range no calendar
//! event precedes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::TimeDelta;
use std::fmt;
use std::sync::Arc;
use tide_error::ErrorCode;
use tide_time::{Calendar, TimeRange, Timestamp};

/// Errors from completion evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The calendar has no event at or before the target end, so no
    /// expectation can be formed.
    #[error("calendar has no event at or before {end}")]
    NoCalendarEvent {
        /// Exclusive end of the target range.
        end: Timestamp,
    },

    /// A composite checker needs at least one child.
    #[error("composite checker requires at least one child")]
    EmptyComposite,

    /// Tolerance must be non-negative.
    #[error("tolerance must be non-negative")]
    NegativeTolerance,
}

impl CheckError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::CompletionFailed
    }
}

/// Policy deciding whether persisted coverage satisfies a target range.
///
/// `existing` is the half-open coverage of the persisted index (`None`
/// when nothing is stored).  An empty existing coverage never satisfies a
/// non-empty target; an empty target is trivially complete.
pub trait CompletionChecker: fmt::Debug + Send + Sync {
    /// Is the persisted coverage up to date for `target`?
    fn is_complete(
        &self,
        target: &TimeRange,
        existing: Option<&TimeRange>,
    ) -> Result<bool, CheckError>;

    /// The instant data is expected to reach for `target`, when the policy
    /// has one (`None` for data-driven cadences).
    fn expected_last(&self, target: &TimeRange) -> Result<Option<Timestamp>, CheckError>;
}

/// Shared checker handle.
pub type SharedChecker = Arc<dyn CompletionChecker>;

// ---------------------------------------------------------------------------
// CalendarChecker
// ---------------------------------------------------------------------------

/// Expects data through the last calendar event at or before the target
/// end, within an optional tolerance.
#[derive(Clone)]
pub struct CalendarChecker {
    calendar: Arc<dyn Calendar>,
    tolerance: TimeDelta,
}

impl CalendarChecker {
    /// A checker with zero tolerance.
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self {
            calendar,
            tolerance: TimeDelta::zero(),
        }
    }

    /// Accept coverage that falls short of the expectation by up to
    /// `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::NegativeTolerance`] for a negative delta.
    pub fn with_tolerance(mut self, tolerance: TimeDelta) -> Result<Self, CheckError> {
        if tolerance < TimeDelta::zero() {
            return Err(CheckError::NegativeTolerance);
        }
        self.tolerance = tolerance;
        Ok(self)
    }
}

impl fmt::Debug for CalendarChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarChecker")
            .field("calendar", &self.calendar)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl CompletionChecker for CalendarChecker {
    fn is_complete(
        &self,
        target: &TimeRange,
        existing: Option<&TimeRange>,
    ) -> Result<bool, CheckError> {
        if target.is_empty() {
            return Ok(true);
        }
        let Some(expected) = self.expected_last(target)? else {
            return Ok(false);
        };
        let Some(existing) = existing.filter(|e| !e.is_empty()) else {
            return Ok(false);
        };
        // Coverage is half-open: `end > expected` means the last stored
        // index is at or past the expectation.
        Ok(existing.end() > expected - self.tolerance)
    }

    fn expected_last(&self, target: &TimeRange) -> Result<Option<Timestamp>, CheckError> {
        match self.calendar.last_on_or_before(target.end()) {
            Some(event) => Ok(Some(event)),
            None => Err(CheckError::NoCalendarEvent { end: target.end() }),
        }
    }
}

// ---------------------------------------------------------------------------
// IrregularChecker
// ---------------------------------------------------------------------------

/// No expectation of a specific instant: complete as soon as any stored
/// data overlaps the target.  Used for outputs whose cadence is
/// data-driven.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrregularChecker;

impl CompletionChecker for IrregularChecker {
    fn is_complete(
        &self,
        target: &TimeRange,
        existing: Option<&TimeRange>,
    ) -> Result<bool, CheckError> {
        if target.is_empty() {
            return Ok(true);
        }
        Ok(existing.is_some_and(|e| e.overlaps(target)))
    }

    fn expected_last(&self, _target: &TimeRange) -> Result<Option<Timestamp>, CheckError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// CompositeChecker
// ---------------------------------------------------------------------------

/// How a composite combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// All children must be complete; the effective expectation is the
    /// earliest of the children's.
    Strictest,
    /// Any complete child suffices; the effective expectation is the
    /// latest of the children's.
    Laxest,
}

/// Combines child checkers under a [`Strategy`].
///
/// This is what checker inheritance produces when a task inherits
/// frequency from more than one dependency.
#[derive(Debug, Clone)]
pub struct CompositeChecker {
    strategy: Strategy,
    children: Vec<SharedChecker>,
}

impl CompositeChecker {
    /// Combine `children` under `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::EmptyComposite`] for an empty child list.
    pub fn new(strategy: Strategy, children: Vec<SharedChecker>) -> Result<Self, CheckError> {
        if children.is_empty() {
            return Err(CheckError::EmptyComposite);
        }
        Ok(Self { strategy, children })
    }

    /// The combination strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl CompletionChecker for CompositeChecker {
    fn is_complete(
        &self,
        target: &TimeRange,
        existing: Option<&TimeRange>,
    ) -> Result<bool, CheckError> {
        if target.is_empty() {
            return Ok(true);
        }
        match self.strategy {
            Strategy::Strictest => {
                for child in &self.children {
                    if !child.is_complete(target, existing)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Strategy::Laxest => {
                for child in &self.children {
                    if child.is_complete(target, existing)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn expected_last(&self, target: &TimeRange) -> Result<Option<Timestamp>, CheckError> {
        let mut effective: Option<Timestamp> = None;
        for child in &self.children {
            let Some(expected) = child.expected_last(target)? else {
                continue;
            };
            effective = Some(match (self.strategy, effective) {
                (_, None) => expected,
                (Strategy::Strictest, Some(e)) => e.min(expected),
                (Strategy::Laxest, Some(e)) => e.max(expected),
            });
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tide_time::IntervalCalendar;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(ts(start), ts(end)).unwrap()
    }

    /// Daily events at the given UTC hour.
    fn daily_at(hour: i64) -> Arc<dyn Calendar> {
        Arc::new(
            IntervalCalendar::new(
                ts("2020-01-01T00:00:00Z") + TimeDelta::hours(hour),
                TimeDelta::days(1),
            )
            .unwrap(),
        )
    }

    /// Coverage whose last stored index is `last` (half-open end).
    fn coverage(first: &str, last: &str) -> TimeRange {
        TimeRange::new(ts(first), ts(last).next_instant()).unwrap()
    }

    #[test]
    fn calendar_checker_requires_expected_instant() {
        let checker = CalendarChecker::new(daily_at(16));
        let target = range("2020-03-01T00:00:00Z", "2020-03-04T00:00:00Z");

        // Last expected event is 2020-03-03T16:00Z.
        assert_eq!(
            checker.expected_last(&target).unwrap(),
            Some(ts("2020-03-03T16:00:00Z"))
        );

        let short = coverage("2020-03-01T16:00:00Z", "2020-03-02T16:00:00Z");
        assert!(!checker.is_complete(&target, Some(&short)).unwrap());

        let full = coverage("2020-03-01T16:00:00Z", "2020-03-03T16:00:00Z");
        assert!(checker.is_complete(&target, Some(&full)).unwrap());

        // Data past the expectation still counts.
        let over = coverage("2020-03-01T16:00:00Z", "2020-03-03T18:00:00Z");
        assert!(checker.is_complete(&target, Some(&over)).unwrap());
    }

    #[test]
    fn calendar_checker_never_succeeds_on_empty_existing() {
        let checker = CalendarChecker::new(daily_at(16));
        let target = range("2020-03-01T00:00:00Z", "2020-03-04T00:00:00Z");
        assert!(!checker.is_complete(&target, None).unwrap());
        let empty = TimeRange::empty(ts("2020-03-02T00:00:00Z"));
        assert!(!checker.is_complete(&target, Some(&empty)).unwrap());
    }

    #[test]
    fn empty_target_is_trivially_complete() {
        let checker = CalendarChecker::new(daily_at(16));
        let target = TimeRange::empty(ts("2020-03-01T00:00:00Z"));
        assert!(checker.is_complete(&target, None).unwrap());
        assert!(IrregularChecker.is_complete(&target, None).unwrap());
    }

    #[test]
    fn tolerance_loosens_the_expectation() {
        let checker = CalendarChecker::new(daily_at(16))
            .with_tolerance(TimeDelta::hours(2))
            .unwrap();
        let target = range("2020-03-01T00:00:00Z", "2020-03-04T00:00:00Z");
        // Expected 2020-03-03T16:00Z; data stops two hours earlier.
        let close = coverage("2020-03-01T16:00:00Z", "2020-03-03T14:30:00Z");
        assert!(checker.is_complete(&target, Some(&close)).unwrap());
        let far = coverage("2020-03-01T16:00:00Z", "2020-03-03T13:00:00Z");
        assert!(!checker.is_complete(&target, Some(&far)).unwrap());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let result = CalendarChecker::new(daily_at(16)).with_tolerance(TimeDelta::hours(-1));
        assert_eq!(result.unwrap_err(), CheckError::NegativeTolerance);
    }

    #[test]
    fn irregular_checker_wants_any_overlap() {
        let target = range("2020-03-01T00:00:00Z", "2020-03-04T00:00:00Z");
        assert!(!IrregularChecker.is_complete(&target, None).unwrap());

        let before = coverage("2020-02-01T00:00:00Z", "2020-02-28T00:00:00Z");
        assert!(!IrregularChecker.is_complete(&target, Some(&before)).unwrap());

        let touching = coverage("2020-02-01T00:00:00Z", "2020-03-01T00:00:00Z");
        assert!(IrregularChecker.is_complete(&target, Some(&touching)).unwrap());
    }

    #[test]
    fn strictest_composite_needs_all_children() {
        let fifteen = CalendarChecker::new(daily_at(15));
        let seventeen = CalendarChecker::new(daily_at(17));
        let composite = CompositeChecker::new(
            Strategy::Strictest,
            vec![Arc::new(fifteen) as SharedChecker, Arc::new(seventeen)],
        )
        .unwrap();
        let target = range("2020-03-01T00:00:00Z", "2020-03-03T18:00:00Z");

        // Children expect 15:00 and 17:00 on 2020-03-03; strictest takes
        // the earlier one.
        assert_eq!(
            composite.expected_last(&target).unwrap(),
            Some(ts("2020-03-03T15:00:00Z"))
        );

        let through_fifteen = coverage("2020-03-01T15:00:00Z", "2020-03-03T15:00:00Z");
        assert!(!composite.is_complete(&target, Some(&through_fifteen)).unwrap());

        let through_seventeen = coverage("2020-03-01T15:00:00Z", "2020-03-03T17:00:00Z");
        assert!(composite.is_complete(&target, Some(&through_seventeen)).unwrap());
    }

    #[test]
    fn laxest_composite_accepts_any_child() {
        let fifteen = CalendarChecker::new(daily_at(15));
        let seventeen = CalendarChecker::new(daily_at(17));
        let composite = CompositeChecker::new(
            Strategy::Laxest,
            vec![Arc::new(fifteen) as SharedChecker, Arc::new(seventeen)],
        )
        .unwrap();
        let target = range("2020-03-01T00:00:00Z", "2020-03-03T18:00:00Z");

        assert_eq!(
            composite.expected_last(&target).unwrap(),
            Some(ts("2020-03-03T17:00:00Z"))
        );

        let through_fifteen = coverage("2020-03-01T15:00:00Z", "2020-03-03T15:00:00Z");
        assert!(composite.is_complete(&target, Some(&through_fifteen)).unwrap());
    }

    #[test]
    fn composite_skips_children_without_expectations() {
        let composite = CompositeChecker::new(
            Strategy::Strictest,
            vec![
                Arc::new(IrregularChecker) as SharedChecker,
                Arc::new(CalendarChecker::new(daily_at(15))),
            ],
        )
        .unwrap();
        let target = range("2020-03-01T00:00:00Z", "2020-03-03T18:00:00Z");
        assert_eq!(
            composite.expected_last(&target).unwrap(),
            Some(ts("2020-03-03T15:00:00Z"))
        );
    }

    #[test]
    fn composite_rejects_empty_children() {
        assert_eq!(
            CompositeChecker::new(Strategy::Strictest, vec![]).unwrap_err(),
            CheckError::EmptyComposite
        );
    }
}
