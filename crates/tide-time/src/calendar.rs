// SPDX-License-Identifier: MIT OR Apache-2.0
//! Calendars: ordered event sequences consumed by completion checkers.
//!
//! The framework is agnostic to how calendars are built; it only needs the
//! two queries on [`Calendar`].  Two stock implementations cover the common
//! cadences: fixed-period intervals and business days at a time-of-day.

use crate::{TimeError, TimeRange, Timestamp};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, TimeZone, Weekday};
use std::collections::BTreeSet;
use std::fmt;

/// Upper bound on how far [`WeekdayCalendar::last_on_or_before`] scans
/// backward before concluding there is no event (10 years of days).
const MAX_BACKWARD_SCAN_DAYS: u32 = 3_660;

/// An ordered sequence of expected instants.
pub trait Calendar: fmt::Debug + Send + Sync {
    /// All events within `range`, in ascending order.
    fn events_in(&self, range: &TimeRange) -> Vec<Timestamp>;

    /// The largest event `≤ t`, or `None` when no event precedes `t`.
    fn last_on_or_before(&self, t: Timestamp) -> Option<Timestamp>;
}

// ---------------------------------------------------------------------------
// IntervalCalendar
// ---------------------------------------------------------------------------

/// Events every `period`, anchored at `anchor`, unbounded in both
/// directions.
#[derive(Debug, Clone)]
pub struct IntervalCalendar {
    anchor: Timestamp,
    period: TimeDelta,
}

impl IntervalCalendar {
    /// Construct from an anchor event and a strictly positive period.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::NonPositivePeriod`] for a zero or negative
    /// period.
    pub fn new(anchor: Timestamp, period: TimeDelta) -> Result<Self, TimeError> {
        if period <= TimeDelta::zero() {
            return Err(TimeError::NonPositivePeriod);
        }
        Ok(Self { anchor, period })
    }

    fn period_nanos(&self) -> i64 {
        // Constructor bounds the period to a positive, sub-overflow value.
        self.period.num_nanoseconds().unwrap_or(i64::MAX)
    }
}

impl Calendar for IntervalCalendar {
    fn events_in(&self, range: &TimeRange) -> Vec<Timestamp> {
        if range.is_empty() {
            return Vec::new();
        }
        let mut current = match self.last_on_or_before(range.start()) {
            Some(event) if event >= range.start() => event,
            Some(event) => event + self.period,
            None => self.anchor,
        };
        let mut events = Vec::new();
        while current < range.end() {
            if current >= range.start() {
                events.push(current);
            }
            current = current + self.period;
        }
        events
    }

    fn last_on_or_before(&self, t: Timestamp) -> Option<Timestamp> {
        let diff = (t - self.anchor).num_nanoseconds()?;
        let k = diff.div_euclid(self.period_nanos());
        Some(self.anchor + TimeDelta::nanoseconds(k.checked_mul(self.period_nanos())?))
    }
}

// ---------------------------------------------------------------------------
// WeekdayCalendar
// ---------------------------------------------------------------------------

/// One event per business day (Monday–Friday, minus holidays) at a fixed
/// local time-of-day in a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct WeekdayCalendar {
    at: NaiveTime,
    offset: FixedOffset,
    holidays: BTreeSet<NaiveDate>,
}

impl WeekdayCalendar {
    /// Business days at `at` local time in `offset`, with no holidays.
    pub fn new(at: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            at,
            offset,
            holidays: BTreeSet::new(),
        }
    }

    /// Replace the holiday set.
    #[must_use]
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = holidays.into_iter().collect();
        self
    }

    fn event_on(&self, date: NaiveDate) -> Option<Timestamp> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return None;
        }
        if self.holidays.contains(&date) {
            return None;
        }
        let local = self
            .offset
            .from_local_datetime(&date.and_time(self.at))
            .single()
            .expect("fixed-offset local mapping is total");
        Some(Timestamp::new(local))
    }
}

impl Calendar for WeekdayCalendar {
    fn events_in(&self, range: &TimeRange) -> Vec<Timestamp> {
        if range.is_empty() {
            return Vec::new();
        }
        // One day of slack either side covers offset skew between the
        // range's offsets and the calendar's.
        let mut date = range
            .start()
            .instant()
            .with_timezone(&self.offset)
            .date_naive()
            .pred_opt()
            .unwrap_or(NaiveDate::MIN);
        let last = range
            .end()
            .instant()
            .with_timezone(&self.offset)
            .date_naive()
            .succ_opt()
            .unwrap_or(NaiveDate::MAX);

        let mut events = Vec::new();
        while date <= last {
            if let Some(event) = self.event_on(date) {
                if range.contains(event) {
                    events.push(event);
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        events
    }

    fn last_on_or_before(&self, t: Timestamp) -> Option<Timestamp> {
        let mut date = t.instant().with_timezone(&self.offset).date_naive();
        for _ in 0..MAX_BACKWARD_SCAN_DAYS {
            if let Some(event) = self.event_on(date) {
                if event <= t {
                    return Some(event);
                }
            }
            date = date.pred_opt()?;
        }
        None
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

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn hourly() -> IntervalCalendar {
        IntervalCalendar::new(ts("2020-01-01T00:00:00Z"), TimeDelta::hours(1)).unwrap()
    }

    #[test]
    fn interval_rejects_non_positive_period() {
        let anchor = ts("2020-01-01T00:00:00Z");
        assert!(IntervalCalendar::new(anchor, TimeDelta::zero()).is_err());
        assert!(IntervalCalendar::new(anchor, TimeDelta::hours(-1)).is_err());
    }

    #[test]
    fn interval_events_in_window() {
        let events = hourly().events_in(&range("2020-01-01T10:30:00Z", "2020-01-01T13:30:00Z"));
        assert_eq!(
            events,
            vec![
                ts("2020-01-01T11:00:00Z"),
                ts("2020-01-01T12:00:00Z"),
                ts("2020-01-01T13:00:00Z"),
            ]
        );
    }

    #[test]
    fn interval_events_include_half_open_bounds() {
        let events = hourly().events_in(&range("2020-01-01T11:00:00Z", "2020-01-01T12:00:00Z"));
        assert_eq!(events, vec![ts("2020-01-01T11:00:00Z")]);
    }

    #[test]
    fn interval_last_on_or_before() {
        let cal = hourly();
        assert_eq!(
            cal.last_on_or_before(ts("2020-01-01T11:59:00Z")),
            Some(ts("2020-01-01T11:00:00Z"))
        );
        assert_eq!(
            cal.last_on_or_before(ts("2020-01-01T11:00:00Z")),
            Some(ts("2020-01-01T11:00:00Z"))
        );
        // Before the anchor the grid keeps extending backward.
        assert_eq!(
            cal.last_on_or_before(ts("2019-12-31T23:30:00Z")),
            Some(ts("2019-12-31T23:00:00Z"))
        );
    }

    #[test]
    fn weekday_skips_weekends() {
        let cal = WeekdayCalendar::new(NaiveTime::from_hms_opt(16, 30, 0).unwrap(), utc());
        // 2019-12-21 is a Saturday.
        assert_eq!(
            cal.last_on_or_before(ts("2019-12-22T12:00:00Z")),
            Some(ts("2019-12-20T16:30:00Z"))
        );
    }

    #[test]
    fn weekday_skips_holidays() {
        let cal = WeekdayCalendar::new(NaiveTime::from_hms_opt(16, 30, 0).unwrap(), utc())
            .with_holidays([NaiveDate::from_ymd_opt(2019, 12, 25).unwrap()]);
        let events = cal.events_in(&range("2019-12-23T00:00:00Z", "2019-12-27T00:00:00Z"));
        assert_eq!(
            events,
            vec![
                ts("2019-12-23T16:30:00Z"),
                ts("2019-12-24T16:30:00Z"),
                ts("2019-12-26T16:30:00Z"),
            ]
        );
    }

    #[test]
    fn weekday_same_day_before_event_time_rolls_back() {
        let cal = WeekdayCalendar::new(NaiveTime::from_hms_opt(16, 30, 0).unwrap(), utc());
        // Monday 2019-12-23 at noon: today's event has not happened yet.
        assert_eq!(
            cal.last_on_or_before(ts("2019-12-23T12:00:00Z")),
            Some(ts("2019-12-20T16:30:00Z"))
        );
    }

    #[test]
    fn weekday_respects_offset() {
        let ny = FixedOffset::west_opt(5 * 3600).unwrap();
        let cal = WeekdayCalendar::new(NaiveTime::from_hms_opt(16, 30, 0).unwrap(), ny);
        let event = cal.last_on_or_before(ts("2020-01-07T00:00:00Z")).unwrap();
        // Monday 2020-01-06 16:30 New York is 21:30 UTC.
        assert_eq!(event, ts("2020-01-06T21:30:00Z"));
    }
}
