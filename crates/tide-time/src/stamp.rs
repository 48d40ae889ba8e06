// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timezone-qualified instants.

use crate::TimeError;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};

/// A timezone-qualified instant.
///
/// Equality, ordering and hashing are on the absolute instant: `09:00+01:00`
/// and `08:00Z` are the same `Timestamp`.  The original offset is preserved
/// for display and serialisation, so round-tripping through an engine keeps
/// the timezone identity of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<FixedOffset>);

impl Timestamp {
    /// Wrap an already offset-qualified instant.
    pub fn new(instant: DateTime<FixedOffset>) -> Self {
        Self(instant)
    }

    /// Construct from a UTC instant.
    pub fn from_utc(instant: DateTime<Utc>) -> Self {
        Self(instant.fixed_offset())
    }

    /// Parse an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::MissingTimezone`] when the input parses as a
    /// date-time but carries no UTC offset.
    pub fn parse(value: &str) -> Result<Self, TimeError> {
        DateTime::parse_from_rfc3339(value)
            .map(Self)
            .map_err(|_| TimeError::MissingTimezone {
                value: value.to_string(),
            })
    }

    /// The underlying offset-qualified instant.
    pub fn instant(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// The instant converted to UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        self.0.with_timezone(&Utc)
    }

    /// The smallest representable instant strictly after this one (1 ns).
    ///
    /// Used to report stored coverage as a half-open range: a series whose
    /// last index is `t` covers `[first, t.next_instant())`.
    pub fn next_instant(&self) -> Self {
        Self(self.0 + TimeDelta::nanoseconds(1))
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash the absolute instant so equal instants with different
        // offsets collide, matching Eq.
        let utc = self.to_utc();
        utc.timestamp().hash(state);
        utc.timestamp_subsec_nanos().hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::from_utc(instant)
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(instant: DateTime<FixedOffset>) -> Self {
        Self::new(instant)
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn add(self, delta: TimeDelta) -> Timestamp {
        Timestamp(self.0 + delta)
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn sub(self, delta: TimeDelta) -> Timestamp {
        Timestamp(self.0 - delta)
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = TimeDelta;

    fn sub(self, other: Timestamp) -> TimeDelta {
        self.0 - other.0
    }
}
