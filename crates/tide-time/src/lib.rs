// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-time
//!
//! Timezone-qualified instants ([`Timestamp`]), half-open intervals
//! ([`TimeRange`]), and the small [`Calendar`] interface the completion
//! layer consumes.
//!
//! A [`Timestamp`] is always offset-qualified; an untimed instant is not
//! representable.  Naive inputs are rejected at the parse boundary with
//! [`TimeError::MissingTimezone`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Calendars: ordered event sequences consumed by completion checkers.
pub mod calendar;
mod range;
mod stamp;

pub use calendar::{Calendar, IntervalCalendar, WeekdayCalendar};
pub use range::TimeRange;
pub use stamp::Timestamp;

use tide_error::ErrorCode;

/// Errors from timestamp and range construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The input instant carried no UTC offset.
    #[error("timestamp `{value}` has no UTC offset")]
    MissingTimezone {
        /// The offending input, verbatim.
        value: String,
    },

    /// A range was constructed with `start > end`.
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange {
        /// Requested start.
        start: Timestamp,
        /// Requested end.
        end: Timestamp,
    },

    /// A calendar period must be strictly positive.
    #[error("calendar period must be strictly positive")]
    NonPositivePeriod,

    /// A lookback duration must be non-negative.
    #[error("lookback must be non-negative")]
    NegativeLookback,
}

impl TimeError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingTimezone { .. } => ErrorCode::MissingTimezone,
            Self::InvalidRange { .. } | Self::NonPositivePeriod | Self::NegativeLookback => {
                ErrorCode::InvalidRange
            }
        }
    }
}
