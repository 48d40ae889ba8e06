//! Unified error taxonomy with stable error codes for tidemark.
//!
//! Every error that crosses a node boundary carries an [`ErrorCode`] (a
//! machine-readable, stable string tag), a human-readable message, and
//! arbitrary key-value context.  Engines and runners map their typed errors
//! onto this taxonomy; retries and run reports are driven by the code, never
//! by message text.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Metadata construction and parameter canonicalisation errors.
    Metadata,
    /// Timestamp and time-range errors.
    Time,
    /// Completion-checker evaluation errors.
    Completion,
    /// Persistence-engine errors.
    Engine,
    /// Task execution errors.
    Task,
    /// Runner scheduling errors.
    Runner,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Metadata => "metadata",
            Self::Time => "time",
            Self::Completion => "completion",
            Self::Engine => "engine",
            Self::Task => "task",
            Self::Runner => "runner",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Metadata --
    /// Parameter value is not normalisable (NaN, infinite, or unhashable).
    InvalidParameter,

    // -- Time --
    /// A timestamp or range lacked a UTC offset.
    MissingTimezone,
    /// A range was constructed with `start > end`.
    InvalidRange,

    // -- Completion --
    /// The completion checker could not evaluate its inputs.
    CompletionFailed,

    // -- Engine --
    /// Read of an absent dataset.
    NotFound,
    /// Append whose smallest index is not strictly greater than the stored
    /// maximum.
    AppendOverlap,
    /// Concurrent writers raced on the same dataset.
    Conflict,
    /// Engine-reported transient condition; the caller may retry.
    Transient,

    // -- Task --
    /// A predecessor was not complete when the task needed its output.
    UpstreamIncomplete,
    /// The user function returned an error.
    UserFunctionFailed,

    // -- Runner --
    /// The task exceeded its wall-clock timeout.
    Timeout,
    /// The run was cancelled before this node was dispatched.
    Cancelled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidParameter => ErrorCategory::Metadata,

            Self::MissingTimezone | Self::InvalidRange => ErrorCategory::Time,

            Self::CompletionFailed => ErrorCategory::Completion,

            Self::NotFound | Self::AppendOverlap | Self::Conflict | Self::Transient => {
                ErrorCategory::Engine
            }

            Self::UpstreamIncomplete | Self::UserFunctionFailed => ErrorCategory::Task,

            Self::Timeout | Self::Cancelled => ErrorCategory::Runner,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"APPEND_OVERLAP"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::MissingTimezone => "MISSING_TIMEZONE",
            Self::InvalidRange => "INVALID_RANGE",
            Self::CompletionFailed => "COMPLETION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::AppendOverlap => "APPEND_OVERLAP",
            Self::Conflict => "CONFLICT",
            Self::Transient => "TRANSIENT",
            Self::UpstreamIncomplete => "UPSTREAM_INCOMPLETE",
            Self::UserFunctionFailed => "USER_FUNCTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns `true` if a caller is allowed to retry the failed operation.
    ///
    /// Only [`Transient`](Self::Transient) qualifies; every other code is
    /// either permanent or a scheduling outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorReport
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a failure, attributed to a single node.
///
/// This is the form errors take inside run reports: the typed error that
/// produced it stays within its crate, the report crosses boundaries.
///
/// # Builder usage
///
/// ```
/// use tide_error::{ErrorCode, ErrorReport};
///
/// let report = ErrorReport::new(ErrorCode::AppendOverlap, "index 42 <= stored max 42")
///     .with_context("dataset", "prices.close")
///     .with_context("attempted_rows", 3);
/// assert_eq!(report.code, ErrorCode::AppendOverlap);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ErrorReport {
    /// Create a new report with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// All error codes for exhaustive iteration in tests.
    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::InvalidParameter,
        ErrorCode::MissingTimezone,
        ErrorCode::InvalidRange,
        ErrorCode::CompletionFailed,
        ErrorCode::NotFound,
        ErrorCode::AppendOverlap,
        ErrorCode::Conflict,
        ErrorCode::Transient,
        ErrorCode::UpstreamIncomplete,
        ErrorCode::UserFunctionFailed,
        ErrorCode::Timeout,
        ErrorCode::Cancelled,
        ErrorCode::Internal,
    ];

    #[test]
    fn codes_categorised() {
        assert_eq!(ErrorCode::InvalidParameter.category(), ErrorCategory::Metadata);
        assert_eq!(ErrorCode::MissingTimezone.category(), ErrorCategory::Time);
        assert_eq!(ErrorCode::InvalidRange.category(), ErrorCategory::Time);
        assert_eq!(
            ErrorCode::CompletionFailed.category(),
            ErrorCategory::Completion
        );
        assert_eq!(ErrorCode::NotFound.category(), ErrorCategory::Engine);
        assert_eq!(ErrorCode::AppendOverlap.category(), ErrorCategory::Engine);
        assert_eq!(ErrorCode::Conflict.category(), ErrorCategory::Engine);
        assert_eq!(ErrorCode::Transient.category(), ErrorCategory::Engine);
        assert_eq!(
            ErrorCode::UpstreamIncomplete.category(),
            ErrorCategory::Task
        );
        assert_eq!(
            ErrorCode::UserFunctionFailed.category(),
            ErrorCategory::Task
        );
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Runner);
        assert_eq!(ErrorCode::Cancelled.category(), ErrorCategory::Runner);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn only_transient_is_retryable() {
        for code in ALL_CODES {
            assert_eq!(code.is_retryable(), *code == ErrorCode::Transient);
        }
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            let s = code.as_str();
            assert!(seen.insert(s), "duplicate as_str value: {s}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_serialize_to_as_str() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            let expected = format!(r#""{}""#, code.as_str());
            assert_eq!(json, expected, "mismatch for {code:?}");
        }
    }

    #[test]
    fn error_code_count() {
        // Ensure we don't silently drop a variant from ALL_CODES.
        assert_eq!(ALL_CODES.len(), 13);
    }

    #[test]
    fn display_without_context() {
        let report = ErrorReport::new(ErrorCode::NotFound, "no such dataset");
        assert_eq!(report.to_string(), "[NOT_FOUND] no such dataset");
    }

    #[test]
    fn display_with_context() {
        let report = ErrorReport::new(ErrorCode::Transient, "backend busy")
            .with_context("retry_after_ms", 250);
        let s = report.to_string();
        assert!(s.starts_with("[TRANSIENT] backend busy"));
        assert!(s.contains("retry_after_ms"));
        assert!(s.contains("250"));
    }

    #[test]
    fn report_roundtrip() {
        let report = ErrorReport::new(ErrorCode::UserFunctionFailed, "boom")
            .with_context("node", "prices.macd");
        let json = serde_json::to_string(&report).unwrap();
        let back: ErrorReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn category_display() {
        assert_eq!(ErrorCategory::Engine.to_string(), "engine");
        assert_eq!(ErrorCategory::Runner.to_string(), "runner");
        assert_eq!(ErrorCategory::Internal.to_string(), "internal");
    }
}
