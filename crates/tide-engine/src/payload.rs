// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payloads: time-indexed row series and opaque static blobs.

use crate::EngineError;
use serde::{Deserialize, Deserializer, Serialize};
use tide_time::{TimeRange, Timestamp};

/// One stored row: an instant and an opaque value.
pub type Row = (Timestamp, serde_json::Value);

/// A time-indexed sequence of rows with a strictly increasing index.
///
/// The framework is agnostic to row shape beyond "indexed by timestamp";
/// values are opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Series {
    rows: Vec<Row>,
}

impl Series {
    /// A series with no rows.
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Construct from rows, validating that the index is strictly
    /// increasing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidIndex`] for out-of-order or duplicate
    /// timestamps.
    pub fn new(rows: Vec<Row>) -> Result<Self, EngineError> {
        for pair in rows.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(EngineError::InvalidIndex {
                    detail: format!("index {} does not advance past {}", pair[1].0, pair[0].0),
                });
            }
        }
        Ok(Self { rows })
    }

    /// The rows, in index order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the series has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Smallest index, if any.
    pub fn first_index(&self) -> Option<Timestamp> {
        self.rows.first().map(|(t, _)| *t)
    }

    /// Largest index, if any.
    pub fn last_index(&self) -> Option<Timestamp> {
        self.rows.last().map(|(t, _)| *t)
    }

    /// Half-open coverage `[first, last + 1 ns)`, or `None` when empty.
    pub fn extent(&self) -> Option<TimeRange> {
        let first = self.first_index()?;
        let last = self.last_index()?;
        TimeRange::new(first, last.next_instant()).ok()
    }

    /// The rows whose index falls within `range`.
    pub fn restrict(&self, range: &TimeRange) -> Series {
        Series {
            rows: self
                .rows
                .iter()
                .filter(|(t, _)| range.contains(*t))
                .cloned()
                .collect(),
        }
    }

    /// Extend this series with `newer`, requiring the smallest new index
    /// to be strictly greater than the current largest.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AppendOverlap`] when the extension does not
    /// strictly advance the index.  The series is unchanged on error.
    pub fn append(&mut self, newer: Series) -> Result<(), EngineError> {
        if let (Some(last), Some(first)) = (self.last_index(), newer.first_index()) {
            if first <= last {
                return Err(EngineError::AppendOverlap {
                    new_first: first,
                    existing_last: last,
                });
            }
        }
        self.rows.extend(newer.rows);
        Ok(())
    }

    /// Merge with existing-wins semantics: rows of `self` are kept, rows of
    /// `newer` fill the gaps.
    pub fn combine_first(&self, newer: &Series) -> Series {
        let mut rows = self.rows.clone();
        for row in &newer.rows {
            if self.rows.binary_search_by(|(t, _)| t.cmp(&row.0)).is_err() {
                rows.push(row.clone());
            }
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Series { rows }
    }

    /// Remove the rows whose index falls within `range`.
    pub fn without(&self, range: &TimeRange) -> Series {
        Series {
            rows: self
                .rows
                .iter()
                .filter(|(t, _)| !range.contains(*t))
                .cloned()
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = Vec::<Row>::deserialize(deserializer)?;
        Series::new(rows).map_err(serde::de::Error::custom)
    }
}

/// A dataset's stored value: a time-indexed series, or an opaque blob for
/// static (scalar-output) nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Time-indexed rows.
    Series(Series),
    /// Opaque static value.
    Blob(serde_json::Value),
}

impl Payload {
    /// View as a series, when it is one.
    pub fn series(&self) -> Option<&Series> {
        match self {
            Self::Series(s) => Some(s),
            Self::Blob(_) => None,
        }
    }

    /// View as a blob, when it is one.
    pub fn blob(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Series(_) => None,
            Self::Blob(v) => Some(v),
        }
    }

    /// Half-open index coverage; `None` for blobs and empty series.
    pub fn extent(&self) -> Option<TimeRange> {
        self.series().and_then(Series::extent)
    }
}

impl From<Series> for Payload {
    fn from(series: Series) -> Self {
        Self::Series(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn series(indexes: &[&str]) -> Series {
        Series::new(
            indexes
                .iter()
                .map(|s| (ts(s), serde_json::json!({"v": *s})))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_unsorted_rows() {
        let rows = vec![
            (ts("2020-01-02T00:00:00Z"), serde_json::json!(1)),
            (ts("2020-01-01T00:00:00Z"), serde_json::json!(2)),
        ];
        assert!(matches!(
            Series::new(rows),
            Err(EngineError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn new_rejects_duplicate_indexes() {
        let rows = vec![
            (ts("2020-01-01T00:00:00Z"), serde_json::json!(1)),
            (ts("2020-01-01T00:00:00Z"), serde_json::json!(2)),
        ];
        assert!(Series::new(rows).is_err());
    }

    #[test]
    fn extent_is_half_open_past_the_last_index() {
        let s = series(&["2020-01-01T00:00:00Z", "2020-01-03T00:00:00Z"]);
        let extent = s.extent().unwrap();
        assert_eq!(extent.start(), ts("2020-01-01T00:00:00Z"));
        assert_eq!(extent.end(), ts("2020-01-03T00:00:00Z").next_instant());
        assert!(extent.contains(ts("2020-01-03T00:00:00Z")));
    }

    #[test]
    fn restrict_keeps_only_rows_in_range() {
        let s = series(&[
            "2020-01-01T00:00:00Z",
            "2020-01-02T00:00:00Z",
            "2020-01-03T00:00:00Z",
        ]);
        let range =
            TimeRange::new(ts("2020-01-02T00:00:00Z"), ts("2020-01-03T00:00:00Z")).unwrap();
        let cut = s.restrict(&range);
        assert_eq!(cut.len(), 1);
        assert_eq!(cut.first_index(), Some(ts("2020-01-02T00:00:00Z")));
    }

    #[test]
    fn append_requires_strict_extension() {
        let mut s = series(&["2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"]);
        let overlap = series(&["2020-01-02T00:00:00Z"]);
        let err = s.append(overlap).unwrap_err();
        assert!(matches!(err, EngineError::AppendOverlap { .. }));
        // Unchanged on error.
        assert_eq!(s.len(), 2);

        s.append(series(&["2020-01-03T00:00:00Z"])).unwrap();
        assert_eq!(s.last_index(), Some(ts("2020-01-03T00:00:00Z")));
    }

    #[test]
    fn combine_first_prefers_existing_rows() {
        let existing = Series::new(vec![(
            ts("2020-01-02T00:00:00Z"),
            serde_json::json!("existing"),
        )])
        .unwrap();
        let newer = Series::new(vec![
            (ts("2020-01-01T00:00:00Z"), serde_json::json!("new")),
            (ts("2020-01-02T00:00:00Z"), serde_json::json!("clobber")),
            (ts("2020-01-03T00:00:00Z"), serde_json::json!("new")),
        ])
        .unwrap();
        let merged = existing.combine_first(&newer);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.rows()[1].1, serde_json::json!("existing"));
    }

    #[test]
    fn without_drops_rows_in_range() {
        let s = series(&[
            "2020-01-01T00:00:00Z",
            "2020-01-02T00:00:00Z",
            "2020-01-03T00:00:00Z",
        ]);
        let range =
            TimeRange::new(ts("2020-01-01T00:00:00Z"), ts("2020-01-03T00:00:00Z")).unwrap();
        let remaining = s.without(&range);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first_index(), Some(ts("2020-01-03T00:00:00Z")));
    }

    #[test]
    fn serde_roundtrip_preserves_rows() {
        let payload = Payload::Series(series(&["2020-01-01T09:30:00-05:00"]));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("-05:00"));
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn deserialize_rejects_unsorted_series() {
        let json = r#"{"series":[["2020-01-02T00:00:00Z",1],["2020-01-01T00:00:00Z",2]]}"#;
        assert!(serde_json::from_str::<Payload>(json).is_err());
    }
}
