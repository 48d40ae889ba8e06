// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-engine
//!
//! The persistence contract and its two reference implementations.
//!
//! An engine stores datasets keyed by content hash.  Operations on a single
//! dataset are linearisable against other writes to the same dataset;
//! writes to different datasets are independent.  Engines are compared by
//! identity (`engine_id`), never by content: the same dataset stored in two
//! engines is two datasets.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Directory-backed document store engine.
pub mod docstore;
/// Hash-backed in-memory engine.
pub mod memory;
mod payload;

pub use docstore::DocStoreEngine;
pub use memory::MemoryEngine;
pub use payload::{Payload, Row, Series};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tide_error::ErrorCode;
use tide_meta::{DatasetHash, DatasetMetadata, DatasetStub, Parameter};
use tide_time::{TimeRange, Timestamp};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Structured engine errors with stable wire codes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Read of an absent dataset.
    #[error("dataset {hash} not found")]
    NotFound {
        /// Hash of the missing dataset.
        hash: DatasetHash,
    },

    /// Append whose smallest new index does not strictly advance the
    /// stored index.  Never silently downgraded to merge.
    #[error("append overlap: new index {new_first} is not after stored last {existing_last}")]
    AppendOverlap {
        /// Smallest index of the attempted append.
        new_first: Timestamp,
        /// Largest index already stored.
        existing_last: Timestamp,
    },

    /// A write was addressed to an engine that does not own the dataset.
    #[error("dataset {hash} belongs to engine `{owner}`, not `{actual}`")]
    ForeignDataset {
        /// Hash of the dataset.
        hash: DatasetHash,
        /// `engine_id` recorded in the metadata.
        owner: String,
        /// `engine_id` of the engine that was asked to write.
        actual: String,
    },

    /// A payload of the wrong kind for the dataset (series vs. blob).
    #[error("payload kind mismatch: {detail}")]
    PayloadKind {
        /// What was expected and what arrived.
        detail: String,
    },

    /// A payload index violated strict monotonicity.
    #[error("payload index is not strictly increasing: {detail}")]
    InvalidIndex {
        /// Which indexes collided.
        detail: String,
    },

    /// Engine-reported transient condition; the caller may retry.
    #[error("transient engine failure: {detail}")]
    Transient {
        /// Human-readable description.
        detail: String,
        /// Suggested back-off before retrying.
        retry_after: Option<Duration>,
    },

    /// Storage-level failure (I/O, corrupted document).
    #[error("storage failure: {detail}")]
    Storage {
        /// Human-readable description.
        detail: String,
    },

    /// Document (de)serialisation failed.
    #[error("failed to (de)serialise a stored document")]
    Serialise(#[from] serde_json::Error),
}

impl EngineError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AppendOverlap { .. } => ErrorCode::AppendOverlap,
            Self::ForeignDataset { .. } => ErrorCode::Conflict,
            Self::Transient { .. } => ErrorCode::Transient,
            Self::PayloadKind { .. } | Self::InvalidIndex { .. } => ErrorCode::InvalidParameter,
            Self::Storage { .. } | Self::Serialise(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn storage(context: &str, err: impl fmt::Display) -> Self {
        Self::Storage {
            detail: format!("{context}: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Filters for [`PersistenceEngine::query`].
///
/// An empty filter matches every dataset.  Parameter filters are subset
/// matches: each filter entry must be present and equal in the dataset's
/// canonical params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    name: Option<String>,
    params: BTreeMap<String, Parameter>,
}

impl QueryFilter {
    /// A filter that matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to datasets with this exact name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require `key` to be present and equal to `value`.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Does `stub` satisfy the filter?
    pub fn matches(&self, stub: &DatasetStub) -> bool {
        if let Some(name) = &self.name {
            if stub.name != *name {
                return false;
            }
        }
        self.params
            .iter()
            .all(|(k, v)| stub.params.get(k) == Some(v))
    }
}

// ---------------------------------------------------------------------------
// PersistenceEngine
// ---------------------------------------------------------------------------

/// A pluggable storage backend for datasets.
///
/// # Contract
///
/// - Every operation on a single metadata is linearisable against other
///   writes to the same metadata; writes to different metadata are
///   independent.
/// - Readers observing a mid-flight write see the old payload or the new
///   one, never a splice.
/// - [`append`](Self::append) requires the smallest new index to be
///   strictly greater than the stored maximum; violations are
///   [`EngineError::AppendOverlap`], a hard error.
/// - Writes verify ownership: a metadata whose `engine_id` names another
///   engine is rejected with [`EngineError::ForeignDataset`].  Reads of
///   foreign metadata simply observe absence.
pub trait PersistenceEngine: fmt::Debug + Send + Sync {
    /// Opaque identity of this engine.  Part of every owned dataset's
    /// metadata, and stable across processes.
    fn engine_id(&self) -> &str;

    /// Is a payload stored for this metadata?  Pure observation.
    fn exists(&self, md: &DatasetMetadata) -> Result<bool, EngineError>;

    /// The stored stub for this metadata (same hash as `md`).
    fn get_stub(&self, md: &DatasetMetadata) -> Result<DatasetStub, EngineError>;

    /// Read the payload, optionally restricted to `range`.
    fn read(&self, md: &DatasetMetadata, range: Option<&TimeRange>)
    -> Result<Payload, EngineError>;

    /// Half-open coverage of the stored index, `None` when absent or
    /// empty.  O(1) for well-behaved engines.
    fn range(&self, md: &DatasetMetadata) -> Result<Option<TimeRange>, EngineError>;

    /// Extend the stored series; creates the dataset when absent.
    fn append(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError>;

    /// Merge with existing-wins semantics; creates the dataset when
    /// absent.
    fn merge(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError>;

    /// Atomically replace the whole payload.
    fn replace(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError>;

    /// Drop the rows in `range`, or the whole dataset when `range` is
    /// `None`.
    fn delete(&self, md: &DatasetMetadata, range: Option<&TimeRange>) -> Result<(), EngineError>;

    /// Stubs of the stored datasets matching `filter`, sorted by hash.
    fn query(&self, filter: &QueryFilter) -> Result<Vec<DatasetStub>, EngineError>;
}

/// Shared engine handle.
pub type SharedEngine = Arc<dyn PersistenceEngine>;

/// Static datasets only ever take whole-value writes.
pub(crate) fn check_series_write(md: &DatasetMetadata, op: &str) -> Result<(), EngineError> {
    if md.is_static() {
        return Err(EngineError::PayloadKind {
            detail: format!(
                "dataset `{}` is static; {op} is not supported, use replace",
                md.name()
            ),
        });
    }
    Ok(())
}

/// Validate that `payload` matches the dataset kind declared in `md`.
pub(crate) fn check_kind(md: &DatasetMetadata, payload: &Payload) -> Result<(), EngineError> {
    match (md.is_static(), payload) {
        (false, Payload::Series(_)) | (true, Payload::Blob(_)) => Ok(()),
        (false, Payload::Blob(_)) => Err(EngineError::PayloadKind {
            detail: format!("dataset `{}` is a time series, got a blob", md.name()),
        }),
        (true, Payload::Series(_)) => Err(EngineError::PayloadKind {
            detail: format!("dataset `{}` is static, got a series", md.name()),
        }),
    }
}

/// Reject writes addressed to an engine that does not own the dataset.
pub(crate) fn ensure_owned(
    engine_id: &str,
    md: &DatasetMetadata,
) -> Result<DatasetHash, EngineError> {
    if md.engine_id() != engine_id {
        return Err(EngineError::ForeignDataset {
            hash: md.hash(),
            owner: md.engine_id().to_string(),
            actual: engine_id.to_string(),
        });
    }
    Ok(md.hash())
}
