// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-meta
//!
//! Content-addressed identity of dataset nodes.
//!
//! A [`DatasetMetadata`] embeds its predecessors by value, so two nodes are
//! equal exactly when their whole ancestor graphs are structurally equal.
//! Identity is a SHA-256 digest over a canonical JSON serialisation; equal
//! inputs yield equal lookups across processes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod hash;
mod metadata;
mod params;

pub use hash::{DatasetHash, canonical_json, sha256_digest};
pub use metadata::{DatasetMetadata, MetadataBuilder, DatasetStub};
pub use params::Parameter;

use tide_error::ErrorCode;

/// Errors from metadata construction and hashing.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// A parameter value is not normalisable (NaN, infinity, out-of-range
    /// integer, or a malformed dataset reference).
    #[error("invalid parameter: {detail}")]
    InvalidParameter {
        /// What was wrong, including the offending key path.
        detail: String,
    },

    /// `replace_predecessor` was called with a key that does not exist.
    #[error("unknown predecessor `{key}`")]
    UnknownPredecessor {
        /// The missing predecessor key.
        key: String,
    },

    /// A static dataset must not declare a time level.
    #[error("static dataset `{name}` must not declare a time level")]
    StaticTimeLevel {
        /// Dataset name.
        name: String,
    },

    /// Canonical serialisation for hashing failed.
    #[error("failed to serialise metadata for hashing")]
    Serialise(#[from] serde_json::Error),
}

impl MetadataError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter { .. }
            | Self::UnknownPredecessor { .. }
            | Self::StaticTimeLevel { .. } => ErrorCode::InvalidParameter,
            Self::Serialise(_) => ErrorCode::Internal,
        }
    }
}
