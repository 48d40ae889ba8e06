// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-task
//!
//! Nodes of the runtime graph.  A [`Task`] composes a user function with a
//! content-addressed identity, dependency edges, a completion checker, and
//! a persistence engine; the [`Context`] fills in defaults and lifts bare
//! tasks into [`Dependency`] edges.
//!
//! Dependency payloads are always read through the engine named by the
//! *upstream* metadata, not the engine of the task referencing it — the
//! engine follows the metadata.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod dependency;
mod task;

pub use context::{Context, ContextBuilder};
pub use dependency::{Dependency, ExternalInput, Upstream};
pub use task::{RunOutcome, Task, TaskBuilder, TaskFn, TaskInputs};

use tide_error::{ErrorCode, ErrorReport};

/// Errors from task construction and execution plumbing.
///
/// User-function failures are not a `TaskError`: they are captured into the
/// [`RunOutcome`] of the run that observed them.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A time-series task has no target range (neither explicit nor from
    /// the context defaults).
    #[error("task `{name}` has no target range")]
    MissingTargetRange {
        /// Task name.
        name: String,
    },

    /// A static task was given a target range.
    #[error("static task `{name}` cannot take a target range")]
    StaticTargetRange {
        /// Task name.
        name: String,
    },

    /// An external input's metadata names a different engine than the
    /// handle supplied with it.
    #[error("external input `{name}` names engine `{owner}`, got a handle to `{actual}`")]
    ExternalEngineMismatch {
        /// Dataset name.
        name: String,
        /// `engine_id` recorded in the metadata.
        owner: String,
        /// `engine_id` of the supplied handle.
        actual: String,
    },

    /// Metadata construction failed.
    #[error(transparent)]
    Metadata(#[from] tide_meta::MetadataError),

    /// A persistence operation failed.
    #[error(transparent)]
    Engine(#[from] tide_engine::EngineError),

    /// Completion evaluation failed.
    #[error(transparent)]
    Check(#[from] tide_check::CheckError),

    /// Range arithmetic failed.
    #[error(transparent)]
    Time(#[from] tide_time::TimeError),
}

impl TaskError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingTargetRange { .. } | Self::StaticTargetRange { .. } => {
                ErrorCode::InvalidParameter
            }
            Self::ExternalEngineMismatch { .. } => ErrorCode::Conflict,
            Self::Metadata(e) => e.code(),
            Self::Engine(e) => e.code(),
            Self::Check(e) => e.code(),
            Self::Time(e) => e.code(),
        }
    }

    /// Snapshot into a boundary-crossing [`ErrorReport`].
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}
