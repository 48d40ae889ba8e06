// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dependency edges: lookback windowing and completion inheritance.

use crate::{Task, TaskError};
use chrono::TimeDelta;
use std::fmt;
use std::sync::Arc;
use tide_check::{IrregularChecker, SharedChecker};
use tide_engine::{PersistenceEngine, SharedEngine};
use tide_meta::DatasetMetadata;
use tide_time::TimeRange;

/// What a dependency points at.
///
/// Most edges point at a [`Task`] constructed in the same run.  An
/// [`ExternalInput`] is a leaf assumption: a dataset someone else
/// maintains, referenced by metadata and engine only — the runner checks
/// its existence and completeness but never executes it.
#[derive(Clone)]
pub enum Upstream {
    /// A task constructed in this process.
    Task(Arc<Task>),
    /// A dataset maintained outside this run.
    External(ExternalInput),
}

impl Upstream {
    /// The upstream dataset's identity.
    pub fn metadata(&self) -> &Arc<DatasetMetadata> {
        match self {
            Self::Task(task) => task.output(),
            Self::External(input) => &input.metadata,
        }
    }

    /// The engine owning the upstream dataset.
    ///
    /// For a task upstream this is the task's own engine; for an external
    /// input it is the handle supplied with the metadata.  Either way the
    /// engine follows the metadata.
    pub fn engine(&self) -> &SharedEngine {
        match self {
            Self::Task(task) => task.engine(),
            Self::External(input) => &input.engine,
        }
    }

    /// The upstream completion policy.
    ///
    /// External inputs without an explicit checker are assumed irregular.
    pub fn checker(&self) -> SharedChecker {
        match self {
            Self::Task(task) => Arc::clone(task.checker()),
            Self::External(input) => input
                .checker
                .clone()
                .unwrap_or_else(|| Arc::new(IrregularChecker)),
        }
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => f
                .debug_tuple("Upstream::Task")
                .field(&task.output().name())
                .finish(),
            Self::External(input) => f
                .debug_tuple("Upstream::External")
                .field(&input.metadata.name())
                .finish(),
        }
    }
}

impl From<Arc<Task>> for Upstream {
    fn from(task: Arc<Task>) -> Self {
        Self::Task(task)
    }
}

impl From<ExternalInput> for Upstream {
    fn from(input: ExternalInput) -> Self {
        Self::External(input)
    }
}

/// A dataset maintained outside this run, referenced as a leaf assumption.
#[derive(Clone, Debug)]
pub struct ExternalInput {
    metadata: Arc<DatasetMetadata>,
    engine: SharedEngine,
    checker: Option<SharedChecker>,
}

impl ExternalInput {
    /// Pair a metadata with the engine that owns it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::ExternalEngineMismatch`] when the metadata
    /// names a different engine than the supplied handle.
    pub fn new(metadata: Arc<DatasetMetadata>, engine: SharedEngine) -> Result<Self, TaskError> {
        if metadata.engine_id() != engine.engine_id() {
            return Err(TaskError::ExternalEngineMismatch {
                name: metadata.name().to_string(),
                owner: metadata.engine_id().to_string(),
                actual: engine.engine_id().to_string(),
            });
        }
        Ok(Self {
            metadata,
            engine,
            checker: None,
        })
    }

    /// Declare the upstream's completion policy (default: irregular).
    #[must_use]
    pub fn with_checker(mut self, checker: SharedChecker) -> Self {
        self.checker = Some(checker);
        self
    }
}

/// An edge from a child task to an upstream dataset.
///
/// Carries the lookback window (how far before the child's target the
/// upstream fetch reaches) and whether the upstream's completion checker
/// contributes to the child's derived checker.
#[derive(Debug, Clone)]
pub struct Dependency {
    upstream: Upstream,
    lookback: TimeDelta,
    inherit_frequency: bool,
}

impl Dependency {
    /// An edge with zero lookback that inherits frequency.
    pub fn new(upstream: impl Into<Upstream>) -> Self {
        Self {
            upstream: upstream.into(),
            lookback: TimeDelta::zero(),
            inherit_frequency: true,
        }
    }

    /// Fetch this much history before the child's target start.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Time`] for a negative lookback.
    pub fn with_lookback(mut self, lookback: TimeDelta) -> Result<Self, TaskError> {
        if lookback < TimeDelta::zero() {
            return Err(tide_time::TimeError::NegativeLookback.into());
        }
        self.lookback = lookback;
        Ok(self)
    }

    /// Exclude this upstream's checker from the child's derived checker.
    #[must_use]
    pub fn without_inheritance(mut self) -> Self {
        self.inherit_frequency = false;
        self
    }

    /// What this edge points at.
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// The lookback window.
    pub fn lookback(&self) -> TimeDelta {
        self.lookback
    }

    /// Does this upstream's checker contribute to the child's default?
    pub fn inherits_frequency(&self) -> bool {
        self.inherit_frequency
    }

    /// The sub-range of the upstream to fetch for a child run over
    /// `child_target`: the target extended backward by the lookback.
    pub fn fetch_range(&self, child_target: &TimeRange) -> TimeRange {
        child_target
            .extend_back(self.lookback)
            .expect("lookback validated non-negative at construction")
    }
}

impl From<Arc<Task>> for Dependency {
    fn from(task: Arc<Task>) -> Self {
        Self::new(task)
    }
}

impl From<ExternalInput> for Dependency {
    fn from(input: ExternalInput) -> Self {
        Self::new(input)
    }
}
