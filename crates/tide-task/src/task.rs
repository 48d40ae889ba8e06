// SPDX-License-Identifier: MIT OR Apache-2.0
//! The task node: completion checking, incremental windowing, execution.

use crate::{Dependency, TaskError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tide_check::{CompletionChecker, CompositeChecker, IrregularChecker, SharedChecker, Strategy};
use tide_engine::{Payload, PersistenceEngine, Series, SharedEngine};
use tide_error::{ErrorCode, ErrorReport};
use tide_meta::{DatasetMetadata, Parameter};
use tide_time::TimeRange;
use tracing::debug;

// ---------------------------------------------------------------------------
// User function contract
// ---------------------------------------------------------------------------

/// The payloads and parameters handed to a user function for one run.
///
/// Dependency payloads arrive under the parameter names their edges were
/// registered with; scalar parameters arrive exactly as the user supplied
/// them (unnormalised); `time_range` carries the fetch window for
/// time-series runs.
pub struct TaskInputs {
    inputs: BTreeMap<String, Payload>,
    params: BTreeMap<String, Parameter>,
    time_range: Option<TimeRange>,
}

impl TaskInputs {
    /// The payload fetched for the named dependency.
    pub fn input(&self, name: &str) -> Option<&Payload> {
        self.inputs.get(name)
    }

    /// The named dependency's payload as a series.
    ///
    /// # Errors
    ///
    /// Fails when the dependency is missing or holds a static blob.
    pub fn series(&self, name: &str) -> anyhow::Result<&Series> {
        self.input(name)
            .ok_or_else(|| anyhow::anyhow!("no input named `{name}`"))?
            .series()
            .ok_or_else(|| anyhow::anyhow!("input `{name}` is not a series"))
    }

    /// The named dependency's payload as a static blob.
    ///
    /// # Errors
    ///
    /// Fails when the dependency is missing or holds a series.
    pub fn blob(&self, name: &str) -> anyhow::Result<&serde_json::Value> {
        self.input(name)
            .ok_or_else(|| anyhow::anyhow!("no input named `{name}`"))?
            .blob()
            .ok_or_else(|| anyhow::anyhow!("input `{name}` is not a blob"))
    }

    /// The named scalar parameter, as the user supplied it.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// The fetch window for this run (`None` for static tasks).
    pub fn time_range(&self) -> Option<&TimeRange> {
        self.time_range.as_ref()
    }
}

/// A deterministic unit of computation.
///
/// Implementations must be deterministic given identical inputs (including
/// the fetch window); containing non-determinism such as live network
/// pulls is the implementor's responsibility.
pub trait TaskFn: Send + Sync {
    /// Produce the output payload for one run.
    fn call(&self, inputs: TaskInputs) -> anyhow::Result<Payload>;
}

impl<F> TaskFn for F
where
    F: Fn(TaskInputs) -> anyhow::Result<Payload> + Send + Sync,
{
    fn call(&self, inputs: TaskInputs) -> anyhow::Result<Payload> {
        self(inputs)
    }
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

/// Structured result of a single [`Task::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The function ran and its output was written.
    Success {
        /// Index coverage of what the function produced, when any.
        written: Option<TimeRange>,
    },
    /// The persisted output already satisfied the target; nothing ran.
    AlreadyComplete,
    /// A dependency was not complete over its fetch window; nothing ran.
    Incomplete {
        /// Which dependency, and over what window.
        reason: String,
    },
    /// The run failed.
    Failed {
        /// What went wrong.
        report: ErrorReport,
    },
}

impl RunOutcome {
    /// Did the run leave the output in a good state (ran or already had)?
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::AlreadyComplete)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A node in the runtime graph.
///
/// Logically immutable after construction; `run` is idempotent — running
/// an already-complete task performs no engine writes.
pub struct Task {
    function: Arc<dyn TaskFn>,
    metadata: Arc<DatasetMetadata>,
    dependencies: BTreeMap<String, Dependency>,
    call_params: BTreeMap<String, Parameter>,
    target_range: Option<TimeRange>,
    checker: SharedChecker,
    engine: SharedEngine,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.metadata.name())
            .field("hash", &self.metadata.hash())
            .field("target_range", &self.target_range)
            .finish()
    }
}

impl Task {
    pub(crate) fn assemble(
        function: Arc<dyn TaskFn>,
        metadata: Arc<DatasetMetadata>,
        dependencies: BTreeMap<String, Dependency>,
        call_params: BTreeMap<String, Parameter>,
        target_range: Option<TimeRange>,
        checker: SharedChecker,
        engine: SharedEngine,
    ) -> Arc<Self> {
        Arc::new(Self {
            function,
            metadata,
            dependencies,
            call_params,
            target_range,
            checker,
            engine,
        })
    }

    /// Derive the default checker from inheriting dependencies:
    /// none → irregular; one → used directly; several → strictest
    /// composite.
    pub(crate) fn derive_checker(
        dependencies: &BTreeMap<String, Dependency>,
    ) -> Result<SharedChecker, TaskError> {
        let mut inherited: Vec<SharedChecker> = dependencies
            .values()
            .filter(|dep| dep.inherits_frequency())
            .map(|dep| dep.upstream().checker())
            .collect();
        Ok(match inherited.len() {
            0 => Arc::new(IrregularChecker),
            1 => inherited.remove(0),
            _ => Arc::new(CompositeChecker::new(Strategy::Strictest, inherited)?),
        })
    }

    /// The content-addressed identity of this task's output.  Deterministic
    /// and computed once at construction.
    pub fn output(&self) -> &Arc<DatasetMetadata> {
        &self.metadata
    }

    /// The engine this task writes to.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// This task's completion policy.
    pub fn checker(&self) -> &SharedChecker {
        &self.checker
    }

    /// The interval the task aims to cover (`None` for static tasks).
    pub fn target_range(&self) -> Option<&TimeRange> {
        self.target_range.as_ref()
    }

    /// Dependency edges, keyed by parameter name.
    pub fn dependencies(&self) -> &BTreeMap<String, Dependency> {
        &self.dependencies
    }

    /// Is the persisted output up to date for the target range?
    ///
    /// For static tasks this is an existence check.
    ///
    /// # Errors
    ///
    /// Propagates engine and checker failures.
    pub fn complete(&self) -> Result<bool, TaskError> {
        match &self.target_range {
            None => Ok(self.engine.exists(&self.metadata)?),
            Some(target) => {
                let existing = self.engine.range(&self.metadata)?;
                Ok(self.checker.is_complete(target, existing.as_ref())?)
            }
        }
    }

    /// Read the persisted output over the target range.
    ///
    /// # Errors
    ///
    /// Propagates engine failures, including `NotFound`.
    pub fn read(&self) -> Result<Payload, TaskError> {
        Ok(self.engine.read(&self.metadata, self.target_range.as_ref())?)
    }

    /// Bring the persisted output up to date.
    ///
    /// Idempotent: an already-complete task returns
    /// [`RunOutcome::AlreadyComplete`] without writing.  Otherwise the
    /// missing sub-range is computed, each dependency is fetched over its
    /// lookback-extended window **via the upstream metadata's own engine**,
    /// the user function is invoked, and the result is written with
    /// `append` (strict extension), `merge` (non-prefix growth), or
    /// `replace` (static).
    ///
    /// Never panics or returns `Err` for user-function failures — they are
    /// captured in the outcome.
    pub fn run(&self) -> RunOutcome {
        let result = match self.target_range {
            Some(target) => self.run_time_series(target),
            None => self.run_static(),
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                report: e
                    .report()
                    .with_context("task", self.metadata.name())
                    .with_context("dataset", self.metadata.hash().to_string()),
            },
        }
    }

    fn run_time_series(&self, target: TimeRange) -> Result<RunOutcome, TaskError> {
        let existing = self.engine.range(&self.metadata)?;
        if self.checker.is_complete(&target, existing.as_ref())? {
            debug!(target: "tide.task", task = %self.metadata.name(), "already complete");
            return Ok(RunOutcome::AlreadyComplete);
        }

        // Prefix growth resumes where the stored index ends; anything else
        // recomputes the whole target.
        let missing = match existing {
            Some(covered) => target.strip_prefix(&covered),
            None => target,
        };

        for (key, dep) in &self.dependencies {
            let fetch = dep.fetch_range(&missing);
            if let Some(reason) = self.upstream_gap(key, dep, &fetch)? {
                debug!(target: "tide.task", task = %self.metadata.name(), %reason, "not running");
                return Ok(RunOutcome::Incomplete { reason });
            }
        }

        let mut inputs = BTreeMap::new();
        for (key, dep) in &self.dependencies {
            let fetch = dep.fetch_range(&missing);
            let payload = dep
                .upstream()
                .engine()
                .read(dep.upstream().metadata(), Some(&fetch))?;
            inputs.insert(key.clone(), payload);
        }

        debug!(target: "tide.task", task = %self.metadata.name(), window = %missing, "running");
        let produced = match self.function.call(TaskInputs {
            inputs,
            params: self.call_params.clone(),
            time_range: Some(missing),
        }) {
            Ok(payload) => payload,
            Err(e) => return Ok(self.user_failure(&e)),
        };

        let Payload::Series(series) = produced else {
            return Ok(RunOutcome::Failed {
                report: ErrorReport::new(
                    ErrorCode::UserFunctionFailed,
                    "time-series task produced a static blob",
                )
                .with_context("task", self.metadata.name()),
            });
        };
        if series.is_empty() {
            return Ok(RunOutcome::Success { written: None });
        }

        let written = series.extent();
        let strictly_extends = match (&existing, series.first_index()) {
            (None, _) => true,
            (Some(covered), Some(first)) => first >= covered.end(),
            (Some(_), None) => true,
        };
        if strictly_extends {
            self.engine.append(&self.metadata, Payload::Series(series))?;
        } else {
            self.engine.merge(&self.metadata, Payload::Series(series))?;
        }
        Ok(RunOutcome::Success { written })
    }

    fn run_static(&self) -> Result<RunOutcome, TaskError> {
        if self.engine.exists(&self.metadata)? {
            debug!(target: "tide.task", task = %self.metadata.name(), "already complete");
            return Ok(RunOutcome::AlreadyComplete);
        }

        for (key, dep) in &self.dependencies {
            let up = dep.upstream();
            if !up.engine().exists(up.metadata())? {
                return Ok(RunOutcome::Incomplete {
                    reason: format!(
                        "dependency `{key}` (`{}`) has no stored data",
                        up.metadata().name()
                    ),
                });
            }
        }

        let mut inputs = BTreeMap::new();
        for (key, dep) in &self.dependencies {
            // Static runs read dependencies in full.
            let payload = dep.upstream().engine().read(dep.upstream().metadata(), None)?;
            inputs.insert(key.clone(), payload);
        }

        debug!(target: "tide.task", task = %self.metadata.name(), "running static");
        let produced = match self.function.call(TaskInputs {
            inputs,
            params: self.call_params.clone(),
            time_range: None,
        }) {
            Ok(payload) => payload,
            Err(e) => return Ok(self.user_failure(&e)),
        };

        self.engine.replace(&self.metadata, produced)?;
        Ok(RunOutcome::Success { written: None })
    }

    fn upstream_gap(
        &self,
        key: &str,
        dep: &Dependency,
        fetch: &TimeRange,
    ) -> Result<Option<String>, TaskError> {
        let up = dep.upstream();
        if !up.engine().exists(up.metadata())? {
            return Ok(Some(format!(
                "dependency `{key}` (`{}`) has no stored data",
                up.metadata().name()
            )));
        }
        if up.metadata().is_static() {
            return Ok(None);
        }
        let existing = up.engine().range(up.metadata())?;
        if !up.checker().is_complete(fetch, existing.as_ref())? {
            return Ok(Some(format!(
                "dependency `{key}` (`{}`) is incomplete over {fetch}",
                up.metadata().name()
            )));
        }
        Ok(None)
    }

    fn user_failure(&self, error: &anyhow::Error) -> RunOutcome {
        RunOutcome::Failed {
            report: ErrorReport::new(ErrorCode::UserFunctionFailed, format!("{error:#}"))
                .with_context("task", self.metadata.name())
                .with_context("dataset", self.metadata.hash().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Task`]s.  Usually obtained from
/// [`Context::time_series_task`](crate::Context::time_series_task) or
/// [`Context::static_task`](crate::Context::static_task), which seed the
/// defaults.
pub struct TaskBuilder {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) is_static: bool,
    pub(crate) time_level: Option<String>,
    pub(crate) function: Arc<dyn TaskFn>,
    pub(crate) params: BTreeMap<String, Parameter>,
    pub(crate) dependencies: BTreeMap<String, Dependency>,
    pub(crate) target_range: Option<TimeRange>,
    pub(crate) checker: Option<SharedChecker>,
    pub(crate) engine: SharedEngine,
}

impl TaskBuilder {
    /// Override the code version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Name the index level interpreted as the instant of a row.
    #[must_use]
    pub fn time_level(mut self, level: impl Into<String>) -> Self {
        self.time_level = Some(level.into());
        self
    }

    /// Add a scalar parameter (part of the output's identity).
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Register a dependency under a parameter name.  Bare tasks lift to
    /// edges with zero lookback that inherit frequency.
    #[must_use]
    pub fn dependency(mut self, key: impl Into<String>, dep: impl Into<Dependency>) -> Self {
        self.dependencies.insert(key.into(), dep.into());
        self
    }

    /// Supply an explicit completion checker instead of the derived one.
    #[must_use]
    pub fn checker(mut self, checker: SharedChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Write the output to this engine instead of the context default.
    #[must_use]
    pub fn engine(mut self, engine: SharedEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Cover this range instead of the context default.
    #[must_use]
    pub fn target_range(mut self, target: TimeRange) -> Self {
        self.target_range = Some(target);
        self
    }

    /// Resolve the metadata, derive the checker, and produce the task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::MissingTargetRange`] for a time-series task
    /// with no target, [`TaskError::StaticTargetRange`] for a static task
    /// with one, and metadata errors for non-normalisable parameters.
    pub fn build(self) -> Result<Arc<Task>, TaskError> {
        let target_range = match (self.is_static, self.target_range) {
            (true, Some(_)) => {
                return Err(TaskError::StaticTargetRange { name: self.name });
            }
            (true, None) => None,
            (false, Some(target)) => Some(target),
            (false, None) => {
                return Err(TaskError::MissingTargetRange { name: self.name });
            }
        };

        let mut metadata = DatasetMetadata::builder(
            self.name,
            self.version,
            self.engine.engine_id(),
        )
        .params(self.params.clone());
        if self.is_static {
            metadata = metadata.static_output();
        }
        if let Some(level) = &self.time_level {
            metadata = metadata.time_level(level.clone());
        }
        for (key, dep) in &self.dependencies {
            metadata = metadata.predecessor(key.clone(), Arc::clone(dep.upstream().metadata()));
        }
        let metadata = metadata.build()?;

        let checker = match self.checker {
            Some(checker) => checker,
            None => Task::derive_checker(&self.dependencies)?,
        };

        Ok(Task::assemble(
            self.function,
            metadata,
            self.dependencies,
            self.params,
            target_range,
            checker,
            self.engine,
        ))
    }
}
