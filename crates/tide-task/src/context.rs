// SPDX-License-Identifier: MIT OR Apache-2.0
//! Construction context: default injection and task factories.

use crate::{TaskBuilder, TaskFn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tide_engine::SharedEngine;
use tide_time::TimeRange;

/// Carries the defaults tasks are built against: code version, persistence
/// engine, and target range.
///
/// The context's only responsibilities are default injection and lifting
/// bare tasks into dependency edges; parameter well-formedness is enforced
/// by the [`Parameter`](tide_meta::Parameter) type at the call site.
///
/// ```
/// use std::sync::Arc;
/// use tide_engine::{MemoryEngine, Payload};
/// use tide_task::{Context, TaskInputs};
///
/// let engine = Arc::new(MemoryEngine::new());
/// let ctx = Context::builder(engine).version("2.1").build();
/// let model = ctx
///     .static_task("model", |_inputs: TaskInputs| -> anyhow::Result<Payload> {
///         Ok(Payload::Blob(serde_json::json!(42)))
///     })
///     .param("seed", 7i64)
///     .build()
///     .unwrap();
/// assert_eq!(model.output().version(), "2.1");
/// ```
#[derive(Clone)]
pub struct Context {
    version: String,
    engine: SharedEngine,
    target_range: Option<TimeRange>,
}

impl Context {
    /// Start building a context around a default engine.
    pub fn builder(engine: SharedEngine) -> ContextBuilder {
        ContextBuilder {
            version: "0.1.0".to_string(),
            engine,
            target_range: None,
        }
    }

    /// The default code version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The default persistence engine.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// The default target range, if one was set.
    pub fn target_range(&self) -> Option<&TimeRange> {
        self.target_range.as_ref()
    }

    /// Start a time-series task seeded with this context's defaults.
    pub fn time_series_task(
        &self,
        name: impl Into<String>,
        function: impl TaskFn + 'static,
    ) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            version: self.version.clone(),
            is_static: false,
            time_level: None,
            function: Arc::new(function),
            params: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            target_range: self.target_range,
            checker: None,
            engine: Arc::clone(&self.engine),
        }
    }

    /// Start a static (scalar-output) task seeded with this context's
    /// defaults.  Static tasks take no target range.
    pub fn static_task(
        &self,
        name: impl Into<String>,
        function: impl TaskFn + 'static,
    ) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            version: self.version.clone(),
            is_static: true,
            time_level: None,
            function: Arc::new(function),
            params: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            target_range: None,
            checker: None,
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Builder for [`Context`].
#[derive(Clone)]
pub struct ContextBuilder {
    version: String,
    engine: SharedEngine,
    target_range: Option<TimeRange>,
}

impl ContextBuilder {
    /// Set the default code version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the default target range for time-series tasks.
    #[must_use]
    pub fn target_range(mut self, target: TimeRange) -> Self {
        self.target_range = Some(target);
        self
    }

    /// Produce the context.
    #[must_use]
    pub fn build(self) -> Context {
        Context {
            version: self.version,
            engine: self.engine,
            target_range: self.target_range,
        }
    }
}
