// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-threaded executor with reproducible ordering.

use crate::graph::ExecutionGraph;
use crate::{
    CancellationToken, NodeOutcome, RunReport, RunnerConfig, RunnerError, execute_node,
    predispatch,
};
use std::sync::Arc;
use tide_task::Task;
use tracing::info;

/// Processes nodes one at a time in deterministic topological order.
///
/// Given identical inputs, the sequence of function invocations and engine
/// writes is identical across runs.  Timeouts do not apply here — a serial
/// run has nowhere to overlap work — but cancellation does: nodes not yet
/// reached when the token fires are reported [`NodeOutcome::Cancelled`].
#[derive(Debug, Default)]
pub struct SerialRunner {
    config: RunnerConfig,
}

impl SerialRunner {
    /// A runner with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner with explicit configuration.
    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Drive every task reachable from `targets` to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] only for graph-level problems; per-node
    /// failures are captured in the report.
    pub fn run(&self, targets: &[Arc<Task>]) -> Result<RunReport, RunnerError> {
        self.run_with_cancellation(targets, CancellationToken::new())
    }

    /// Like [`run`](Self::run), observing a cancellation token between
    /// nodes.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] only for graph-level problems.
    pub fn run_with_cancellation(
        &self,
        targets: &[Arc<Task>],
        token: CancellationToken,
    ) -> Result<RunReport, RunnerError> {
        let graph = ExecutionGraph::discover(targets)?;
        info!(target: "tide.runner", nodes = graph.len(), "serial run starting");
        let mut report = RunReport::default();

        for hash in graph.order() {
            let task = graph.task(*hash);
            if token.is_cancelled() {
                report.record(task, NodeOutcome::Cancelled);
                continue;
            }

            let blocked: Vec<_> = graph
                .predecessors(*hash)
                .filter_map(|pred| report.nodes.get(&pred))
                .filter(|node| !node.outcome.is_ok())
                .collect();
            let outcome = match predispatch(task, blocked) {
                Err(outcome) => outcome,
                Ok(()) => execute_node(task, &self.config),
            };
            report.record(task, outcome);
        }

        info!(
            target: "tide.runner",
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            blocked = report.blocked(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "serial run finished"
        );
        Ok(report)
    }
}
