// SPDX-License-Identifier: MIT OR Apache-2.0
//! tide-runner
//!
//! Topological executors for task graphs.
//!
//! Given a set of target tasks, a runner discovers the reachable subgraph
//! (keyed by metadata hash), orders it deterministically (ties broken by
//! hash), and drives each node to a terminal state: run it, skip it when
//! its output is already complete, or block it when something upstream did
//! not succeed.  User-function failures never escape a node — the runner
//! aggregates per-node outcomes and never raises for them.
//!
//! Two executors share the same per-node semantics:
//! [`SerialRunner`] processes nodes one at a time in topological order and
//! is bit-reproducible; [`ParallelRunner`] keeps up to `max_workers` nodes
//! in flight over a ready queue, with cooperative cancellation and
//! optional per-task timeouts.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod graph;
mod parallel;
mod serial;

pub use cancel::CancellationToken;
pub use parallel::ParallelRunner;
pub use serial::SerialRunner;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tide_engine::PersistenceEngine;
use tide_error::{ErrorCode, ErrorReport};
use tide_meta::DatasetHash;
use tide_task::{RunOutcome, Task};
use tracing::{debug, warn};

/// Errors from runner orchestration itself.
///
/// Per-node failures are not runner errors; they land in the
/// [`RunReport`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The discovered graph was not acyclic.  Tasks embed predecessors by
    /// value, so this indicates internal corruption rather than user
    /// input.
    #[error("task graph is not acyclic")]
    GraphCycle,

    /// A worker task was lost without reporting an outcome.
    #[error("worker lost: {detail}")]
    WorkerLost {
        /// What the join reported.
        detail: String,
    },
}

impl RunnerError {
    /// Map onto the wire-level [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Tuning knobs shared by the runners.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Maximum nodes in flight (parallel runner only).
    pub max_workers: usize,
    /// Extra attempts after a `TRANSIENT` engine failure (default 0).
    pub transient_retries: u32,
    /// Per-task wall-clock timeout (parallel runner only).
    pub task_timeout: Option<Duration>,
    /// Opt-in assertion that a run never expands the stored index
    /// backward.  The completion protocol only inspects the end of the
    /// existing range, so front-edge growth is otherwise undetected.
    pub assert_front_edge: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            transient_retries: 0,
            task_timeout: None,
            assert_front_edge: false,
        }
    }
}

impl RunnerConfig {
    /// Set the worker-pool size.
    #[must_use]
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Retry transient engine failures up to `n` extra times.
    #[must_use]
    pub fn transient_retries(mut self, n: u32) -> Self {
        self.transient_retries = n;
        self
    }

    /// Fail tasks that exceed this wall-clock budget.
    #[must_use]
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Enable the front-edge assertion.
    #[must_use]
    pub fn assert_front_edge(mut self) -> Self {
        self.assert_front_edge = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes and the run report
// ---------------------------------------------------------------------------

/// Terminal state of one node in a run.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The node ran and its output was written.
    Success,
    /// The persisted output was already complete; the function never ran.
    Skipped,
    /// An upstream node or external input was not in a good state; the
    /// function never ran.
    BlockedUpstream {
        /// What blocked it.
        reason: String,
    },
    /// The node ran and failed (user function, engine, or timeout).
    Failed {
        /// What went wrong.
        report: ErrorReport,
    },
    /// The run was cancelled before this node was dispatched.
    Cancelled,
}

impl NodeOutcome {
    /// Did the node leave its output in a good state?
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

/// Per-node record in a [`RunReport`].
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// Dataset name.
    pub name: String,
    /// Content hash of the node's output.
    pub hash: DatasetHash,
    /// Terminal state.
    pub outcome: NodeOutcome,
}

/// What a run did, node by node.
#[derive(Debug, Default)]
pub struct RunReport {
    nodes: BTreeMap<DatasetHash, NodeReport>,
}

impl RunReport {
    pub(crate) fn record(&mut self, task: &Task, outcome: NodeOutcome) {
        let hash = task.output().hash();
        self.nodes.insert(
            hash,
            NodeReport {
                name: task.output().name().to_string(),
                hash,
                outcome,
            },
        );
    }

    /// The outcome recorded for a node, by hash.
    pub fn outcome(&self, hash: DatasetHash) -> Option<&NodeOutcome> {
        self.nodes.get(&hash).map(|n| &n.outcome)
    }

    /// The outcome recorded for a task's output.
    pub fn outcome_for(&self, task: &Task) -> Option<&NodeOutcome> {
        self.outcome(task.output().hash())
    }

    /// All node records, sorted by hash.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.values()
    }

    /// Number of nodes in the report.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the report empty?
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Did every node end `Success` or `Skipped`?
    pub fn all_ok(&self) -> bool {
        self.nodes.values().all(|n| n.outcome.is_ok())
    }

    fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.nodes.values().filter(|n| pred(&n.outcome)).count()
    }

    /// Number of nodes that ran successfully.
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Success))
    }

    /// Number of nodes skipped because they were already complete.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Skipped))
    }

    /// Number of nodes blocked by upstream state.
    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::BlockedUpstream { .. }))
    }

    /// Number of nodes that failed.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Failed { .. }))
    }

    /// Number of nodes cancelled before dispatch.
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Cancelled))
    }
}

// ---------------------------------------------------------------------------
// Shared per-node execution
// ---------------------------------------------------------------------------

/// Run one node with transient retries and the optional front-edge
/// assertion.  Completion and upstream checks have already happened.
pub(crate) fn execute_node(task: &Arc<Task>, config: &RunnerConfig) -> NodeOutcome {
    let front_before = if config.assert_front_edge {
        match task.engine().range(task.output()) {
            Ok(coverage) => coverage.map(|c| c.start()),
            Err(e) => {
                return NodeOutcome::Failed {
                    report: ErrorReport::new(e.code(), e.to_string()),
                };
            }
        }
    } else {
        None
    };

    let mut attempt = 0u32;
    let outcome = loop {
        match task.run() {
            RunOutcome::Failed { report }
                if report.code == ErrorCode::Transient && attempt < config.transient_retries =>
            {
                attempt += 1;
                warn!(
                    target: "tide.runner",
                    task = %task.output().name(),
                    attempt,
                    "transient failure, retrying"
                );
            }
            RunOutcome::Success { .. } => break NodeOutcome::Success,
            RunOutcome::AlreadyComplete => break NodeOutcome::Skipped,
            RunOutcome::Incomplete { reason } => break NodeOutcome::BlockedUpstream { reason },
            RunOutcome::Failed { report } => break NodeOutcome::Failed { report },
        }
    };

    if let (NodeOutcome::Success, Some(before)) = (&outcome, front_before) {
        match task.engine().range(task.output()) {
            Ok(Some(after)) if after.start() < before => {
                return NodeOutcome::Failed {
                    report: ErrorReport::new(
                        ErrorCode::Conflict,
                        "stored index expanded backward past its previous front edge",
                    )
                    .with_context("task", task.output().name()),
                };
            }
            Ok(_) => {}
            Err(e) => {
                return NodeOutcome::Failed {
                    report: ErrorReport::new(e.code(), e.to_string()),
                };
            }
        }
    }

    debug!(target: "tide.runner", task = %task.output().name(), ?outcome, "node finished");
    outcome
}

/// Decide the pre-dispatch state of a node: skip when complete, block when
/// an upstream node is not in a good state, otherwise run it.
pub(crate) fn predispatch(
    task: &Arc<Task>,
    blocked_preds: Vec<&NodeReport>,
) -> Result<(), NodeOutcome> {
    match task.complete() {
        Ok(true) => return Err(NodeOutcome::Skipped),
        Ok(false) => {}
        Err(e) => {
            return Err(NodeOutcome::Failed {
                report: e.report(),
            });
        }
    }
    if !blocked_preds.is_empty() {
        let names: Vec<&str> = blocked_preds.iter().map(|n| n.name.as_str()).collect();
        return Err(NodeOutcome::BlockedUpstream {
            reason: format!("upstream not successful: {}", names.join(", ")),
        });
    }
    Ok(())
}
