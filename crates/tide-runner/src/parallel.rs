// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker-pool executor over a ready queue.

use crate::graph::ExecutionGraph;
use crate::{
    CancellationToken, NodeOutcome, RunReport, RunnerConfig, RunnerError, execute_node,
    predispatch,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tide_error::{ErrorCode, ErrorReport};
use tide_meta::DatasetHash;
use tide_task::Task;
use tokio::task::JoinSet;
use tracing::info;

/// Keeps up to `max_workers` nodes in flight.
///
/// A node is dispatched only when every predecessor has reached a terminal
/// state; predecessors that ended badly block it instead.  Blocking user
/// functions run on the blocking pool (tokio's scheduler work-steals
/// between workers).  Cancellation is a shared flag checked before each
/// dispatch: in-flight nodes finish, everything undispatched reports
/// [`NodeOutcome::Cancelled`].  A per-task timeout abandons the offending
/// node's thread and reports `TIMEOUT` — in line with the suspension
/// model, functions are never interrupted mid-flight.
#[derive(Debug, Default)]
pub struct ParallelRunner {
    config: RunnerConfig,
}

impl ParallelRunner {
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
    pub async fn run(&self, targets: &[Arc<Task>]) -> Result<RunReport, RunnerError> {
        self.run_with_cancellation(targets, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), observing a cancellation token before each
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] only for graph-level problems.
    pub async fn run_with_cancellation(
        &self,
        targets: &[Arc<Task>],
        token: CancellationToken,
    ) -> Result<RunReport, RunnerError> {
        let graph = ExecutionGraph::discover(targets)?;
        info!(
            target: "tide.runner",
            nodes = graph.len(),
            workers = self.config.max_workers,
            "parallel run starting"
        );
        let mut report = RunReport::default();

        let mut outstanding: BTreeMap<DatasetHash, usize> = graph
            .order()
            .iter()
            .map(|hash| (*hash, graph.predecessors(*hash).count()))
            .collect();
        let mut ready: BTreeSet<DatasetHash> = outstanding
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(hash, _)| *hash)
            .collect();
        let mut in_flight: JoinSet<(DatasetHash, NodeOutcome)> = JoinSet::new();
        let mut finished: BTreeSet<DatasetHash> = BTreeSet::new();

        while finished.len() < graph.len() {
            // Dispatch everything ready, up to the worker budget.  A node
            // that resolves without running (skipped, blocked, cancelled)
            // frees its slot immediately.
            while in_flight.len() < self.config.max_workers {
                let Some(hash) = ready.pop_first() else {
                    break;
                };
                let task = graph.task(hash);

                if token.is_cancelled() {
                    Self::settle(
                        &graph,
                        &mut report,
                        &mut outstanding,
                        &mut ready,
                        &mut finished,
                        hash,
                        NodeOutcome::Cancelled,
                    );
                    continue;
                }

                let blocked: Vec<_> = graph
                    .predecessors(hash)
                    .filter_map(|pred| report.nodes.get(&pred))
                    .filter(|node| !node.outcome.is_ok())
                    .collect();
                match predispatch(task, blocked) {
                    Err(outcome) => {
                        Self::settle(
                            &graph,
                            &mut report,
                            &mut outstanding,
                            &mut ready,
                            &mut finished,
                            hash,
                            outcome,
                        );
                    }
                    Ok(()) => {
                        let task = Arc::clone(task);
                        let config = self.config;
                        in_flight.spawn(async move {
                            let outcome = run_in_pool(task, config).await;
                            (hash, outcome)
                        });
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                if ready.is_empty() && finished.len() < graph.len() {
                    return Err(RunnerError::GraphCycle);
                }
                // Nodes settled inline during dispatch; go schedule the
                // newly-ready ones.
                continue;
            };
            let (hash, outcome) = match joined {
                Ok(pair) => pair,
                // The wrapper task itself was lost; per-node panics are
                // already absorbed inside `run_in_pool`.
                Err(join_error) => return Err(RunnerError::WorkerLost {
                    detail: join_error.to_string(),
                }),
            };
            Self::settle(
                &graph,
                &mut report,
                &mut outstanding,
                &mut ready,
                &mut finished,
                hash,
                outcome,
            );
        }

        info!(
            target: "tide.runner",
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            blocked = report.blocked(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "parallel run finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn settle(
        graph: &ExecutionGraph,
        report: &mut RunReport,
        outstanding: &mut BTreeMap<DatasetHash, usize>,
        ready: &mut BTreeSet<DatasetHash>,
        finished: &mut BTreeSet<DatasetHash>,
        hash: DatasetHash,
        outcome: NodeOutcome,
    ) {
        report.record(graph.task(hash), outcome);
        finished.insert(hash);
        for dependent in graph.dependents(hash) {
            if let Some(n) = outstanding.get_mut(&dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }
}

/// Execute one node on the blocking pool, honouring the timeout.
async fn run_in_pool(task: Arc<Task>, config: RunnerConfig) -> NodeOutcome {
    let name = task.output().name().to_string();
    let worker = {
        let task = Arc::clone(&task);
        tokio::task::spawn_blocking(move || execute_node(&task, &config))
    };

    let joined = match config.task_timeout {
        Some(budget) => match tokio::time::timeout(budget, worker).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                // The blocking thread keeps running; it is abandoned, not
                // interrupted.
                return NodeOutcome::Failed {
                    report: ErrorReport::new(
                        ErrorCode::Timeout,
                        format!("exceeded wall-clock budget of {:?}", budget),
                    )
                    .with_context("task", name),
                };
            }
        },
        None => worker.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(join_error) if join_error.is_panic() => NodeOutcome::Failed {
            report: ErrorReport::new(ErrorCode::UserFunctionFailed, "task panicked")
                .with_context("task", name),
        },
        Err(join_error) => NodeOutcome::Failed {
            report: ErrorReport::new(ErrorCode::Internal, join_error.to_string())
                .with_context("task", name),
        },
    }
}
