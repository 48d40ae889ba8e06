// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph discovery and deterministic topological ordering.

use crate::RunnerError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tide_meta::DatasetHash;
use tide_task::{Task, Upstream};

/// The executable subgraph reachable from a set of target tasks.
///
/// Only constructed tasks become nodes; external inputs stay edges and are
/// checked by the tasks that reference them.  Ordering is deterministic:
/// Kahn's algorithm with ties broken by metadata hash.
pub(crate) struct ExecutionGraph {
    nodes: BTreeMap<DatasetHash, Arc<Task>>,
    predecessors: BTreeMap<DatasetHash, BTreeSet<DatasetHash>>,
    dependents: BTreeMap<DatasetHash, BTreeSet<DatasetHash>>,
    order: Vec<DatasetHash>,
}

impl ExecutionGraph {
    pub(crate) fn discover(targets: &[Arc<Task>]) -> Result<Self, RunnerError> {
        let mut nodes: BTreeMap<DatasetHash, Arc<Task>> = BTreeMap::new();
        let mut stack: Vec<Arc<Task>> = targets.to_vec();
        while let Some(task) = stack.pop() {
            let hash = task.output().hash();
            if nodes.contains_key(&hash) {
                continue;
            }
            for dep in task.dependencies().values() {
                if let Upstream::Task(upstream) = dep.upstream() {
                    stack.push(Arc::clone(upstream));
                }
            }
            nodes.insert(hash, task);
        }

        let mut predecessors: BTreeMap<DatasetHash, BTreeSet<DatasetHash>> = BTreeMap::new();
        let mut dependents: BTreeMap<DatasetHash, BTreeSet<DatasetHash>> = BTreeMap::new();
        for (hash, task) in &nodes {
            let preds = predecessors.entry(*hash).or_default();
            for dep in task.dependencies().values() {
                if let Upstream::Task(upstream) = dep.upstream() {
                    let up_hash = upstream.output().hash();
                    preds.insert(up_hash);
                    dependents.entry(up_hash).or_default().insert(*hash);
                }
            }
        }

        // Kahn's algorithm over hash-sorted sets: reproducible order.
        let mut indegree: BTreeMap<DatasetHash, usize> = predecessors
            .iter()
            .map(|(hash, preds)| (*hash, preds.len()))
            .collect();
        let mut ready: BTreeSet<DatasetHash> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(hash, _)| *hash)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(hash) = ready.pop_first() {
            order.push(hash);
            if let Some(downstream) = dependents.get(&hash) {
                for dependent in downstream {
                    let n = indegree
                        .get_mut(dependent)
                        .ok_or(RunnerError::GraphCycle)?;
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        if order.len() != nodes.len() {
            return Err(RunnerError::GraphCycle);
        }

        Ok(Self {
            nodes,
            predecessors,
            dependents,
            order,
        })
    }

    pub(crate) fn order(&self) -> &[DatasetHash] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn task(&self, hash: DatasetHash) -> &Arc<Task> {
        &self.nodes[&hash]
    }

    pub(crate) fn predecessors(&self, hash: DatasetHash) -> impl Iterator<Item = DatasetHash> + '_ {
        self.predecessors
            .get(&hash)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub(crate) fn dependents(&self, hash: DatasetHash) -> impl Iterator<Item = DatasetHash> + '_ {
        self.dependents
            .get(&hash)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }
}
