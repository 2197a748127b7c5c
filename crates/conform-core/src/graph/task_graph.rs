//! TaskGraph: nodes, guarded edges, composition and splicing.
//!
//! Composition rules:
//! - `add_task` attaches an independent root (parallel composition).
//! - `append_task` makes the new node a successor of every current leaf
//!   (sequential composition).
//! - `append_graph` / `add_graph` do the same for whole graphs.
//! - `splice` injects a meta-task's child graph after the meta-task; every
//!   former successor of the meta-task now waits for the child's leaves.
//!
//! Every in-edge of a node carries that node's guard. None of the operations
//! above can close a cycle, so the graph is acyclic by construction;
//! `validate` re-checks it before a job is accepted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::errors::ConformError;
use crate::domain::ids::TaskId;
use crate::domain::state::TaskStatus;
use crate::task::{Task, TaskKind};

use super::dependency::DependencyGraph;
use super::guard::{GuardDecision, TaskGuard};

/// A task plus the per-run state the executor tracks for it.
pub struct TaskNode {
    id: TaskId,
    task: Arc<dyn Task>,
    guard: TaskGuard,
    status: TaskStatus,
    error: Option<ConformError>,
    /// Meta-task whose subgraph introduced this node.
    injected_by: Option<TaskId>,
}

impl TaskNode {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn name(&self) -> String {
        self.task.name()
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    pub fn guard(&self) -> TaskGuard {
        self.guard
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ConformError> {
        self.error.as_ref()
    }

    pub fn injected_by(&self) -> Option<TaskId> {
        self.injected_by
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.task.name())
            .field("guard", &self.guard)
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct TaskGraph {
    /// Insertion order. Ready nodes are run in this order.
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, TaskNode>,
    deps: DependencyGraph,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, task: Arc<dyn Task>, guard: TaskGuard) -> TaskId {
        let id = TaskId::generate();
        self.order.push(id);
        self.nodes.insert(
            id,
            TaskNode {
                id,
                task,
                guard,
                status: TaskStatus::NotStarted,
                error: None,
                injected_by: None,
            },
        );
        id
    }

    /// Attach `task` as an independent root.
    pub fn add_task<T: Task + 'static>(&mut self, task: T) -> TaskId {
        self.add_shared(Arc::new(task))
    }

    pub fn add_shared(&mut self, task: Arc<dyn Task>) -> TaskId {
        self.insert(task, TaskGuard::default())
    }

    /// Attach `task` after every current leaf, guarded `AllAncestorsSucceeded`.
    pub fn append_task<T: Task + 'static>(&mut self, task: T) -> TaskId {
        self.append_task_with_guard(task, TaskGuard::default())
    }

    pub fn append_task_with_guard<T: Task + 'static>(&mut self, task: T, guard: TaskGuard) -> TaskId {
        self.append_shared(Arc::new(task), guard)
    }

    pub fn append_shared(&mut self, task: Arc<dyn Task>, guard: TaskGuard) -> TaskId {
        let leaves = self.leaves();
        let id = self.insert(task, guard);
        for leaf in leaves {
            self.deps.add_dependency(id, leaf);
        }
        id
    }

    /// Attach `task` after exactly `predecessors`.
    pub fn add_task_after<T: Task + 'static>(
        &mut self,
        task: T,
        guard: TaskGuard,
        predecessors: &[TaskId],
    ) -> Result<TaskId, ConformError> {
        if let Some(unknown) = predecessors.iter().find(|p| !self.nodes.contains_key(p)) {
            return Err(ConformError::validation(format!(
                "predecessor {unknown} is not part of this graph"
            )));
        }
        let id = self.insert(Arc::new(task), guard);
        for pred in predecessors {
            self.deps.add_dependency(id, *pred);
        }
        Ok(id)
    }

    /// Sequential composition of graphs: `other`'s roots wait for the current leaves.
    pub fn append_graph(&mut self, other: TaskGraph) {
        let leaves = self.leaves();
        let roots = other.roots();
        let ids = self.absorb(other, None);
        self.order.extend(ids);
        for root in roots {
            for leaf in &leaves {
                self.deps.add_dependency(root, *leaf);
            }
        }
    }

    /// Parallel composition of graphs: `other` is added beside the current nodes.
    pub fn add_graph(&mut self, other: TaskGraph) {
        let ids = self.absorb(other, None);
        self.order.extend(ids);
    }

    /// Moves `other`'s nodes and edges in. The caller places the returned ids in `order`.
    fn absorb(&mut self, other: TaskGraph, injected_by: Option<TaskId>) -> Vec<TaskId> {
        let TaskGraph { order, mut nodes, deps } = other;
        for id in &order {
            if let Some(mut node) = nodes.remove(id) {
                if node.injected_by.is_none() {
                    node.injected_by = injected_by;
                }
                self.nodes.insert(*id, node);
            }
        }
        self.deps.merge(deps);
        order
    }

    /// Inject `child` in place of `meta`.
    ///
    /// `meta` stays in the graph as the (already finished) predecessor of the
    /// child's roots, and each edge `successor -> meta` becomes
    /// `successor -> leaf` for every child leaf. The successor keeps its own
    /// guard, so downstream guard annotations are preserved. Returns the
    /// number of nodes injected.
    pub fn splice(&mut self, meta: TaskId, child: TaskGraph) -> Result<usize, ConformError> {
        let Some(position) = self.order.iter().position(|id| *id == meta) else {
            return Err(ConformError::unexpected(format!(
                "cannot splice into {meta}: not part of this graph"
            )));
        };
        if child.is_empty() {
            return Ok(0);
        }

        let roots = child.roots();
        let leaves = child.leaves();
        let successors = self.deps.get_dependents(meta);

        let injected = self.absorb(child, Some(meta));
        let count = injected.len();
        self.order.splice(position + 1..position + 1, injected);

        for root in roots {
            self.deps.add_dependency(root, meta);
        }
        for successor in successors {
            self.deps.remove_dependency(successor, meta);
            for leaf in &leaves {
                self.deps.add_dependency(successor, *leaf);
            }
        }
        Ok(count)
    }

    /// Nodes nothing depends on, in insertion order.
    pub fn leaves(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.deps.has_dependents(*id))
            .collect()
    }

    /// Nodes with no predecessors, in insertion order.
    pub fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.deps.has_dependencies(*id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.sorted(self.deps.get_dependencies(id))
    }

    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.sorted(self.deps.get_dependents(id))
    }

    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        self.sorted(self.deps.ancestors(id).into_iter().collect())
    }

    fn sorted(&self, mut ids: Vec<TaskId>) -> Vec<TaskId> {
        let rank: HashMap<TaskId, usize> =
            self.order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        ids.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
        ids
    }

    /// Rejects graphs whose edges form a cycle.
    pub fn validate(&self) -> Result<(), ConformError> {
        match self.deps.detect_cycle(&self.order) {
            None => Ok(()),
            Some(stuck) => {
                let names: Vec<String> = stuck
                    .iter()
                    .filter_map(|id| self.nodes.get(id).map(TaskNode::name))
                    .collect();
                Err(ConformError::validation(format!(
                    "task graph contains a cycle through: {}",
                    names.join(", ")
                )))
            }
        }
    }

    fn status_of(&self, id: TaskId) -> TaskStatus {
        self.nodes
            .get(&id)
            .map_or(TaskStatus::NotStarted, |n| n.status)
    }

    /// Evaluate the guard of `id` against the current statuses.
    ///
    /// For a spliced node the ancestor set ends at the meta-task that injected
    /// it: the meta-task counts, whatever ran before the meta-task does not.
    pub fn decide(&self, id: TaskId) -> GuardDecision {
        let Some(node) = self.nodes.get(&id) else {
            return GuardDecision::Wait;
        };
        let predecessors: Vec<TaskStatus> = self
            .deps
            .get_dependencies(id)
            .into_iter()
            .map(|p| self.status_of(p))
            .collect();
        node.guard.evaluate(&predecessors, || {
            self.deps
                .ancestors_until(id, node.injected_by)
                .into_iter()
                .map(|a| self.status_of(a))
                .collect()
        })
    }

    /// Not-started nodes whose guard can be decided now, in insertion order.
    pub fn ready(&self) -> Vec<(TaskId, GuardDecision)> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.status_of(*id) == TaskStatus::NotStarted)
            .filter_map(|id| match self.decide(id) {
                GuardDecision::Wait => None,
                decision => Some((id, decision)),
            })
            .collect()
    }

    pub(crate) fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = status;
        }
    }

    pub(crate) fn set_failed(&mut self, id: TaskId, error: ConformError) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = TaskStatus::Failed;
            node.error = Some(error);
        }
    }
}
