//! Dependency bookkeeping for a task graph.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (its predecessors)
//! - Reverse edges: task -> tasks that depend on it (its successors)
//! - Invariant: edges and reverse_edges must be kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::ids::TaskId;

/// Dependency graph with forward and reverse edges for O(1) lookups in both directions.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on (waits for)
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: `task` depends on `depends_on`.
    ///
    /// Example: add_dependency(task_b, task_a) means "B waits for A"
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// Remove a dependency: `task` no longer depends on `depends_on`.
    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Absorb every edge of `other`. Node sets are assumed disjoint.
    pub fn merge(&mut self, other: DependencyGraph) {
        for (task, deps) in other.edges {
            for dep in deps {
                self.add_dependency(task, dep);
            }
        }
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges.get(&task).is_some_and(|deps| !deps.is_empty())
    }

    pub fn has_dependents(&self, task: TaskId) -> bool {
        self.reverse_edges
            .get(&task)
            .is_some_and(|waiting| !waiting.is_empty())
    }

    /// Direct predecessors of `task`.
    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct successors of `task`.
    pub fn get_dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Full transitive predecessor set of `task` (excluding `task`).
    pub fn ancestors(&self, task: TaskId) -> HashSet<TaskId> {
        self.ancestors_until(task, None)
    }

    /// Like [`Self::ancestors`], but the walk does not continue past
    /// `boundary`. The boundary itself is included when reached.
    pub fn ancestors_until(&self, task: TaskId, boundary: Option<TaskId>) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut frontier: VecDeque<TaskId> = self.get_dependencies(task).into();
        while let Some(node) = frontier.pop_front() {
            if seen.insert(node) && Some(node) != boundary {
                frontier.extend(self.get_dependencies(node));
            }
        }
        seen
    }

    /// Detect a cycle among `nodes` using Kahn's algorithm.
    ///
    /// Returns the nodes that could not be ordered (every cycle plus anything
    /// downstream of one), or `None` if the graph is a DAG.
    pub fn detect_cycle(&self, nodes: &[TaskId]) -> Option<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = nodes
            .iter()
            .map(|id| (*id, self.edges.get(id).map_or(0, HashSet::len)))
            .collect();

        let mut ready: VecDeque<TaskId> = nodes
            .iter()
            .copied()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut ordered = 0;
        while let Some(node) = ready.pop_front() {
            ordered += 1;
            for dependent in self.get_dependents(node) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if ordered == nodes.len() {
            None
        } else {
            Some(
                nodes
                    .iter()
                    .copied()
                    .filter(|id| in_degree.get(id).is_some_and(|d| *d > 0))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<const N: usize>() -> [TaskId; N] {
        std::array::from_fn(|_| TaskId::generate())
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_dependency(b, a); // B depends on A

        assert!(graph.has_dependencies(b));
        assert!(!graph.has_dependencies(a));
        assert_eq!(graph.get_dependencies(b), vec![a]);
        assert_eq!(graph.get_dependents(a), vec![b]);
    }

    #[test]
    fn remove_dependency_removes_both_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_dependency(b, a);
        graph.remove_dependency(b, a);

        assert!(!graph.has_dependencies(b));
        assert!(!graph.has_dependents(a));
    }

    #[test]
    fn ancestors_are_transitive() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // A -> B -> D, C -> D
        graph.add_dependency(b, a);
        graph.add_dependency(d, b);
        graph.add_dependency(d, c);

        let ancestors = graph.ancestors(d);
        assert_eq!(ancestors, HashSet::from([a, b, c]));
        assert!(graph.ancestors(a).is_empty());
    }

    #[test]
    fn bounded_ancestor_walk_stops_at_the_boundary() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // A -> B -> C -> D
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);

        assert_eq!(graph.ancestors_until(d, Some(b)), HashSet::from([b, c]));
        assert_eq!(graph.ancestors_until(d, None), HashSet::from([a, b, c]));
    }

    #[test]
    fn detect_simple_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        let cycle = graph.detect_cycle(&[a, b]).unwrap();
        assert_eq!(cycle.len(), 2);
    }

    #[test]
    fn detect_self_dependency() {
        let mut graph = DependencyGraph::new();
        let [a] = ids();

        graph.add_dependency(a, a);

        assert!(graph.detect_cycle(&[a]).is_some());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        //     A
        //    / \
        //   B   C
        //    \ /
        //     D
        graph.add_dependency(b, a);
        graph.add_dependency(c, a);
        graph.add_dependency(d, b);
        graph.add_dependency(d, c);

        assert!(graph.detect_cycle(&[a, b, c, d]).is_none());
    }

    #[test]
    fn longer_cycle_reports_its_members() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // A -> B -> C -> D -> B
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);
        graph.add_dependency(b, d);

        let stuck = graph.detect_cycle(&[a, b, c, d]).unwrap();
        assert!(!stuck.contains(&a));
        assert!(stuck.contains(&b) && stuck.contains(&c) && stuck.contains(&d));
    }

    #[test]
    fn merge_keeps_edges_in_sync() {
        let [a, b, c] = ids();
        let mut left = DependencyGraph::new();
        left.add_dependency(b, a);
        let mut right = DependencyGraph::new();
        right.add_dependency(c, b);

        left.merge(right);

        assert_eq!(left.get_dependents(b), vec![c]);
        assert_eq!(left.ancestors(c), HashSet::from([a, b]));
    }
}
