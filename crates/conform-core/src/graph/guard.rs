//! Task guards: predicates that gate a node once its predecessors are done.

use serde::{Deserialize, Serialize};

use crate::domain::state::TaskStatus;

/// Eligibility rule for a node.
///
/// A guard is only consulted once every direct predecessor is terminal.
/// "Predecessors" are the direct in-edges; "ancestors" are the full
/// transitive predecessor set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskGuard {
    /// Run only if every ancestor succeeded; otherwise skip.
    #[default]
    AllAncestorsSucceeded,

    /// Run only if every direct predecessor succeeded; otherwise skip.
    AllPredecessorsSucceeded,

    /// Run as soon as every direct predecessor is terminal, whatever the outcome.
    AllPredecessorsCompleted,
}

/// What the executor should do with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Some predecessor is not terminal yet.
    Wait,
    Run,
    Skip,
}

impl TaskGuard {
    /// `ancestors` is only called for [`TaskGuard::AllAncestorsSucceeded`].
    pub fn evaluate<F>(self, predecessors: &[TaskStatus], ancestors: F) -> GuardDecision
    where
        F: FnOnce() -> Vec<TaskStatus>,
    {
        if !predecessors.iter().all(|s| s.is_terminal()) {
            return GuardDecision::Wait;
        }
        let admitted = match self {
            TaskGuard::AllPredecessorsCompleted => true,
            TaskGuard::AllPredecessorsSucceeded => predecessors.iter().all(|s| s.is_succeeded()),
            TaskGuard::AllAncestorsSucceeded => ancestors().iter().all(|s| s.is_succeeded()),
        };
        if admitted {
            GuardDecision::Run
        } else {
            GuardDecision::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::domain::state::TaskStatus::*;

    #[rstest]
    #[case::ancestors_ok(TaskGuard::AllAncestorsSucceeded, vec![Succeeded], vec![Succeeded, Succeeded], GuardDecision::Run)]
    #[case::ancestor_failed(TaskGuard::AllAncestorsSucceeded, vec![Succeeded], vec![Failed, Succeeded], GuardDecision::Skip)]
    #[case::ancestor_skipped(TaskGuard::AllAncestorsSucceeded, vec![Skipped], vec![Skipped], GuardDecision::Skip)]
    #[case::preds_ok_despite_ancestor(TaskGuard::AllPredecessorsSucceeded, vec![Succeeded], vec![Failed, Succeeded], GuardDecision::Run)]
    #[case::pred_failed(TaskGuard::AllPredecessorsSucceeded, vec![Failed], vec![Failed], GuardDecision::Skip)]
    #[case::completed_after_failure(TaskGuard::AllPredecessorsCompleted, vec![Failed, Skipped], vec![Failed, Skipped], GuardDecision::Run)]
    #[case::still_running(TaskGuard::AllPredecessorsCompleted, vec![Succeeded, Running], vec![], GuardDecision::Wait)]
    #[case::not_started(TaskGuard::AllAncestorsSucceeded, vec![NotStarted], vec![], GuardDecision::Wait)]
    #[case::no_predecessors(TaskGuard::AllAncestorsSucceeded, vec![], vec![], GuardDecision::Run)]
    fn guard_decisions(
        #[case] guard: TaskGuard,
        #[case] predecessors: Vec<TaskStatus>,
        #[case] ancestors: Vec<TaskStatus>,
        #[case] expected: GuardDecision,
    ) {
        assert_eq!(guard.evaluate(&predecessors, || ancestors), expected);
    }

    #[test]
    fn default_guard_looks_at_ancestors() {
        assert_eq!(TaskGuard::default(), TaskGuard::AllAncestorsSucceeded);
    }

    #[test]
    fn completed_guard_never_walks_ancestors() {
        let decision = TaskGuard::AllPredecessorsCompleted
            .evaluate(&[Failed], || panic!("ancestors must not be computed"));
        assert_eq!(decision, GuardDecision::Run);
    }
}
