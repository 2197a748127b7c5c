//! State - タスクとジョブの状態

use serde::{Deserialize, Serialize};

/// Task status inside one job's graph.
///
/// State transitions:
/// - NotStarted -> Running -> Succeeded
/// - NotStarted -> Running -> Failed
/// - NotStarted -> Skipped (guard evaluated false)
///
/// There is no retry edge; re-running reconciliation is the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn is_succeeded(self) -> bool {
        self == TaskStatus::Succeeded
    }
}

/// Job lifecycle status.
///
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}
