//! Units of work.
//!
//! A [`Task`] is an immutable value built from (context, domain arguments) at
//! the moment a meta-task decides it is needed. The executor owns all mutable
//! per-run state (status, error) on the graph node, not on the task.
//!
//! A meta-task is just a task whose execution returns
//! [`TaskOutcome::Expand`]; splicing is centralized in the executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ConformError;
use crate::engine::context::TaskContext;
use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;
use crate::ports::Transaction;

pub mod builtin;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builtin::{FailedWithContextTask, UnlockObjectsTask};

/// Role of a task, used for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Changes desired-state storage or an external system.
    Corrective,
    /// Reads state and yields a subgraph.
    Meta,
    /// Gives a job's locks back.
    Unlock,
    /// Stands in for a branch that could not be synthesized.
    Placeholder,
}

/// Result of a successful execution.
pub enum TaskOutcome {
    Done,
    /// Splice this graph in after the task. An empty graph behaves like `Done`.
    Expand(TaskGraph),
}

impl std::fmt::Debug for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Done => f.write_str("Done"),
            TaskOutcome::Expand(graph) => write!(f, "Expand({} tasks)", graph.len()),
        }
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    /// Human-readable name shown in job diagnostics.
    fn name(&self) -> String;

    fn kind(&self) -> TaskKind {
        TaskKind::Corrective
    }

    /// References this task reads or mutates. The job must hold a lock on each.
    fn objects(&self) -> Vec<LockObjectReference> {
        Vec::new()
    }

    /// Runs inside a transaction the executor opened for this task alone.
    /// Returning `Err` rolls the transaction back and marks the node FAILED.
    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError>;
}
