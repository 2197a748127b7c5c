//! Drives one TaskGraph to completion.
//!
//! Loop:
//! 1. `ready()` で guard が判定できるノードを挿入順に取得
//! 2. Skip -> SKIPPED、Run -> タスクごとのトランザクションで実行
//! 3. `Expand(child)` を返したら child をその場で splice
//! 4. 判定できるノードがなくなるまで繰り返す
//!
//! A task error never leaves this loop; it lands on the node as FAILED and
//! each dependent is judged by its own guard.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::errors::ConformError;
use crate::domain::ids::TaskId;
use crate::domain::job::TaskReport;
use crate::domain::state::TaskStatus;
use crate::graph::{GuardDecision, TaskGraph};
use crate::task::{Task, TaskOutcome};

use super::context::TaskContext;

/// Run every decidable node of `graph`. Returns once nothing is ready.
///
/// Ready nodes run one at a time. With acyclic graphs and total guards every
/// node ends terminal; a node left NOT_STARTED means the graph was malformed.
pub async fn execute_graph(ctx: &TaskContext, graph: &mut TaskGraph) {
    loop {
        let ready = graph.ready();
        if ready.is_empty() {
            break;
        }
        for (id, _) in ready {
            // an earlier node of this batch may have spliced in new predecessors
            match graph.decide(id) {
                GuardDecision::Wait => continue,
                GuardDecision::Skip => {
                    if let Some(node) = graph.node(id) {
                        info!(job_id = %ctx.job_id, task = %node.name(), "task skipped");
                    }
                    graph.set_status(id, TaskStatus::Skipped);
                }
                GuardDecision::Run => run_node(ctx, graph, id).await,
            }
        }
    }
}

async fn run_node(ctx: &TaskContext, graph: &mut TaskGraph, id: TaskId) {
    let Some(node) = graph.node(id) else {
        return;
    };
    let task = Arc::clone(node.task());
    let name = node.name();

    graph.set_status(id, TaskStatus::Running);
    debug!(job_id = %ctx.job_id, task = %name, kind = ?task.kind(), "task started");

    let result = run_in_transaction(ctx, task).await;

    match result {
        Ok(TaskOutcome::Done) => {
            graph.set_status(id, TaskStatus::Succeeded);
            info!(job_id = %ctx.job_id, task = %name, "task succeeded");
        }
        Ok(TaskOutcome::Expand(child)) => {
            graph.set_status(id, TaskStatus::Succeeded);
            if child.is_empty() {
                info!(job_id = %ctx.job_id, task = %name, "task succeeded");
                return;
            }
            let spliced = child.validate().and_then(|()| graph.splice(id, child));
            match spliced {
                Ok(count) => {
                    info!(job_id = %ctx.job_id, task = %name, count, "subgraph spliced");
                }
                Err(e) => {
                    warn!(job_id = %ctx.job_id, task = %name, error = %e, "subgraph rejected");
                    graph.set_failed(id, e);
                }
            }
        }
        Err(e) => {
            warn!(job_id = %ctx.job_id, task = %name, error = %e, "task failed");
            graph.set_failed(id, e);
        }
    }
}

/// Open a transaction, run `task`, commit on success, roll back on error.
///
/// The task runs on its own tokio task so a panic is caught at this boundary
/// and reported as `Unexpected`; the dropped transaction is never committed.
/// A failed commit fails the task.
async fn run_in_transaction(
    ctx: &TaskContext,
    task: Arc<dyn Task>,
) -> Result<TaskOutcome, ConformError> {
    let tx = ctx.repository.begin().await?;
    let task_ctx = ctx.clone();
    let joined = tokio::spawn(async move {
        let mut tx = tx;
        match task.execute(&task_ctx, tx.as_mut()).await {
            Ok(outcome) => tx.commit().await.map(|()| outcome),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(job_id = %task_ctx.job_id, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ConformError::unexpected(format!(
            "task panicked: {}",
            panic_message(&*e.into_panic())
        ))),
        Err(e) => Err(ConformError::unexpected(format!("task was cancelled: {e}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Per-task diagnostics in execution order.
pub fn task_reports(graph: &TaskGraph) -> Vec<TaskReport> {
    graph
        .nodes()
        .map(|node| TaskReport {
            id: node.id(),
            name: node.name(),
            kind: node.kind(),
            guard: node.guard(),
            status: node.status(),
            error: node.error().map(ToString::to_string),
            error_kind: node.error().map(ConformError::kind),
            injected_by: node.injected_by(),
        })
        .collect()
}
