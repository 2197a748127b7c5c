//! Job record and report views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::TaskGuard;
use crate::task::TaskKind;

use super::errors::ErrorKind;
use super::ids::{JobId, TaskId};
use super::state::{JobStatus, TaskStatus};

/// Job record: lifecycle of one reconciliation run.
///
/// State transitions happen via methods, not direct field access.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: JobId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            name: name.into(),
            status: JobStatus::Queued,
            queued_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
    }

    /// Update job status from the statuses of every task in its graph.
    ///
    /// SUCCEEDED only if every task succeeded; FAILED once everything is
    /// terminal and something did not succeed; RUNNING otherwise.
    pub fn update_status_from_tasks(&mut self, task_statuses: &[TaskStatus]) {
        self.status = if task_statuses.iter().all(|s| s.is_succeeded()) {
            JobStatus::Succeeded
        } else if task_statuses.iter().any(|s| !s.is_terminal()) {
            JobStatus::Running
        } else {
            JobStatus::Failed
        };
    }

    /// Force FAILED. Used when no task can make progress any more.
    pub fn mark_failed(&mut self) {
        self.status = JobStatus::Failed;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
    }
}

/// Per-task diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub guard: TaskGuard,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Meta-task whose subgraph introduced this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected_by: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub name: String,
    pub message: String,
}

/// Job result for callers: aggregate status plus per-task diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskReport>,
    pub failed_tasks: Vec<FailedTask>,
}

impl JobReport {
    pub fn new(record: &JobRecord, tasks: Vec<TaskReport>) -> Self {
        let failed_tasks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| FailedTask {
                name: t.name.clone(),
                message: t.error.clone().unwrap_or_default(),
            })
            .collect();
        Self {
            job_id: record.job_id,
            name: record.name.clone(),
            status: record.status,
            queued_at: record.queued_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            tasks,
            failed_tasks,
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Corrective tasks that actually ran (succeeded or failed).
    pub fn executed_corrective_tasks(&self) -> Vec<&TaskReport> {
        self.tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Corrective)
            .filter(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Failed))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record() -> JobRecord {
        JobRecord::new(JobId::generate(), "conform vs-1", Utc::now())
    }

    #[test]
    fn new_job_starts_queued() {
        let job = record();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
    }

    #[rstest]
    #[case::all_succeeded(vec![TaskStatus::Succeeded, TaskStatus::Succeeded], JobStatus::Succeeded)]
    #[case::one_failed(vec![TaskStatus::Succeeded, TaskStatus::Failed], JobStatus::Failed)]
    #[case::skipped_counts_as_not_succeeded(vec![TaskStatus::Failed, TaskStatus::Skipped], JobStatus::Failed)]
    #[case::still_running(vec![TaskStatus::Failed, TaskStatus::Running], JobStatus::Running)]
    #[case::not_started(vec![TaskStatus::Succeeded, TaskStatus::NotStarted], JobStatus::Running)]
    fn status_from_tasks(#[case] statuses: Vec<TaskStatus>, #[case] expected: JobStatus) {
        let mut job = record();
        job.update_status_from_tasks(&statuses);
        assert_eq!(job.status, expected);
    }

    #[test]
    fn report_lists_failed_tasks_with_messages() {
        let mut job = record();
        job.update_status_from_tasks(&[TaskStatus::Failed, TaskStatus::Succeeded]);
        let tasks = vec![
            TaskReport {
                id: TaskId::generate(),
                name: "Create device".to_string(),
                kind: TaskKind::Corrective,
                guard: TaskGuard::AllAncestorsSucceeded,
                status: TaskStatus::Failed,
                error: Some("appliance-manager call failed: timeout".to_string()),
                error_kind: Some(ErrorKind::ExternalSystem),
                injected_by: None,
            },
            TaskReport {
                id: TaskId::generate(),
                name: "Release locks".to_string(),
                kind: TaskKind::Unlock,
                guard: TaskGuard::AllPredecessorsCompleted,
                status: TaskStatus::Succeeded,
                error: None,
                error_kind: None,
                injected_by: None,
            },
        ];

        let report = JobReport::new(&job, tasks);

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(
            report.failed_tasks,
            vec![FailedTask {
                name: "Create device".to_string(),
                message: "appliance-manager call failed: timeout".to_string(),
            }]
        );
        assert_eq!(report.executed_corrective_tasks().len(), 1);
        assert_eq!(report.count(TaskStatus::Succeeded), 1);

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["status"], "FAILED");
        assert_eq!(v["tasks"][1]["kind"], "unlock");
    }
}
