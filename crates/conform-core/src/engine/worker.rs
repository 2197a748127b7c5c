use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::job::{JobRecord, JobReport};
use crate::domain::state::TaskStatus;
use crate::graph::TaskGraph;
use crate::ports::Clock;

use super::context::Services;
use super::executor::{execute_graph, task_reports};

/// A submitted job waiting for a worker.
pub(crate) struct QueuedJob {
    pub record: JobRecord,
    pub graph: TaskGraph,
    pub report: watch::Sender<JobReport>,
}

pub(crate) type Intake = Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;

/// Runs one job from start to finish on the calling worker.
pub(crate) struct JobRunner {
    pub services: Services,
    pub clock: Arc<dyn Clock>,
}

impl JobRunner {
    pub async fn run(&self, job: QueuedJob) {
        let QueuedJob {
            mut record,
            mut graph,
            report,
        } = job;
        let job_id = record.job_id;

        record.mark_running(self.clock.now());
        info!(job_id = %job_id, job = %record.name, tasks = graph.len(), "job started");
        report.send_replace(JobReport::new(&record, task_reports(&graph)));

        let ctx = self.services.context(job_id);
        execute_graph(&ctx, &mut graph).await;

        let statuses: Vec<TaskStatus> = graph.nodes().map(|n| n.status()).collect();
        record.update_status_from_tasks(&statuses);
        if !record.status.is_terminal() {
            warn!(job_id = %job_id, "job stalled with undecidable tasks");
            record.mark_failed();
        }

        // 通常は unlock タスクが解放済み。残っていれば強制解放する
        let leaked = self.services.locks.release_all(job_id);
        if !leaked.is_empty() {
            warn!(job_id = %job_id, count = leaked.len(), "released locks the job left behind");
        }

        record.mark_completed(self.clock.now());
        info!(job_id = %job_id, job = %record.name, status = ?record.status, "job finished");
        report.send_replace(JobReport::new(&record, task_reports(&graph)));
    }
}

/// Worker group handle.
/// - intake の送信側を drop すると、キューを捌き切ったワーカーから終了する
/// - `join()` で全ワーカーの終了を待てる
pub(crate) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one intake.
    pub fn spawn(n: usize, intake: Intake, runner: Arc<JobRunner>) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let intake = Arc::clone(&intake);
            let runner = Arc::clone(&runner);
            let join = tokio::spawn(async move {
                worker_loop(worker_id, intake, runner).await;
            });
            joins.push(join);
        }
        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, intake: Intake, runner: Arc<JobRunner>) {
    loop {
        // 受信待ちの間だけ intake を握る。ジョブ実行中は他のワーカーが受け取れる
        let next = {
            let mut rx = intake.lock().await;
            rx.recv().await
        };
        let Some(job) = next else {
            break;
        };
        debug!(worker_id, job_id = %job.record.job_id, "job leased");
        runner.run(job).await;
    }
    debug!(worker_id, "worker stopped");
}
