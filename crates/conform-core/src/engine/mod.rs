//! Job engine: intake, worker pool and job handles.
//!
//! `submit` validates the graph and queues it; a worker from the pool runs it
//! to completion (see [`executor`]). Callers observe progress through a
//! [`JobHandle`], which is backed by a `watch` channel the worker updates when
//! the job starts and when it finishes.

pub mod builder;
pub mod context;
pub mod executor;
pub(crate) mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::domain::errors::ConformError;
use crate::domain::ids::JobId;
use crate::domain::job::{FailedTask, JobRecord, JobReport};
use crate::domain::state::JobStatus;
use crate::graph::TaskGraph;
use crate::lock::LockRegistry;
use crate::observability::{EngineCounts, EngineStatus};
use crate::ports::{CapabilityFactory, Clock, IdGenerator, Repository};
use crate::task::Task;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::context::{Services, TaskContext};

use self::executor::task_reports;
use self::worker::{JobRunner, QueuedJob, WorkerGroup};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keep at most `keep` finished jobs, dropping the earliest completed. 0 keeps all.
fn prune_finished(jobs: &mut HashMap<JobId, watch::Receiver<JobReport>>, keep: usize) {
    if keep == 0 {
        return;
    }
    let mut finished: Vec<_> = jobs
        .iter()
        .filter_map(|(id, rx)| {
            let report = rx.borrow();
            report
                .status
                .is_terminal()
                .then(|| (report.completed_at, *id))
        })
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!(dropped = excess, "pruned finished jobs");
}

/// Caller's view of one submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    name: String,
    rx: watch::Receiver<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status without waiting.
    pub fn status(&self) -> JobStatus {
        self.rx.borrow().status
    }

    /// Latest report. Task statuses are only filled in once the job ends.
    pub fn report(&self) -> JobReport {
        self.rx.borrow().clone()
    }

    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        self.rx.borrow().failed_tasks.clone()
    }

    /// Wait for the job to finish and return its final report.
    pub async fn wait(&self) -> JobReport {
        let mut rx = self.rx.clone();
        match rx.wait_for(|report| report.status.is_terminal()).await {
            Ok(report) => report.clone(),
            // worker went away; hand back whatever was last published
            Err(_) => self.rx.borrow().clone(),
        }
    }
}

pub struct JobEngine {
    config: EngineConfig,
    services: Services,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    intake: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    workers: Mutex<Option<WorkerGroup>>,
    worker_count: usize,
    jobs: Mutex<HashMap<JobId, watch::Receiver<JobReport>>>,
}

impl JobEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn start(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        capabilities: Arc<dyn CapabilityFactory>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        let services = Services {
            repository,
            capabilities,
            locks,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Arc::new(JobRunner {
            services: services.clone(),
            clock: Arc::clone(&clock),
        });
        let workers = WorkerGroup::spawn(
            config.worker_pool_size,
            Arc::new(tokio::sync::Mutex::new(rx)),
            runner,
        );
        info!(workers = workers.len(), "job engine started");

        Self {
            worker_count: workers.len(),
            config,
            services,
            clock,
            ids,
            intake: Mutex::new(Some(tx)),
            workers: Mutex::new(Some(workers)),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.services.locks
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.services.repository
    }

    pub fn capabilities(&self) -> &Arc<dyn CapabilityFactory> {
        &self.services.capabilities
    }

    /// Context for work done on behalf of `job_id` outside a worker, such
    /// as building the root graph.
    pub fn context(&self, job_id: JobId) -> TaskContext {
        self.services.context(job_id)
    }

    /// Allocate the id a job will run under. Locks taken before `submit`
    /// must be owned by this id.
    pub fn new_job_id(&self) -> JobId {
        self.ids.generate_job_id()
    }

    /// Queue `graph` as job `job_id`.
    ///
    /// Rejects with `Validation` an empty graph, a cyclic graph, a reused job
    /// id, or an engine that has been shut down.
    pub fn submit(
        &self,
        job_id: JobId,
        name: impl Into<String>,
        graph: TaskGraph,
    ) -> Result<JobHandle, ConformError> {
        let name = name.into();
        if graph.is_empty() {
            return Err(ConformError::validation(format!(
                "job '{name}' has no tasks"
            )));
        }
        graph.validate()?;

        let record = JobRecord::new(job_id, name.clone(), self.clock.now());
        let (report_tx, report_rx) = watch::channel(JobReport::new(&record, task_reports(&graph)));
        let tasks = graph.len();

        let intake = locked(&self.intake);
        let Some(sender) = intake.as_ref() else {
            return Err(ConformError::validation("job engine is shut down"));
        };
        {
            let mut jobs = locked(&self.jobs);
            if jobs.contains_key(&job_id) {
                return Err(ConformError::validation(format!(
                    "job {job_id} was already submitted"
                )));
            }
            prune_finished(&mut jobs, self.config.retained_jobs);
            jobs.insert(job_id, report_rx.clone());
        }
        let queued = QueuedJob {
            record,
            graph,
            report: report_tx,
        };
        if sender.send(queued).is_err() {
            locked(&self.jobs).remove(&job_id);
            return Err(ConformError::unexpected("job intake is closed"));
        }
        info!(job_id = %job_id, job = %name, tasks, "job submitted");

        Ok(JobHandle {
            job_id,
            name,
            rx: report_rx,
        })
    }

    /// Submit a single task (typically a root meta-task) as its own job.
    pub fn submit_task<T: Task + 'static>(&self, task: T) -> Result<JobHandle, ConformError> {
        let name = task.name();
        let mut graph = TaskGraph::new();
        graph.add_task(task);
        self.submit(self.new_job_id(), name, graph)
    }

    pub fn job(&self, job_id: JobId) -> Option<JobHandle> {
        let jobs = locked(&self.jobs);
        let rx = jobs.get(&job_id)?.clone();
        let name = rx.borrow().name.clone();
        Some(JobHandle { job_id, name, rx })
    }

    /// Drop a finished job from the engine's bookkeeping. Handles already
    /// given out keep working. Returns false for unknown or unfinished jobs.
    pub fn forget(&self, job_id: JobId) -> bool {
        let mut jobs = locked(&self.jobs);
        let finished = jobs
            .get(&job_id)
            .is_some_and(|rx| rx.borrow().status.is_terminal());
        if finished {
            jobs.remove(&job_id);
        }
        finished
    }

    pub fn counts(&self) -> EngineCounts {
        let jobs = locked(&self.jobs);
        let mut counts = EngineCounts::default();
        for rx in jobs.values() {
            counts.record(rx.borrow().status);
        }
        counts
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            jobs: self.counts(),
            locks: self.services.locks.snapshot(),
        }
    }

    /// Stop accepting jobs, let the workers drain what is queued, and wait
    /// for them. Calling it twice is harmless.
    pub async fn shutdown(&self) {
        locked(&self.intake).take();
        let workers = locked(&self.workers).take();
        if let Some(workers) = workers {
            workers.join().await;
            info!("job engine stopped");
        }
    }
}
