//! Test doubles shared by the graph, executor and engine tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::errors::ConformError;
use crate::domain::ids::JobId;
use crate::engine::TaskContext;
use crate::graph::TaskGraph;
use crate::impls::{InMemoryRepository, StaticCapabilityFactory};
use crate::lock::{LockMode, LockObjectReference, LockRegistry};
use crate::ports::Transaction;

use super::{Task, TaskKind, TaskOutcome};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A context over empty in-memory collaborators.
pub fn context() -> TaskContext {
    TaskContext {
        job_id: JobId::generate(),
        repository: Arc::new(InMemoryRepository::new()),
        capabilities: Arc::new(StaticCapabilityFactory::new()),
        locks: Arc::new(LockRegistry::default()),
    }
}

enum Behavior {
    Succeed,
    Fail,
    Expand(Mutex<Option<TaskGraph>>),
}

/// Records its name in a shared log when executed.
pub struct Step {
    name: String,
    log: Log,
    behavior: Behavior,
}

impl Step {
    pub fn ok(name: &str, log: &Log) -> Self {
        Self::with(name, log, Behavior::Succeed)
    }

    pub fn failing(name: &str, log: &Log) -> Self {
        Self::with(name, log, Behavior::Fail)
    }

    /// Expands into `child` the first time it runs.
    pub fn meta(name: &str, log: &Log, child: TaskGraph) -> Self {
        Self::with(name, log, Behavior::Expand(Mutex::new(Some(child))))
    }

    fn with(name: &str, log: &Log, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            behavior,
        }
    }
}

#[async_trait]
impl Task for Step {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> TaskKind {
        match self.behavior {
            Behavior::Expand(_) => TaskKind::Meta,
            _ => TaskKind::Corrective,
        }
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        self.log.lock().unwrap().push(self.name.clone());
        match &self.behavior {
            Behavior::Succeed => Ok(TaskOutcome::Done),
            Behavior::Fail => Err(ConformError::unexpected(format!("{} failed", self.name))),
            Behavior::Expand(child) => Ok(child
                .lock()
                .unwrap()
                .take()
                .map_or(TaskOutcome::Done, TaskOutcome::Expand)),
        }
    }
}

/// Blocks its tasks until `open` is called.
#[derive(Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn closed() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn task(&self, name: &str) -> GateTask {
        GateTask {
            name: name.to_string(),
            gate: self.clone(),
        }
    }
}

pub struct GateTask {
    name: String,
    gate: Gate,
}

#[async_trait]
impl Task for GateTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let _permit = self
            .gate
            .permits
            .acquire()
            .await
            .map_err(|e| ConformError::unexpected(e.to_string()))?;
        Ok(TaskOutcome::Done)
    }
}

/// Takes a lock for the running job and never gives it back.
pub struct TakeLock {
    reference: LockObjectReference,
    mode: LockMode,
}

impl TakeLock {
    pub fn new(reference: LockObjectReference, mode: LockMode) -> Self {
        Self { reference, mode }
    }
}

#[async_trait]
impl Task for TakeLock {
    fn name(&self) -> String {
        format!("Take {:?} lock on {}", self.mode, self.reference)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.reference.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        ctx.locks.try_lock(ctx.job_id, &self.reference, self.mode)?;
        Ok(TaskOutcome::Done)
    }
}

/// Panics instead of returning.
pub struct Panicking {
    name: String,
}

impl Panicking {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Task for Panicking {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        panic!("{} blew up", self.name);
    }
}
