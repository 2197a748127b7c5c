//! Context threaded into every task execution.

use std::sync::Arc;

use crate::domain::ids::JobId;
use crate::lock::LockRegistry;
use crate::ports::{CapabilityFactory, Repository};

/// Collaborators shared by every job of one engine.
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn Repository>,
    pub capabilities: Arc<dyn CapabilityFactory>,
    pub locks: Arc<LockRegistry>,
}

impl Services {
    pub fn context(&self, job_id: JobId) -> TaskContext {
        TaskContext {
            job_id,
            repository: Arc::clone(&self.repository),
            capabilities: Arc::clone(&self.capabilities),
            locks: Arc::clone(&self.locks),
        }
    }
}

/// What a task may reach besides its own transaction.
///
/// Meta-tasks pass this on to the tasks they synthesize; there is no global
/// registry to look collaborators up from.
#[derive(Clone)]
pub struct TaskContext {
    /// Owner of every lock taken while this job runs.
    pub job_id: JobId,
    pub repository: Arc<dyn Repository>,
    pub capabilities: Arc<dyn CapabilityFactory>,
    pub locks: Arc<LockRegistry>,
}
