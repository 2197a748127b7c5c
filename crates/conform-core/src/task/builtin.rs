//! Tasks every job may contain regardless of domain.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::errors::ConformError;
use crate::engine::context::TaskContext;
use crate::lock::{LockGrant, LockObjectReference, LockRegistry};
use crate::ports::Transaction;

use super::{Task, TaskKind, TaskOutcome};

/// Releases a set of grants, most recent first.
///
/// Appended with `AllPredecessorsCompleted` so it runs whatever happened upstream.
#[derive(Debug, Clone)]
pub struct UnlockObjectsTask {
    grants: Vec<LockGrant>,
}

impl UnlockObjectsTask {
    pub fn new(grants: Vec<LockGrant>) -> Self {
        Self { grants }
    }

    pub fn grants(&self) -> &[LockGrant] {
        &self.grants
    }

    /// Release everything, returning the first failure after trying all grants.
    pub fn release(&self, registry: &LockRegistry) -> Result<(), ConformError> {
        let mut first_error = None;
        for grant in self.grants.iter().rev() {
            if let Err(e) = registry.release(grant) {
                warn!(object = %grant.reference, error = %e, "unlock failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Task for UnlockObjectsTask {
    fn name(&self) -> String {
        let names: Vec<String> = self
            .grants
            .iter()
            .rev()
            .map(|g| format!("{} '{}'", g.reference.object_type, g.reference.name))
            .collect();
        format!("Release locks on {}", names.join(", "))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Unlock
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        self.grants.iter().map(|g| g.reference.clone()).collect()
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        debug!(job_id = %ctx.job_id, count = self.grants.len(), "releasing locks");
        self.release(&ctx.locks)?;
        Ok(TaskOutcome::Done)
    }
}

/// Placeholder for a branch whose synthesis failed.
///
/// Always fails with the captured error so the failure shows up in job
/// diagnostics, while siblings that do not depend on it keep running.
#[derive(Debug, Clone)]
pub struct FailedWithContextTask {
    name: String,
    error: ConformError,
    objects: Vec<LockObjectReference>,
}

impl FailedWithContextTask {
    pub fn new(
        name: impl Into<String>,
        error: ConformError,
        objects: Vec<LockObjectReference>,
    ) -> Self {
        Self {
            name: name.into(),
            error,
            objects,
        }
    }

    pub fn error(&self) -> &ConformError {
        &self.error
    }
}

#[async_trait]
impl Task for FailedWithContextTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Placeholder
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        self.objects.clone()
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        Err(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::JobId;
    use crate::domain::model::ObjectType;
    use crate::lock::LockMode;

    fn vc() -> LockObjectReference {
        LockObjectReference::new(ObjectType::VirtualizationConnector, 1, "vc-1")
    }

    fn vs() -> LockObjectReference {
        LockObjectReference::new(ObjectType::VirtualSystem, 2, "vs-1")
    }

    #[test]
    fn unlock_releases_child_first_and_names_it() {
        let registry = LockRegistry::default();
        let job = JobId::generate();
        let grants = vec![
            registry.try_lock(job, &vc(), LockMode::Read).unwrap(),
            registry.try_lock(job, &vs(), LockMode::Write).unwrap(),
        ];
        let task = UnlockObjectsTask::new(grants);

        assert_eq!(
            task.name(),
            "Release locks on Virtual System 'vs-1', Virtualization Connector 'vc-1'"
        );
        task.release(&registry).unwrap();
        assert!(registry.held_by(job).is_empty());
    }

    #[test]
    fn unlock_keeps_going_after_a_bad_grant() {
        let registry = LockRegistry::default();
        let job = JobId::generate();
        let good = registry.try_lock(job, &vc(), LockMode::Read).unwrap();
        let stale = LockGrant {
            reference: vs(),
            mode: LockMode::Write,
            owner: job,
        };
        let task = UnlockObjectsTask::new(vec![good, stale]);

        assert!(task.release(&registry).is_err());
        assert!(registry.held_by(job).is_empty());
    }
}
