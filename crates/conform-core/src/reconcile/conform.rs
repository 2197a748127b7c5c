//! Entry points that turn "conform this resource" into a submitted job.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::ConformError;
use crate::domain::model::{
    DeploymentSpec, DistributedAppliance, ManagerConnector, VirtualSystem, VirtualizationConnector,
};
use crate::engine::{JobEngine, JobHandle};
use crate::graph::{TaskGraph, TaskGuard};
use crate::lock::{LockObjectReference, lock_child_and_parents};
use crate::ports::Transaction;
use crate::ports::repository::load;
use crate::task::{Task, UnlockObjectsTask};

use super::deployment_spec::DeploymentSpecConformMetaTask;
use super::virtual_system::VirtualSystemConformMetaTask;

/// Lock hierarchy above a virtual system: manager connector, virtualization
/// connector, appliance. In that order.
async fn parents_of(
    tx: &mut dyn Transaction,
    vs: &VirtualSystem,
) -> Result<Vec<LockObjectReference>, ConformError> {
    let da: DistributedAppliance = load(tx, vs.appliance_id).await?;
    let mc: ManagerConnector = load(tx, da.manager_connector_id).await?;
    let vc: VirtualizationConnector = load(tx, vs.connector_id).await?;
    Ok(vec![
        LockObjectReference::of(&mc),
        LockObjectReference::of(&vc),
        LockObjectReference::of(&da),
    ])
}

/// Starts conform jobs on a [`JobEngine`].
#[derive(Clone)]
pub struct Conformer {
    engine: Arc<JobEngine>,
}

impl Conformer {
    pub fn new(engine: Arc<JobEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    /// Locks the virtual system for WRITE under its parents and submits
    /// `[VirtualSystemConformMetaTask] -> [unlock]`.
    pub async fn conform_virtual_system(&self, vs_id: u64) -> Result<JobHandle, ConformError> {
        let mut tx = self.engine.repository().begin().await?;
        let loaded = async {
            let vs: VirtualSystem = load(tx.as_mut(), vs_id).await?;
            let parents = parents_of(tx.as_mut(), &vs).await?;
            Ok::<_, ConformError>((vs, parents))
        }
        .await;
        tx.rollback().await?;
        let (vs, parents) = loaded?;

        self.start(
            format!("Conforming Virtual System '{}'", vs.name),
            LockObjectReference::of(&vs),
            parents,
            VirtualSystemConformMetaTask::new(&vs),
        )
        .await
    }

    /// Same as [`Self::conform_virtual_system`] for a single deployment spec;
    /// the virtual system joins the READ-locked parents.
    pub async fn conform_deployment_spec(&self, ds_id: u64) -> Result<JobHandle, ConformError> {
        let mut tx = self.engine.repository().begin().await?;
        let loaded = async {
            let ds: DeploymentSpec = load(tx.as_mut(), ds_id).await?;
            let vs: VirtualSystem = load(tx.as_mut(), ds.virtual_system_id).await?;
            let mut parents = parents_of(tx.as_mut(), &vs).await?;
            parents.push(LockObjectReference::of(&vs));
            Ok::<_, ConformError>((ds, parents))
        }
        .await;
        tx.rollback().await?;
        let (ds, parents) = loaded?;

        self.start(
            format!("Conforming Deployment Specification '{}'", ds.name),
            LockObjectReference::of(&ds),
            parents,
            DeploymentSpecConformMetaTask::new(&ds),
        )
        .await
    }

    async fn start<T: Task + 'static>(
        &self,
        name: String,
        resource: LockObjectReference,
        parents: Vec<LockObjectReference>,
        root: T,
    ) -> Result<JobHandle, ConformError> {
        let job_id = self.engine.new_job_id();
        let grants = lock_child_and_parents(self.engine.locks(), job_id, resource, parents).await?;

        let mut graph = TaskGraph::new();
        graph.add_task(root);
        graph.append_task_with_guard(UnlockObjectsTask::new(grants), TaskGuard::AllPredecessorsCompleted);

        match self.engine.submit(job_id, name, graph) {
            Ok(handle) => {
                info!(job_id = %job_id, job = %handle.name(), "conform job started");
                Ok(handle)
            }
            Err(e) => {
                let released = self.engine.locks().release_all(job_id);
                warn!(job_id = %job_id, error = %e, released = released.len(), "conform job rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::domain::model::SecurityGroupInterface;
    use crate::domain::state::{JobStatus, TaskStatus};
    use crate::lock::{LockMode, LockObjectReference};
    use crate::reconcile::testing::{REGION, World, names};
    use crate::task::{TaskKind, testing::Gate};

    #[tokio::test]
    async fn cloud_virtual_system_converges_then_stays_quiet() {
        let world = World::cloud().await;
        world.add_spec("ds", &["h1", "h2"], 1).await;
        world.add_sgi("web", &["10.1.0.1"]).await;
        let conformer = world.conformer();

        let first = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(first.status, JobStatus::Succeeded, "{:?}", first.failed_tasks);
        assert_eq!(world.instances().await.len(), 2);
        assert_eq!(world.cloud.servers(REGION).len(), 2);
        let device = world.vs_now().await.mgr_device_id.unwrap();
        assert_eq!(world.manager.members(&device).len(), 2);
        assert_eq!(world.manager.security_groups(&device).len(), 1);
        assert!(world.engine.locks().snapshot().is_empty());

        world.manager.script().reset_calls();
        let second = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(second.status, JobStatus::Succeeded);
        assert!(second.executed_corrective_tasks().is_empty(), "{:?}", second.tasks);
        assert!(world.manager.script().mutating_calls().is_empty());
        assert!(world.engine.locks().snapshot().is_empty());
    }

    #[tokio::test]
    async fn sdn_virtual_system_registers_service_and_templates_once() {
        let world = World::sdn().await;
        world.add_policy("allow-web").await;
        assert!(world.vs.sdn_service_id.is_none());
        let conformer = world.conformer();

        let first = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(first.status, JobStatus::Succeeded, "{:?}", first.failed_tasks);
        let executed: Vec<&str> = first
            .executed_corrective_tasks()
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        let registers = executed
            .iter()
            .filter(|n| n.starts_with("Register Controller Service"))
            .count();
        assert_eq!(registers, 1, "{executed:?}");
        assert_eq!(
            executed
                .iter()
                .filter(|n| n.starts_with("Register Vendor Template"))
                .count(),
            1,
            "{executed:?}"
        );
        assert!(executed.iter().all(|n| !n.starts_with("Update Controller Service")));
        assert_eq!(world.controller.services().len(), 1);
        let service = world.vs_now().await.sdn_service_id.unwrap();
        assert_eq!(world.controller.services()[0].id, service);
        assert_eq!(world.controller.templates(&service).len(), 1);

        let second = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;
        assert_eq!(second.status, JobStatus::Succeeded);
        assert!(second.executed_corrective_tasks().is_empty(), "{:?}", second.tasks);
    }

    #[tokio::test]
    async fn marked_deployment_spec_tears_down_children_before_itself() {
        let world = World::cloud().await;
        let mut ds = world.add_spec("ds", &["h1"], 3).await;
        for n in 0..3 {
            world.add_instance(&ds, "h1", n).await;
        }
        ds.marked_for_deletion = true;
        let ds = world.repo.insert(ds).await;

        // synthesis alone: three parallel deletes, then the store delete after all of them
        let graph = world.synthesize(&DeploymentSpecConformMetaTask::new(&ds)).await;
        assert_eq!(
            names(&graph),
            vec![
                "Delete Appliance Instance 'ds-h1-0'",
                "Delete Appliance Instance 'ds-h1-1'",
                "Delete Appliance Instance 'ds-h1-2'",
                "Delete Deployment Specification 'ds'",
            ]
        );
        let last = graph.nodes().last().unwrap();
        assert_eq!(last.guard(), TaskGuard::AllAncestorsSucceeded);
        assert_eq!(graph.predecessors(last.id()).len(), 3);
        assert_eq!(graph.roots().len(), 3);

        let report = world
            .conformer()
            .conform_deployment_spec(ds.id)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.failed_tasks);
        let unlock = report.tasks.last().unwrap();
        assert_eq!(unlock.kind, TaskKind::Unlock);
        assert_eq!(unlock.guard, TaskGuard::AllPredecessorsCompleted);
        let store_delete = report.task("Delete Deployment Specification 'ds'").unwrap();
        assert_eq!(store_delete.guard, TaskGuard::AllAncestorsSucceeded);
        assert!(world.cloud.servers(REGION).is_empty());
        assert!(world.repo.get::<DeploymentSpec>(ds.id).await.is_none());
        assert!(world.engine.locks().snapshot().is_empty());
    }

    #[tokio::test]
    async fn failed_child_teardown_keeps_the_record_and_still_unlocks() {
        let world = World::cloud().await;
        let mut ds = world.add_spec("ds", &["h1"], 2).await;
        world.add_instance(&ds, "h1", 0).await;
        world.add_instance(&ds, "h1", 1).await;
        ds.marked_for_deletion = true;
        let ds = world.repo.insert(ds).await;
        world.cloud.script().fail_on("delete_server");

        let report = world
            .conformer()
            .conform_deployment_spec(ds.id)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failed_tasks.len(), 2);
        assert_eq!(
            report.task("Delete Deployment Specification 'ds'").unwrap().status,
            TaskStatus::Skipped
        );
        assert_eq!(report.tasks.last().unwrap().status, TaskStatus::Succeeded);
        assert!(world.repo.get::<DeploymentSpec>(ds.id).await.is_some());
        assert!(world.engine.locks().snapshot().is_empty());
    }

    #[tokio::test]
    async fn marked_virtual_system_is_removed_everywhere() {
        let world = World::cloud().await;
        world.add_spec("ds", &["h1"], 1).await;
        world.add_sgi("web", &["10.1.0.1"]).await;
        let conformer = world.conformer();
        let converged = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;
        assert_eq!(converged.status, JobStatus::Succeeded);

        let mut vs = world.vs_now().await;
        vs.marked_for_deletion = true;
        world.repo.insert(vs).await;

        let report = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.failed_tasks);
        assert!(world.repo.get::<VirtualSystem>(world.vs.id).await.is_none());
        assert!(world.repo.all::<DeploymentSpec>().await.is_empty());
        assert!(world.repo.all::<SecurityGroupInterface>().await.is_empty());
        assert!(world.instances().await.is_empty());
        assert!(world.manager.devices().is_empty());
        assert!(world.cloud.servers(REGION).is_empty());

        let order: Vec<&str> = report.tasks.iter().map(|t| t.name.as_str()).collect();
        let device = order
            .iter()
            .position(|n| *n == "Delete Manager Device for Virtual System 'vs'")
            .unwrap();
        let spec = order
            .iter()
            .position(|n| *n == "Delete Deployment Specification 'ds'")
            .unwrap();
        let store = order
            .iter()
            .position(|n| *n == "Delete Virtual System 'vs'")
            .unwrap();
        assert!(spec < device && device < store);
    }

    #[tokio::test]
    async fn contended_deployment_spec_fails_only_its_branch() {
        let world = World::cloud().await;
        let ds = world.add_spec("ds", &["h1"], 1).await;
        let engine = Arc::clone(&world.engine);

        // job 1 reads the spec and parks
        let gate = Gate::closed();
        let holder = engine.new_job_id();
        let read = engine
            .locks()
            .lock(holder, &LockObjectReference::of(&ds), LockMode::Read)
            .await
            .unwrap();
        let mut graph = TaskGraph::new();
        graph.add_task(gate.task("hold"));
        graph.append_task_with_guard(
            UnlockObjectsTask::new(vec![read]),
            TaskGuard::AllPredecessorsCompleted,
        );
        let job1 = engine.submit(holder, "reader", graph).unwrap();

        let job2 = world
            .conformer()
            .conform_virtual_system(world.vs.id)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(job2.status, JobStatus::Failed);
        let placeholder = job2
            .task("Acquiring Write lock for Deployment Specification 'ds'")
            .unwrap();
        assert_eq!(placeholder.error_kind, Some(ErrorKind::LockConflict));
        assert_eq!(job2.failed_tasks.len(), 1);
        // sibling work went ahead
        assert_eq!(world.manager.devices().len(), 1);
        assert!(world.instances().await.is_empty());
        assert_eq!(job1.status(), JobStatus::Running);

        gate.open();
        let job1 = job1.wait().await;
        assert_eq!(job1.status, JobStatus::Succeeded);
        assert!(engine.locks().held_by(holder).is_empty());
        assert!(engine.locks().snapshot().is_empty());
    }

    #[tokio::test]
    async fn cloud_failure_in_one_branch_still_creates_the_device() {
        let world = World::cloud().await;
        world.add_spec("ds", &["h1"], 1).await;
        world.cloud.script().fail_on("create_server");
        let conformer = world.conformer();

        let report = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failed_tasks.len(), 1, "{:?}", report.failed_tasks);
        assert_eq!(
            report.task("Create Appliance Instance 'ds-h1-0' on host 'h1'").unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(
            report.task("Create Manager Device for Virtual System 'vs'").unwrap().status,
            TaskStatus::Succeeded
        );
        assert_eq!(world.manager.devices().len(), 1);
        assert!(world.engine.locks().snapshot().is_empty());

        world.cloud.script().clear_failures();
        let retry = conformer.conform_virtual_system(world.vs.id).await.unwrap().wait().await;

        assert_eq!(retry.status, JobStatus::Succeeded, "{:?}", retry.failed_tasks);
        let device = world.vs_now().await.mgr_device_id.unwrap();
        assert_eq!(world.manager.members(&device).len(), 1);
        assert!(retry.task("Create Manager Device for Virtual System 'vs'").is_none());
    }

    #[tokio::test]
    async fn missing_resource_is_rejected_without_locking() {
        let world = World::cloud().await;

        let result = world.conformer().conform_virtual_system(999).await;

        assert!(matches!(result, Err(ConformError::Validation(_))));
        assert!(world.engine.locks().snapshot().is_empty());
        assert_eq!(world.engine.counts().total(), 0);
    }
}
