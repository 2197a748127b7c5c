//! Virtual system conformance.
//!
//! 更新時:
//! - SDN: controller service を登録/更新し、policy template を確認
//! - Cloud: deployment spec ごとに WRITE lock を取り、並列ブランチとして展開
//! - 最後に manager device（と security group）を確認
//!
//! 削除時は子から順に片付け、最後に virtual system 自体を store から消す。

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::ConformError;
use crate::domain::model::{
    ConnectorKind, DeploymentSpec, DistributedAppliance, SecurityGroupInterface, VirtualSystem,
    VirtualizationConnector,
};
use crate::engine::TaskContext;
use crate::graph::{TaskGraph, TaskGuard};
use crate::lock::{LockObjectReference, try_lock_child_and_parents};
use crate::ports::repository::{delete, list, load, update};
use crate::ports::{ControllerService, Transaction};
use crate::task::{FailedWithContextTask, Task, TaskKind, TaskOutcome, UnlockObjectsTask};

use super::deployment_spec::DeploymentSpecConformMetaTask;
use super::manager_devices::{DeleteManagerDeviceTask, ManagerDevicesCheckMetaTask};
use super::policy_templates::PolicyTemplatesCheckMetaTask;
use super::security_groups::{DeleteManagerSecurityGroupTask, ManagerSecurityGroupsCheckMetaTask};
use super::{appliance_manager, network_controller};

/// Entry meta-task of a virtual system conform job.
#[derive(Debug, Clone)]
pub struct VirtualSystemConformMetaTask {
    vs: LockObjectReference,
}

impl VirtualSystemConformMetaTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }

    /// `[DS meta] -> [unlock]` under a WRITE lock on the spec, or a failing
    /// placeholder when another job holds it.
    fn deployment_spec_branch(&self, ctx: &TaskContext, ds: &DeploymentSpec) -> TaskGraph {
        let reference = LockObjectReference::of(ds);
        let mut branch = TaskGraph::new();
        match try_lock_child_and_parents(&ctx.locks, ctx.job_id, reference.clone(), [self.vs.clone()]) {
            Ok(grants) => {
                branch.add_task(DeploymentSpecConformMetaTask::new(ds));
                branch.append_task_with_guard(
                    UnlockObjectsTask::new(grants),
                    TaskGuard::AllPredecessorsCompleted,
                );
            }
            Err(e) => {
                debug!(job_id = %ctx.job_id, ds = %ds.name, "deployment spec is locked elsewhere");
                branch.append_task_with_guard(
                    FailedWithContextTask::new(
                        format!("Acquiring Write lock for Deployment Specification '{}'", ds.name),
                        e,
                        vec![reference],
                    ),
                    TaskGuard::AllPredecessorsCompleted,
                );
            }
        }
        branch
    }

    async fn controller_service(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
        vs: &VirtualSystem,
    ) -> Result<TaskGraph, ConformError> {
        let controller = network_controller(ctx, tx, vs).await?;
        let service = match vs.sdn_service_id.as_deref() {
            Some(id) => controller.find_service(id).await?,
            None => None,
        };

        let mut graph = TaskGraph::new();
        match service {
            None => {
                graph.append_task(RegisterControllerServiceTask::new(vs));
            }
            Some(service) if service.name != vs.name => {
                graph.append_task(UpdateControllerServiceTask::new(vs, &service));
            }
            Some(_) => {}
        }
        graph.append_task(PolicyTemplatesCheckMetaTask::new(vs));
        Ok(graph)
    }

    async fn device_teardown(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
        vs: &VirtualSystem,
        device_id: &str,
    ) -> Result<TaskGraph, ConformError> {
        let manager = appliance_manager(ctx, tx, vs).await?;
        let mut graph = TaskGraph::new();
        if manager.syncs_security_groups() && manager.find_device(device_id).await?.is_some() {
            let mut groups = TaskGraph::new();
            for group in manager.list_security_groups(device_id).await? {
                groups.add_task(DeleteManagerSecurityGroupTask::new(vs, device_id, group));
            }
            graph.add_graph(groups);
        }
        graph.append_task(DeleteManagerDeviceTask::new(vs));
        Ok(graph)
    }

    async fn teardown(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
        vs: &VirtualSystem,
        vc: &VirtualizationConnector,
        specs: &[DeploymentSpec],
    ) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for ds in specs {
            graph.add_graph(self.deployment_spec_branch(ctx, ds));
        }

        if let Some(device_id) = vs.mgr_device_id.as_deref() {
            match self.device_teardown(ctx, tx, vs, device_id).await {
                Ok(devices) => graph.append_graph(devices),
                Err(e) => {
                    graph.append_task(FailedWithContextTask::new(
                        format!("Checking Manager Device for Virtual System '{}'", vs.name),
                        e,
                        vec![self.vs.clone()],
                    ));
                }
            }
        }

        if vc.kind == ConnectorKind::Sdn && vs.sdn_service_id.is_some() {
            graph.append_task(UnregisterControllerServiceTask::new(vs));
        }

        graph.append_task(DeleteVirtualSystemFromStore::new(vs));
        graph
    }
}

#[async_trait]
impl Task for VirtualSystemConformMetaTask {
    fn name(&self) -> String {
        format!("Conforming to Virtual System '{}'", self.vs.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Meta
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let da: DistributedAppliance = load(tx, vs.appliance_id).await?;
        let vc: VirtualizationConnector = load(tx, vs.connector_id).await?;
        let specs: Vec<DeploymentSpec> =
            list(tx, |ds: &DeploymentSpec| ds.virtual_system_id == vs.id).await?;

        if vs.marked_for_deletion || da.marked_for_deletion {
            debug!(vs = %vs.name, specs = specs.len(), "tearing down virtual system");
            let graph = self.teardown(ctx, tx, &vs, &vc, &specs).await;
            return Ok(TaskOutcome::Expand(graph));
        }

        let mut graph = TaskGraph::new();
        match vc.kind {
            ConnectorKind::Sdn => match self.controller_service(ctx, tx, &vs).await {
                Ok(service) => graph.add_graph(service),
                Err(e) => {
                    graph.add_task(FailedWithContextTask::new(
                        format!("Checking Controller Service for Virtual System '{}'", vs.name),
                        e,
                        vec![self.vs.clone()],
                    ));
                }
            },
            ConnectorKind::Cloud => {
                for ds in &specs {
                    graph.add_graph(self.deployment_spec_branch(ctx, ds));
                }
            }
        }

        graph.append_task_with_guard(
            ManagerDevicesCheckMetaTask::new(&vs),
            TaskGuard::AllPredecessorsCompleted,
        );
        let manager = appliance_manager(ctx, tx, &vs).await?;
        if manager.syncs_security_groups() {
            graph.append_task_with_guard(
                ManagerSecurityGroupsCheckMetaTask::new(&vs),
                TaskGuard::AllPredecessorsCompleted,
            );
        }

        Ok(TaskOutcome::Expand(graph))
    }
}

/// Registers the virtual system as a controller service and stores its id.
#[derive(Debug, Clone)]
pub struct RegisterControllerServiceTask {
    vs: LockObjectReference,
}

impl RegisterControllerServiceTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for RegisterControllerServiceTask {
    fn name(&self) -> String {
        format!("Register Controller Service for Virtual System '{}'", self.vs.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let mut vs: VirtualSystem = load(tx, self.vs.id).await?;
        let controller = network_controller(ctx, tx, &vs).await?;
        let service_id = controller.register_service(&vs.name).await?;
        vs.sdn_service_id = Some(service_id);
        update(tx, vs).await?;
        Ok(TaskOutcome::Done)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateControllerServiceTask {
    vs: LockObjectReference,
    service_id: String,
}

impl UpdateControllerServiceTask {
    pub fn new(vs: &VirtualSystem, service: &ControllerService) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            service_id: service.id.clone(),
        }
    }
}

#[async_trait]
impl Task for UpdateControllerServiceTask {
    fn name(&self) -> String {
        format!("Update Controller Service for Virtual System '{}'", self.vs.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let controller = network_controller(ctx, tx, &vs).await?;
        controller
            .update_service(&ControllerService {
                id: self.service_id.clone(),
                name: vs.name.clone(),
            })
            .await?;
        Ok(TaskOutcome::Done)
    }
}

/// Drops the service registration. The controller removes its templates with it.
#[derive(Debug, Clone)]
pub struct UnregisterControllerServiceTask {
    vs: LockObjectReference,
}

impl UnregisterControllerServiceTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for UnregisterControllerServiceTask {
    fn name(&self) -> String {
        format!("Unregister Controller Service for Virtual System '{}'", self.vs.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let mut vs: VirtualSystem = load(tx, self.vs.id).await?;
        if let Some(service_id) = vs.sdn_service_id.take() {
            let controller = network_controller(ctx, tx, &vs).await?;
            if controller.find_service(&service_id).await?.is_some() {
                controller.unregister_service(&service_id).await?;
            }
            update(tx, vs).await?;
        }
        Ok(TaskOutcome::Done)
    }
}

/// Last step of a teardown: the virtual system and its security group
/// interfaces leave the store.
#[derive(Debug, Clone)]
pub struct DeleteVirtualSystemFromStore {
    vs: LockObjectReference,
}

impl DeleteVirtualSystemFromStore {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for DeleteVirtualSystemFromStore {
    fn name(&self) -> String {
        format!("Delete Virtual System '{}'", self.vs.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone()]
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let interfaces: Vec<SecurityGroupInterface> =
            list(tx, |sgi: &SecurityGroupInterface| sgi.virtual_system_id == self.vs.id).await?;
        for sgi in interfaces {
            delete::<SecurityGroupInterface>(tx, sgi.id).await?;
        }
        delete::<VirtualSystem>(tx, self.vs.id).await?;
        Ok(TaskOutcome::Done)
    }
}
