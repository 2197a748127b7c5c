//! Device container and member sync with the appliance manager.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::ConformError;
use crate::domain::model::{ApplianceInstance, VirtualSystem};
use crate::engine::TaskContext;
use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;
use crate::ports::repository::{list, load, update};
use crate::ports::{DeviceMember, ManagerDevice, Transaction};
use crate::task::{Task, TaskKind, TaskOutcome};

use super::appliance_manager;
use super::diff::keyed_diff;

fn registered_device(vs: &VirtualSystem) -> Result<&str, ConformError> {
    vs.mgr_device_id.as_deref().ok_or_else(|| {
        ConformError::unexpected(format!(
            "Virtual System '{}' has no manager device",
            vs.name
        ))
    })
}

/// Keeps the manager's device container and its members in line with the
/// virtual system and its appliance instances.
///
/// Does nothing when the manager has no notion of device groups.
#[derive(Debug, Clone)]
pub struct ManagerDevicesCheckMetaTask {
    vs: LockObjectReference,
}

impl ManagerDevicesCheckMetaTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for ManagerDevicesCheckMetaTask {
    fn name(&self) -> String {
        format!("Checking Manager Devices for Virtual System '{}'", self.vs.name)
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
        let manager = appliance_manager(ctx, tx, &vs).await?;
        if !manager.supports_device_groups() {
            debug!(vs = %vs.name, "manager has no device groups");
            return Ok(TaskOutcome::Done);
        }

        let mut graph = TaskGraph::new();

        let device = match vs.mgr_device_id.as_deref() {
            Some(id) => manager.find_device(id).await?,
            None => None,
        };
        let members = match &device {
            None => {
                graph.append_task(CreateManagerDeviceTask::new(&vs));
                Vec::new()
            }
            Some(device) => {
                if device.name != vs.name {
                    graph.append_task(UpdateManagerDeviceTask::new(&vs, device));
                }
                manager.list_members(&device.id).await?
            }
        };

        let instances: Vec<ApplianceInstance> =
            list(tx, |i: &ApplianceInstance| i.virtual_system_id == vs.id).await?;
        let diff = keyed_diff(
            instances,
            members,
            |i| i.name.clone(),
            |m| m.name.clone(),
            |i, m| i.ip_address != m.ip_address || i.mgr_member_id.as_deref() != Some(m.id.as_str()),
        );

        let mut member_tasks = TaskGraph::new();
        for orphan in diff.delete {
            member_tasks.add_task(DeleteDeviceMemberTask::new(&vs, orphan));
        }
        for instance in diff.create {
            member_tasks.add_task(CreateDeviceMemberTask::new(&vs, &instance));
        }
        for (instance, member) in diff.update {
            member_tasks.add_task(UpdateDeviceMemberTask::new(&vs, &instance, member));
        }
        // members need the device to exist first
        graph.append_graph(member_tasks);

        Ok(TaskOutcome::Expand(graph))
    }
}

/// Registers the device container and stores its id on the virtual system.
#[derive(Debug, Clone)]
pub struct CreateManagerDeviceTask {
    vs: LockObjectReference,
}

impl CreateManagerDeviceTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for CreateManagerDeviceTask {
    fn name(&self) -> String {
        format!("Create Manager Device for Virtual System '{}'", self.vs.name)
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
        let manager = appliance_manager(ctx, tx, &vs).await?;
        let device_id = manager.create_device(&vs.name).await?;
        vs.mgr_device_id = Some(device_id);
        update(tx, vs).await?;
        Ok(TaskOutcome::Done)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateManagerDeviceTask {
    vs: LockObjectReference,
    device_id: String,
}

impl UpdateManagerDeviceTask {
    pub fn new(vs: &VirtualSystem, device: &ManagerDevice) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            device_id: device.id.clone(),
        }
    }
}

#[async_trait]
impl Task for UpdateManagerDeviceTask {
    fn name(&self) -> String {
        format!("Update Manager Device for Virtual System '{}'", self.vs.name)
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
        let manager = appliance_manager(ctx, tx, &vs).await?;
        manager
            .update_device(&ManagerDevice {
                id: self.device_id.clone(),
                name: vs.name.clone(),
            })
            .await?;
        Ok(TaskOutcome::Done)
    }
}

/// Removes the device container, and with it every member.
#[derive(Debug, Clone)]
pub struct DeleteManagerDeviceTask {
    vs: LockObjectReference,
}

impl DeleteManagerDeviceTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for DeleteManagerDeviceTask {
    fn name(&self) -> String {
        format!("Delete Manager Device for Virtual System '{}'", self.vs.name)
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
        let manager = appliance_manager(ctx, tx, &vs).await?;
        let device_id = registered_device(&vs)?;
        if manager.find_device(device_id).await?.is_some() {
            manager.delete_device(device_id).await?;
        }
        vs.mgr_device_id = None;
        update(tx, vs).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Registers one appliance instance under the device container.
#[derive(Debug, Clone)]
pub struct CreateDeviceMemberTask {
    vs: LockObjectReference,
    instance: LockObjectReference,
}

impl CreateDeviceMemberTask {
    pub fn new(vs: &VirtualSystem, instance: &ApplianceInstance) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            instance: LockObjectReference::of(instance),
        }
    }
}

#[async_trait]
impl Task for CreateDeviceMemberTask {
    fn name(&self) -> String {
        format!("Create Manager Device Member '{}'", self.instance.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.instance.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let mut instance: ApplianceInstance = load(tx, self.instance.id).await?;
        let manager = appliance_manager(ctx, tx, &vs).await?;
        let member_id = manager
            .create_member(
                registered_device(&vs)?,
                &instance.name,
                instance.ip_address.as_deref(),
            )
            .await?;
        instance.mgr_member_id = Some(member_id);
        update(tx, instance).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Pushes the instance's current address and records the member id.
#[derive(Debug, Clone)]
pub struct UpdateDeviceMemberTask {
    vs: LockObjectReference,
    instance: LockObjectReference,
    member: DeviceMember,
}

impl UpdateDeviceMemberTask {
    pub fn new(vs: &VirtualSystem, instance: &ApplianceInstance, member: DeviceMember) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            instance: LockObjectReference::of(instance),
            member,
        }
    }
}

#[async_trait]
impl Task for UpdateDeviceMemberTask {
    fn name(&self) -> String {
        format!("Update Manager Device Member '{}'", self.instance.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.instance.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let mut instance: ApplianceInstance = load(tx, self.instance.id).await?;
        let manager = appliance_manager(ctx, tx, &vs).await?;
        if instance.ip_address != self.member.ip_address {
            let member = DeviceMember {
                ip_address: instance.ip_address.clone(),
                ..self.member.clone()
            };
            manager.update_member(registered_device(&vs)?, &member).await?;
        }
        if instance.mgr_member_id.as_deref() != Some(self.member.id.as_str()) {
            instance.mgr_member_id = Some(self.member.id.clone());
            update(tx, instance).await?;
        }
        Ok(TaskOutcome::Done)
    }
}

/// Removes a member no instance accounts for.
#[derive(Debug, Clone)]
pub struct DeleteDeviceMemberTask {
    vs: LockObjectReference,
    member: DeviceMember,
}

impl DeleteDeviceMemberTask {
    pub fn new(vs: &VirtualSystem, member: DeviceMember) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            member,
        }
    }
}

#[async_trait]
impl Task for DeleteDeviceMemberTask {
    fn name(&self) -> String {
        format!("Delete Manager Device Member '{}'", self.member.name)
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
        let manager = appliance_manager(ctx, tx, &vs).await?;
        manager
            .delete_member(registered_device(&vs)?, &self.member.id)
            .await?;
        Ok(TaskOutcome::Done)
    }
}
