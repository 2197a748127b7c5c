//! Vendor template sync with the network controller.

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::domain::model::{Policy, VirtualSystem};
use crate::engine::TaskContext;
use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;
use crate::ports::repository::{list, load};
use crate::ports::{Transaction, VendorTemplate};
use crate::task::{Task, TaskKind, TaskOutcome};

use super::diff::keyed_diff;
use super::network_controller;

fn registered_service(vs: &VirtualSystem) -> Result<&str, ConformError> {
    vs.sdn_service_id.as_deref().ok_or_else(|| {
        ConformError::unexpected(format!(
            "Virtual System '{}' is not registered with the controller",
            vs.name
        ))
    })
}

/// One vendor template per live policy of the appliance, under the virtual
/// system's controller service.
#[derive(Debug, Clone)]
pub struct PolicyTemplatesCheckMetaTask {
    vs: LockObjectReference,
}

impl PolicyTemplatesCheckMetaTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for PolicyTemplatesCheckMetaTask {
    fn name(&self) -> String {
        format!("Checking Policy Templates for Virtual System '{}'", self.vs.name)
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
        let service_id = registered_service(&vs)?.to_string();
        let controller = network_controller(ctx, tx, &vs).await?;

        let templates = controller.list_templates(&service_id).await?;
        let policies: Vec<Policy> = list(tx, |p: &Policy| {
            p.appliance_id == vs.appliance_id && !p.marked_for_deletion
        })
        .await?;

        let diff = keyed_diff(
            policies,
            templates,
            |p| p.id,
            |t| t.policy_id,
            |p, t| p.name != t.name,
        );

        let mut graph = TaskGraph::new();
        for policy in diff.create {
            graph.add_task(RegisterVendorTemplateTask::new(&vs, &service_id, &policy));
        }
        for (policy, template) in diff.update {
            graph.add_task(UpdateVendorTemplateTask::new(&vs, &service_id, &policy, template));
        }
        for template in diff.delete {
            graph.add_task(RemoveVendorTemplateTask::new(&vs, &service_id, template));
        }
        Ok(TaskOutcome::Expand(graph))
    }
}

#[derive(Debug, Clone)]
pub struct RegisterVendorTemplateTask {
    vs: LockObjectReference,
    policy: LockObjectReference,
    service_id: String,
}

impl RegisterVendorTemplateTask {
    pub fn new(vs: &VirtualSystem, service_id: &str, policy: &Policy) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            policy: LockObjectReference::of(policy),
            service_id: service_id.to_string(),
        }
    }
}

#[async_trait]
impl Task for RegisterVendorTemplateTask {
    fn name(&self) -> String {
        format!("Register Vendor Template for Policy '{}'", self.policy.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.policy.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let policy: Policy = load(tx, self.policy.id).await?;
        let controller = network_controller(ctx, tx, &vs).await?;
        controller
            .register_template(&self.service_id, policy.id, &policy.name)
            .await?;
        Ok(TaskOutcome::Done)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateVendorTemplateTask {
    vs: LockObjectReference,
    policy: LockObjectReference,
    service_id: String,
    template: VendorTemplate,
}

impl UpdateVendorTemplateTask {
    pub fn new(
        vs: &VirtualSystem,
        service_id: &str,
        policy: &Policy,
        template: VendorTemplate,
    ) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            policy: LockObjectReference::of(policy),
            service_id: service_id.to_string(),
            template,
        }
    }
}

#[async_trait]
impl Task for UpdateVendorTemplateTask {
    fn name(&self) -> String {
        format!("Update Vendor Template for Policy '{}'", self.policy.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.policy.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let policy: Policy = load(tx, self.policy.id).await?;
        let controller = network_controller(ctx, tx, &vs).await?;
        let template = VendorTemplate {
            name: policy.name,
            ..self.template.clone()
        };
        controller.update_template(&self.service_id, &template).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Removes a template whose policy is gone or marked for deletion.
#[derive(Debug, Clone)]
pub struct RemoveVendorTemplateTask {
    vs: LockObjectReference,
    service_id: String,
    template: VendorTemplate,
}

impl RemoveVendorTemplateTask {
    pub fn new(vs: &VirtualSystem, service_id: &str, template: VendorTemplate) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            service_id: service_id.to_string(),
            template,
        }
    }
}

#[async_trait]
impl Task for RemoveVendorTemplateTask {
    fn name(&self) -> String {
        format!("Remove Vendor Template '{}'", self.template.name)
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
            .remove_template(&self.service_id, &self.template.id)
            .await?;
        Ok(TaskOutcome::Done)
    }
}
