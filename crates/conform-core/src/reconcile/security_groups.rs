//! Security-group sync with the appliance manager.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::domain::model::{SecurityGroupInterface, VirtualSystem};
use crate::engine::TaskContext;
use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;
use crate::ports::repository::{delete, list, load, update};
use crate::ports::{ManagerSecurityGroup, Transaction};
use crate::task::{Task, TaskKind, TaskOutcome};

use super::appliance_manager;
use super::diff::keyed_diff;

/// Match key: the stored registration id when the manager still knows it,
/// otherwise the group name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Id(String),
    Name(String),
}

fn sorted(ips: &[String]) -> Vec<&str> {
    let mut ips: Vec<&str> = ips.iter().map(String::as_str).collect();
    ips.sort_unstable();
    ips
}

fn drifted(sgi: &SecurityGroupInterface, group: &ManagerSecurityGroup) -> bool {
    sgi.name != group.name
        || sorted(&sgi.member_ips) != sorted(&group.member_ips)
        || sgi.mgr_security_group_id.as_deref() != Some(group.id.as_str())
}

/// Diffs the virtual system's security group interfaces against the groups
/// under its manager device. The device exclusively owns those groups, so
/// groups nothing maps to are deleted.
#[derive(Debug, Clone)]
pub struct ManagerSecurityGroupsCheckMetaTask {
    vs: LockObjectReference,
}

impl ManagerSecurityGroupsCheckMetaTask {
    pub fn new(vs: &VirtualSystem) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
        }
    }
}

#[async_trait]
impl Task for ManagerSecurityGroupsCheckMetaTask {
    fn name(&self) -> String {
        format!("Checking Security Groups for Virtual System '{}'", self.vs.name)
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
        let Some(device_id) = vs.mgr_device_id.clone() else {
            return Ok(TaskOutcome::Done);
        };
        if !manager.syncs_security_groups() {
            return Ok(TaskOutcome::Done);
        }

        let groups = manager.list_security_groups(&device_id).await?;
        let interfaces: Vec<SecurityGroupInterface> =
            list(tx, |s: &SecurityGroupInterface| s.virtual_system_id == vs.id).await?;
        let (doomed, wanted): (Vec<_>, Vec<_>) =
            interfaces.into_iter().partition(|s| s.marked_for_deletion);

        let known_ids: HashSet<String> = groups.iter().map(|g| g.id.clone()).collect();
        let key_of_interface = |s: &SecurityGroupInterface| match &s.mgr_security_group_id {
            Some(id) if known_ids.contains(id) => GroupKey::Id(id.clone()),
            _ => GroupKey::Name(s.name.clone()),
        };
        let claimed_ids: HashSet<String> = wanted
            .iter()
            .chain(doomed.iter())
            .filter_map(|s| match key_of_interface(s) {
                GroupKey::Id(id) => Some(id),
                GroupKey::Name(_) => None,
            })
            .collect();
        let key_of_group = |g: &ManagerSecurityGroup| {
            if claimed_ids.contains(&g.id) {
                GroupKey::Id(g.id.clone())
            } else {
                GroupKey::Name(g.name.clone())
            }
        };

        let mut graph = TaskGraph::new();

        // marked interfaces first claim their remote group, if any
        let doomed_diff = keyed_diff(doomed, groups, key_of_interface, key_of_group, |_, _| true);
        for sgi in doomed_diff.create {
            graph.add_task(PurgeSecurityGroupInterfaceTask::new(&vs, &sgi, &device_id, None));
        }
        for (sgi, group) in doomed_diff.update {
            graph.add_task(PurgeSecurityGroupInterfaceTask::new(
                &vs,
                &sgi,
                &device_id,
                Some(group),
            ));
        }

        let diff = keyed_diff(wanted, doomed_diff.delete, key_of_interface, key_of_group, drifted);
        for sgi in diff.create {
            graph.add_task(CreateManagerSecurityGroupTask::new(&vs, &sgi, &device_id));
        }
        for (sgi, group) in diff.update {
            graph.add_task(UpdateManagerSecurityGroupTask::new(&vs, &sgi, &device_id, group));
        }
        for orphan in diff.delete {
            graph.add_task(DeleteManagerSecurityGroupTask::new(&vs, &device_id, orphan));
        }

        Ok(TaskOutcome::Expand(graph))
    }
}

#[derive(Debug, Clone)]
pub struct CreateManagerSecurityGroupTask {
    vs: LockObjectReference,
    sgi: LockObjectReference,
    device_id: String,
}

impl CreateManagerSecurityGroupTask {
    pub fn new(vs: &VirtualSystem, sgi: &SecurityGroupInterface, device_id: &str) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            sgi: LockObjectReference::of(sgi),
            device_id: device_id.to_string(),
        }
    }
}

#[async_trait]
impl Task for CreateManagerSecurityGroupTask {
    fn name(&self) -> String {
        format!("Create Manager Security Group '{}'", self.sgi.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.sgi.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let mut sgi: SecurityGroupInterface = load(tx, self.sgi.id).await?;
        let manager = appliance_manager(ctx, tx, &vs).await?;
        let group_id = manager
            .create_security_group(&self.device_id, &sgi.name, &sgi.member_ips)
            .await?;
        sgi.mgr_security_group_id = Some(group_id);
        update(tx, sgi).await?;
        Ok(TaskOutcome::Done)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateManagerSecurityGroupTask {
    vs: LockObjectReference,
    sgi: LockObjectReference,
    device_id: String,
    group_id: String,
}

impl UpdateManagerSecurityGroupTask {
    pub fn new(
        vs: &VirtualSystem,
        sgi: &SecurityGroupInterface,
        device_id: &str,
        group: ManagerSecurityGroup,
    ) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            sgi: LockObjectReference::of(sgi),
            device_id: device_id.to_string(),
            group_id: group.id,
        }
    }
}

#[async_trait]
impl Task for UpdateManagerSecurityGroupTask {
    fn name(&self) -> String {
        format!("Update Manager Security Group '{}'", self.sgi.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.sgi.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let vs: VirtualSystem = load(tx, self.vs.id).await?;
        let mut sgi: SecurityGroupInterface = load(tx, self.sgi.id).await?;
        let manager = appliance_manager(ctx, tx, &vs).await?;
        manager
            .update_security_group(
                &self.device_id,
                &ManagerSecurityGroup {
                    id: self.group_id.clone(),
                    name: sgi.name.clone(),
                    member_ips: sgi.member_ips.clone(),
                },
            )
            .await?;
        if sgi.mgr_security_group_id.as_deref() != Some(self.group_id.as_str()) {
            sgi.mgr_security_group_id = Some(self.group_id.clone());
            update(tx, sgi).await?;
        }
        Ok(TaskOutcome::Done)
    }
}

/// Removes a group that no interface maps to.
#[derive(Debug, Clone)]
pub struct DeleteManagerSecurityGroupTask {
    vs: LockObjectReference,
    device_id: String,
    group: ManagerSecurityGroup,
}

impl DeleteManagerSecurityGroupTask {
    pub fn new(vs: &VirtualSystem, device_id: &str, group: ManagerSecurityGroup) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            device_id: device_id.to_string(),
            group,
        }
    }
}

#[async_trait]
impl Task for DeleteManagerSecurityGroupTask {
    fn name(&self) -> String {
        format!("Delete Manager Security Group '{}'", self.group.name)
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
            .delete_security_group(&self.device_id, &self.group.id)
            .await?;
        Ok(TaskOutcome::Done)
    }
}

/// Deletes the remote group of an interface marked for deletion, then the
/// interface itself.
#[derive(Debug, Clone)]
pub struct PurgeSecurityGroupInterfaceTask {
    vs: LockObjectReference,
    sgi: LockObjectReference,
    device_id: String,
    group: Option<ManagerSecurityGroup>,
}

impl PurgeSecurityGroupInterfaceTask {
    pub fn new(
        vs: &VirtualSystem,
        sgi: &SecurityGroupInterface,
        device_id: &str,
        group: Option<ManagerSecurityGroup>,
    ) -> Self {
        Self {
            vs: LockObjectReference::of(vs),
            sgi: LockObjectReference::of(sgi),
            device_id: device_id.to_string(),
            group,
        }
    }
}

#[async_trait]
impl Task for PurgeSecurityGroupInterfaceTask {
    fn name(&self) -> String {
        format!("Delete Security Group Interface '{}'", self.sgi.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.vs.clone(), self.sgi.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        if let Some(group) = &self.group {
            let vs: VirtualSystem = load(tx, self.vs.id).await?;
            let manager = appliance_manager(ctx, tx, &vs).await?;
            manager.delete_security_group(&self.device_id, &group.id).await?;
        }
        delete::<SecurityGroupInterface>(tx, self.sgi.id).await?;
        Ok(TaskOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ConnectorKind;
    use crate::domain::state::JobStatus;
    use crate::impls::FakeApplianceManager;
    use crate::reconcile::testing::{World, names};

    async fn registered(manager: FakeApplianceManager) -> (World, String) {
        let mut world = World::build(ConnectorKind::Cloud, manager).await;
        let device = world.manager.seed_device("vs");
        world.register_vs(Some(device.clone()), None).await;
        (world, device)
    }

    #[tokio::test]
    async fn missing_group_is_created_and_recorded() {
        let (world, device) = registered(FakeApplianceManager::new()).await;
        let sgi = world.add_sgi("web", &["10.1.0.2", "10.1.0.1"]).await;
        let check = ManagerSecurityGroupsCheckMetaTask::new(&world.vs);

        let graph = world.synthesize(&check).await;
        assert_eq!(names(&graph), vec!["Create Manager Security Group 'web'"]);

        let report = world.run_task(check.clone()).await;
        assert_eq!(report.status, JobStatus::Succeeded);
        let stored: SecurityGroupInterface = world.repo.get(sgi.id).await.unwrap();
        assert_eq!(
            stored.mgr_security_group_id.as_deref(),
            Some(world.manager.security_groups(&device)[0].id.as_str())
        );

        // member order is not drift
        assert!(world.synthesize(&check).await.is_empty());
    }

    #[tokio::test]
    async fn drift_orphans_and_marked_interfaces() {
        let (world, device) = registered(FakeApplianceManager::new()).await;
        let web_group = world.manager.seed_security_group(&device, "web", &["10.1.0.9"]);
        world.manager.seed_security_group(&device, "old", &[]);
        let gone_group = world.manager.seed_security_group(&device, "gone", &["10.1.0.3"]);

        let mut web = world.add_sgi("web", &["10.1.0.1"]).await;
        web.mgr_security_group_id = Some(web_group.clone());
        world.repo.insert(web).await;
        let mut gone = world.add_sgi("gone", &["10.1.0.3"]).await;
        gone.mgr_security_group_id = Some(gone_group);
        gone.marked_for_deletion = true;
        world.repo.insert(gone).await;
        let check = ManagerSecurityGroupsCheckMetaTask::new(&world.vs);

        let graph = world.synthesize(&check).await;

        assert_eq!(
            names(&graph),
            vec![
                "Delete Security Group Interface 'gone'",
                "Update Manager Security Group 'web'",
                "Delete Manager Security Group 'old'",
            ]
        );

        let report = world.run_task(check.clone()).await;
        assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.failed_tasks);
        let groups = world.manager.security_groups(&device);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, web_group);
        assert_eq!(groups[0].member_ips, vec!["10.1.0.1".to_string()]);
        let interfaces: Vec<SecurityGroupInterface> = world.repo.all().await;
        assert_eq!(interfaces.len(), 1);
        assert!(world.synthesize(&check).await.is_empty());
    }

    #[tokio::test]
    async fn interface_whose_group_vanished_is_matched_by_name() {
        let (world, device) = registered(FakeApplianceManager::new()).await;
        let group = world.manager.seed_security_group(&device, "web", &["10.1.0.1"]);
        let mut web = world.add_sgi("web", &["10.1.0.1"]).await;
        web.mgr_security_group_id = Some("sg-404".to_string());
        world.repo.insert(web).await;

        let graph = world.synthesize(&ManagerSecurityGroupsCheckMetaTask::new(&world.vs)).await;
        assert_eq!(names(&graph), vec!["Update Manager Security Group 'web'"]);

        world.run_task(ManagerSecurityGroupsCheckMetaTask::new(&world.vs)).await;
        let stored: Vec<SecurityGroupInterface> = world.repo.all().await;
        assert_eq!(stored[0].mgr_security_group_id, Some(group));
    }

    #[tokio::test]
    async fn nothing_without_security_group_sync() {
        let (world, _) = registered(FakeApplianceManager::with_features(true, false)).await;
        world.add_sgi("web", &["10.1.0.1"]).await;

        let graph = world.synthesize(&ManagerSecurityGroupsCheckMetaTask::new(&world.vs)).await;

        assert!(graph.is_empty());
    }
}
