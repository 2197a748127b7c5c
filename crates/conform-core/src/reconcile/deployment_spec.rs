//! Deployment spec conformance: one appliance server per (host, slot).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::ConformError;
use crate::domain::model::{ApplianceInstance, DeploymentSpec, DistributedAppliance, VirtualSystem};
use crate::engine::TaskContext;
use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;
use crate::ports::repository::{create, delete, list, load, update};
use crate::ports::{CloudNetworkApi, CloudServer, Transaction};
use crate::task::{FailedWithContextTask, Task, TaskKind, TaskOutcome};

use super::cloud_network;
use super::diff::keyed_diff;

/// Tag the cloud service carries on every server owned by `ds_id`.
pub fn server_tag(ds_id: u64) -> String {
    format!("ds-{ds_id}")
}

async fn cloud_for(
    ctx: &TaskContext,
    tx: &mut dyn Transaction,
    ds_id: u64,
) -> Result<(DeploymentSpec, Arc<dyn CloudNetworkApi>), ConformError> {
    let ds: DeploymentSpec = load(tx, ds_id).await?;
    let vs: VirtualSystem = load(tx, ds.virtual_system_id).await?;
    let cloud = cloud_network(ctx, tx, &vs).await?;
    Ok((ds, cloud))
}

/// Conforms the appliance instances of one deployment spec to its hosts and
/// per-host count, or tears them down when the spec (or its virtual system or
/// appliance) is marked for deletion.
#[derive(Debug, Clone)]
pub struct DeploymentSpecConformMetaTask {
    ds: LockObjectReference,
}

impl DeploymentSpecConformMetaTask {
    pub fn new(ds: &DeploymentSpec) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
        }
    }

    fn teardown(
        &self,
        ds: &DeploymentSpec,
        instances: Vec<ApplianceInstance>,
        mut servers: HashMap<String, CloudServer>,
    ) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for instance in instances {
            let server = instance.server_id.as_ref().and_then(|id| servers.remove(id));
            graph.add_task(DeleteApplianceInstanceTask::new(ds, &instance, server));
        }
        for server in servers.into_values() {
            graph.add_task(DeleteServerTask::new(ds, server));
        }
        graph.append_task(DeleteDeploymentSpecFromStore::new(ds));
        graph
    }
}

#[async_trait]
impl Task for DeploymentSpecConformMetaTask {
    fn name(&self) -> String {
        format!("Conforming to Deployment Specification '{}'", self.ds.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Meta
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.ds.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let (ds, cloud) = cloud_for(ctx, tx, self.ds.id).await?;
        let vs: VirtualSystem = load(tx, ds.virtual_system_id).await?;
        let da: DistributedAppliance = load(tx, vs.appliance_id).await?;

        let servers: HashMap<String, CloudServer> = cloud
            .list_servers(&ds.region, &server_tag(ds.id))
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let instances: Vec<ApplianceInstance> =
            list(tx, |i: &ApplianceInstance| i.deployment_spec_id == ds.id).await?;

        if ds.marked_for_deletion || vs.marked_for_deletion || da.marked_for_deletion {
            debug!(ds = %ds.name, instances = instances.len(), "tearing down deployment spec");
            return Ok(TaskOutcome::Expand(self.teardown(&ds, instances, servers)));
        }

        let available: HashSet<String> = cloud.list_hosts(&ds.region).await?.into_iter().collect();
        let mut graph = TaskGraph::new();

        let mut desired = Vec::new();
        for host in &ds.hosts {
            if !available.contains(host) {
                graph.add_task(FailedWithContextTask::new(
                    format!("Checking host '{host}' for Deployment Specification '{}'", ds.name),
                    ConformError::external(
                        "cloud-network",
                        format!("host '{host}' is not available in region '{}'", ds.region),
                    ),
                    vec![self.ds.clone()],
                ));
                continue;
            }
            for n in 0..ds.instances_per_host {
                desired.push((ds.instance_name(host, n), host.clone()));
            }
        }

        // every server some instance points at, including ones left alone below
        let referenced: HashSet<String> = instances
            .iter()
            .filter_map(|i| i.server_id.clone())
            .collect();
        // instances on a requested host that is down are neither checked nor removed
        let observed: Vec<ApplianceInstance> = instances
            .into_iter()
            .filter(|i| available.contains(&i.host) || !ds.hosts.contains(&i.host))
            .collect();

        let server_of = |i: &ApplianceInstance| i.server_id.as_ref().and_then(|id| servers.get(id));
        let diff = keyed_diff(
            desired,
            observed,
            |(name, _)| name.clone(),
            |i| i.name.clone(),
            |_, i| match server_of(i) {
                None => true,
                Some(server) => server.ip_address != i.ip_address,
            },
        );

        for (name, host) in diff.create {
            graph.add_task(DeployApplianceInstanceTask::new(&ds, name, host, None));
        }
        for ((name, host), instance) in diff.update {
            match server_of(&instance) {
                None => {
                    graph.add_task(DeployApplianceInstanceTask::new(&ds, name, host, Some(&instance)));
                }
                Some(server) => {
                    graph.add_task(RefreshApplianceInstanceTask::new(&ds, &instance, server));
                }
            }
        }
        for instance in diff.delete {
            let server = server_of(&instance).cloned();
            graph.add_task(DeleteApplianceInstanceTask::new(&ds, &instance, server));
        }
        for server in servers.values().filter(|s| !referenced.contains(&s.id)) {
            graph.add_task(DeleteServerTask::new(&ds, server.clone()));
        }

        Ok(TaskOutcome::Expand(graph))
    }
}

/// Creates a server for one slot and records it. With `instance` set the
/// slot already has a record whose server vanished.
#[derive(Debug, Clone)]
pub struct DeployApplianceInstanceTask {
    ds: LockObjectReference,
    name: String,
    host: String,
    instance: Option<LockObjectReference>,
}

impl DeployApplianceInstanceTask {
    pub fn new(
        ds: &DeploymentSpec,
        name: String,
        host: String,
        instance: Option<&ApplianceInstance>,
    ) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
            name,
            host,
            instance: instance.map(LockObjectReference::of),
        }
    }
}

#[async_trait]
impl Task for DeployApplianceInstanceTask {
    fn name(&self) -> String {
        match self.instance {
            None => format!("Create Appliance Instance '{}' on host '{}'", self.name, self.host),
            Some(_) => format!("Re-create Appliance Instance '{}' on host '{}'", self.name, self.host),
        }
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        let mut objects = vec![self.ds.clone()];
        objects.extend(self.instance.clone());
        objects
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let (ds, cloud) = cloud_for(ctx, tx, self.ds.id).await?;
        let server = cloud
            .create_server(&ds.region, &server_tag(ds.id), &self.name, &self.host)
            .await?;
        match &self.instance {
            Some(reference) => {
                let mut instance: ApplianceInstance = load(tx, reference.id).await?;
                instance.server_id = Some(server.id);
                instance.ip_address = server.ip_address;
                update(tx, instance).await?;
            }
            None => {
                create(
                    tx,
                    ApplianceInstance {
                        id: 0,
                        name: self.name.clone(),
                        deployment_spec_id: ds.id,
                        virtual_system_id: ds.virtual_system_id,
                        host: self.host.clone(),
                        server_id: Some(server.id),
                        ip_address: server.ip_address,
                        mgr_member_id: None,
                    },
                )
                .await?;
            }
        }
        Ok(TaskOutcome::Done)
    }
}

/// Copies the server's current address onto the instance record.
#[derive(Debug, Clone)]
pub struct RefreshApplianceInstanceTask {
    ds: LockObjectReference,
    instance: LockObjectReference,
    ip_address: Option<String>,
}

impl RefreshApplianceInstanceTask {
    pub fn new(ds: &DeploymentSpec, instance: &ApplianceInstance, server: &CloudServer) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
            instance: LockObjectReference::of(instance),
            ip_address: server.ip_address.clone(),
        }
    }
}

#[async_trait]
impl Task for RefreshApplianceInstanceTask {
    fn name(&self) -> String {
        format!("Update Appliance Instance '{}'", self.instance.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.ds.clone(), self.instance.clone()]
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let mut instance: ApplianceInstance = load(tx, self.instance.id).await?;
        instance.ip_address = self.ip_address.clone();
        update(tx, instance).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Deletes the instance's server, if it still has one, and its record.
#[derive(Debug, Clone)]
pub struct DeleteApplianceInstanceTask {
    ds: LockObjectReference,
    instance: LockObjectReference,
    server: Option<CloudServer>,
}

impl DeleteApplianceInstanceTask {
    pub fn new(ds: &DeploymentSpec, instance: &ApplianceInstance, server: Option<CloudServer>) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
            instance: LockObjectReference::of(instance),
            server,
        }
    }
}

#[async_trait]
impl Task for DeleteApplianceInstanceTask {
    fn name(&self) -> String {
        format!("Delete Appliance Instance '{}'", self.instance.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.ds.clone(), self.instance.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        if let Some(server) = &self.server {
            let (ds, cloud) = cloud_for(ctx, tx, self.ds.id).await?;
            cloud.delete_server(&ds.region, &server.id).await?;
        }
        delete::<ApplianceInstance>(tx, self.instance.id).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Deletes a server tagged for the spec that no instance record owns.
#[derive(Debug, Clone)]
pub struct DeleteServerTask {
    ds: LockObjectReference,
    server: CloudServer,
}

impl DeleteServerTask {
    pub fn new(ds: &DeploymentSpec, server: CloudServer) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
            server,
        }
    }
}

#[async_trait]
impl Task for DeleteServerTask {
    fn name(&self) -> String {
        format!("Delete unmanaged Server '{}'", self.server.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.ds.clone()]
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        let (ds, cloud) = cloud_for(ctx, tx, self.ds.id).await?;
        cloud.delete_server(&ds.region, &self.server.id).await?;
        Ok(TaskOutcome::Done)
    }
}

/// Final teardown step. Only reached once every instance is gone.
#[derive(Debug, Clone)]
pub struct DeleteDeploymentSpecFromStore {
    ds: LockObjectReference,
}

impl DeleteDeploymentSpecFromStore {
    pub fn new(ds: &DeploymentSpec) -> Self {
        Self {
            ds: LockObjectReference::of(ds),
        }
    }
}

#[async_trait]
impl Task for DeleteDeploymentSpecFromStore {
    fn name(&self) -> String {
        format!("Delete Deployment Specification '{}'", self.ds.name)
    }

    fn objects(&self) -> Vec<LockObjectReference> {
        vec![self.ds.clone()]
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        tx: &mut dyn Transaction,
    ) -> Result<TaskOutcome, ConformError> {
        delete::<DeploymentSpec>(tx, self.ds.id).await?;
        Ok(TaskOutcome::Done)
    }
}
