//! A seeded world of fakes for reconciliation tests.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::job::JobReport;
use crate::domain::model::{
    ApplianceInstance, ConnectorKind, DeploymentSpec, DistributedAppliance, ManagerConnector, Policy,
    SecurityGroupInterface, VirtualSystem, VirtualizationConnector,
};
use crate::engine::{JobEngine, TaskContext};
use crate::graph::TaskGraph;
use crate::impls::{
    FakeApplianceManager, FakeCloudNetwork, FakeNetworkController, InMemoryRepository,
    StaticCapabilityFactory,
};
use crate::ports::Repository;
use crate::task::{Task, TaskOutcome};

use super::Conformer;
use super::deployment_spec::server_tag;

pub const REGION: &str = "r1";

pub struct World {
    pub repo: Arc<InMemoryRepository>,
    pub manager: Arc<FakeApplianceManager>,
    pub controller: Arc<FakeNetworkController>,
    pub cloud: Arc<FakeCloudNetwork>,
    pub engine: Arc<JobEngine>,
    pub mc: ManagerConnector,
    pub da: DistributedAppliance,
    pub vc: VirtualizationConnector,
    pub vs: VirtualSystem,
}

impl World {
    /// Cloud connector with hosts `h1` and `h2` in [`REGION`].
    pub async fn cloud() -> Self {
        Self::build(ConnectorKind::Cloud, FakeApplianceManager::new()).await
    }

    pub async fn sdn() -> Self {
        Self::build(ConnectorKind::Sdn, FakeApplianceManager::new()).await
    }

    pub async fn build(kind: ConnectorKind, manager: FakeApplianceManager) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let manager = Arc::new(manager);
        let controller = Arc::new(FakeNetworkController::new());
        let cloud = Arc::new(FakeCloudNetwork::new());
        cloud.add_host(REGION, "h1");
        cloud.add_host(REGION, "h2");

        let factory = StaticCapabilityFactory::new()
            .default_manager(manager.clone())
            .controller(controller.clone())
            .cloud(cloud.clone());
        let engine = JobEngine::builder()
            .config(EngineConfig {
                worker_pool_size: 4,
                lock_wait_timeout_ms: 2_000,
                ..EngineConfig::default()
            })
            .repository(repo.clone())
            .capabilities(Arc::new(factory))
            .build()
            .unwrap();

        let mc = repo
            .insert(ManagerConnector {
                id: 0,
                name: "mc".to_string(),
                endpoint: "https://manager.local".to_string(),
            })
            .await;
        let vc = repo
            .insert(VirtualizationConnector {
                id: 0,
                name: "vc".to_string(),
                kind,
                endpoint: "https://vc.local".to_string(),
            })
            .await;
        let da = repo
            .insert(DistributedAppliance {
                id: 0,
                name: "da".to_string(),
                manager_connector_id: mc.id,
                marked_for_deletion: false,
            })
            .await;
        let vs = repo
            .insert(VirtualSystem {
                id: 0,
                name: "vs".to_string(),
                appliance_id: da.id,
                connector_id: vc.id,
                mgr_device_id: None,
                sdn_service_id: None,
                marked_for_deletion: false,
            })
            .await;

        Self {
            repo,
            manager,
            controller,
            cloud,
            engine: Arc::new(engine),
            mc,
            da,
            vc,
            vs,
        }
    }

    pub fn context(&self) -> TaskContext {
        self.engine.context(self.engine.new_job_id())
    }

    pub fn conformer(&self) -> Conformer {
        Conformer::new(Arc::clone(&self.engine))
    }

    /// Execute a meta-task outside any job and return what it synthesized.
    pub async fn synthesize(&self, task: &dyn Task) -> TaskGraph {
        let ctx = self.context();
        let mut tx = self.repo.begin().await.unwrap();
        let outcome = task.execute(&ctx, tx.as_mut()).await.unwrap();
        tx.commit().await.unwrap();
        match outcome {
            TaskOutcome::Done => TaskGraph::new(),
            TaskOutcome::Expand(graph) => graph,
        }
    }

    pub async fn run_task<T: Task + 'static>(&self, task: T) -> JobReport {
        self.engine.submit_task(task).unwrap().wait().await
    }

    pub async fn vs_now(&self) -> VirtualSystem {
        self.repo.get(self.vs.id).await.unwrap()
    }

    /// Store the registration ids on the seeded virtual system.
    pub async fn register_vs(&mut self, device: Option<String>, service: Option<String>) {
        let mut vs = self.vs.clone();
        vs.mgr_device_id = device;
        vs.sdn_service_id = service;
        self.vs = self.repo.insert(vs).await;
    }

    pub async fn add_spec(&self, name: &str, hosts: &[&str], per_host: u32) -> DeploymentSpec {
        self.repo
            .insert(DeploymentSpec {
                id: 0,
                name: name.to_string(),
                virtual_system_id: self.vs.id,
                region: REGION.to_string(),
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                instances_per_host: per_host,
                marked_for_deletion: false,
            })
            .await
    }

    /// An instance record backed by a live server.
    pub async fn add_instance(&self, ds: &DeploymentSpec, host: &str, n: u32) -> ApplianceInstance {
        let name = ds.instance_name(host, n);
        let server = self.cloud.seed_server(REGION, &server_tag(ds.id), &name, host);
        self.repo
            .insert(ApplianceInstance {
                id: 0,
                name,
                deployment_spec_id: ds.id,
                virtual_system_id: self.vs.id,
                host: host.to_string(),
                server_id: Some(server.id),
                ip_address: server.ip_address,
                mgr_member_id: None,
            })
            .await
    }

    pub async fn instances(&self) -> Vec<ApplianceInstance> {
        self.repo.all().await
    }

    pub async fn add_sgi(&self, name: &str, ips: &[&str]) -> SecurityGroupInterface {
        self.repo
            .insert(SecurityGroupInterface {
                id: 0,
                name: name.to_string(),
                virtual_system_id: self.vs.id,
                member_ips: ips.iter().map(|ip| ip.to_string()).collect(),
                mgr_security_group_id: None,
                marked_for_deletion: false,
            })
            .await
    }

    pub async fn add_policy(&self, name: &str) -> Policy {
        self.repo
            .insert(Policy {
                id: 0,
                name: name.to_string(),
                appliance_id: self.da.id,
                marked_for_deletion: false,
            })
            .await
    }
}

pub fn names(graph: &TaskGraph) -> Vec<String> {
    graph.nodes().map(|n| n.name()).collect()
}
