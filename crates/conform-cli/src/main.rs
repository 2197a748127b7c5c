//! conform - run reconciliation jobs against in-memory fakes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use conform_core::config::ConformConfig;
use conform_core::domain::{
    ConnectorKind, DeploymentSpec, DistributedAppliance, JobReport, JobStatus, ManagerConnector,
    Policy, SecurityGroupInterface, VirtualSystem, VirtualizationConnector,
};
use conform_core::engine::JobEngine;
use conform_core::impls::{
    FakeApplianceManager, FakeCloudNetwork, FakeNetworkController, InMemoryRepository,
    StaticCapabilityFactory,
};
use conform_core::reconcile::Conformer;

#[derive(Parser, Debug)]
#[command(name = "conform")]
#[command(version, about = "Reconciliation controller demo", long_about = None)]
struct Cli {
    /// Path to the configuration file (missing file = defaults)
    #[arg(short, long, default_value = "conform.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed fake systems, conform twice and print both job reports
    Demo {
        /// Print reports as pretty JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(config: &ConformConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConformConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config);

    match cli.command {
        Commands::Demo { json } => demo(config, json).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

struct Seeded {
    cloud_vs: u64,
    sdn_vs: u64,
}

async fn seed(repo: &InMemoryRepository) -> Seeded {
    let mc = repo
        .insert(ManagerConnector {
            id: 0,
            name: "manager".to_string(),
            endpoint: "https://manager.example".to_string(),
        })
        .await;
    let da = repo
        .insert(DistributedAppliance {
            id: 0,
            name: "ngfw".to_string(),
            manager_connector_id: mc.id,
            marked_for_deletion: false,
        })
        .await;
    let cloud_vc = repo
        .insert(VirtualizationConnector {
            id: 0,
            name: "cloud".to_string(),
            kind: ConnectorKind::Cloud,
            endpoint: "https://cloud.example".to_string(),
        })
        .await;
    let sdn_vc = repo
        .insert(VirtualizationConnector {
            id: 0,
            name: "sdn".to_string(),
            kind: ConnectorKind::Sdn,
            endpoint: "https://sdn.example".to_string(),
        })
        .await;

    let cloud_vs = repo
        .insert(VirtualSystem {
            id: 0,
            name: "ngfw-cloud".to_string(),
            appliance_id: da.id,
            connector_id: cloud_vc.id,
            mgr_device_id: None,
            sdn_service_id: None,
            marked_for_deletion: false,
        })
        .await;
    let sdn_vs = repo
        .insert(VirtualSystem {
            id: 0,
            name: "ngfw-sdn".to_string(),
            appliance_id: da.id,
            connector_id: sdn_vc.id,
            mgr_device_id: None,
            sdn_service_id: None,
            marked_for_deletion: false,
        })
        .await;

    repo.insert(DeploymentSpec {
        id: 0,
        name: "east".to_string(),
        virtual_system_id: cloud_vs.id,
        region: "east".to_string(),
        hosts: vec!["host-a".to_string(), "host-b".to_string()],
        instances_per_host: 1,
        marked_for_deletion: false,
    })
    .await;
    repo.insert(SecurityGroupInterface {
        id: 0,
        name: "web-tier".to_string(),
        virtual_system_id: cloud_vs.id,
        member_ips: vec!["192.0.2.10".to_string(), "192.0.2.11".to_string()],
        mgr_security_group_id: None,
        marked_for_deletion: false,
    })
    .await;
    repo.insert(Policy {
        id: 0,
        name: "block-outbound".to_string(),
        appliance_id: da.id,
        marked_for_deletion: false,
    })
    .await;

    Seeded {
        cloud_vs: cloud_vs.id,
        sdn_vs: sdn_vs.id,
    }
}

fn print_report(report: &JobReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{} [{:?}] job={}", report.name, report.status, report.job_id);
    for task in &report.tasks {
        match &task.error {
            Some(error) => println!("  {:?} {}: {}", task.status, task.name, error),
            None => println!("  {:?} {}", task.status, task.name),
        }
    }
    println!(
        "  corrective tasks executed: {}",
        report.executed_corrective_tasks().len()
    );
    Ok(())
}

async fn demo(config: ConformConfig, json: bool) -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let cloud = Arc::new(FakeCloudNetwork::new());
    cloud.add_host("east", "host-a");
    cloud.add_host("east", "host-b");
    let factory = StaticCapabilityFactory::new()
        .default_manager(Arc::new(FakeApplianceManager::new()))
        .controller(Arc::new(FakeNetworkController::new()))
        .cloud(cloud);

    let engine = JobEngine::builder()
        .config(config.engine)
        .repository(repo.clone())
        .capabilities(Arc::new(factory))
        .build()?;
    let engine = Arc::new(engine);
    let conformer = Conformer::new(Arc::clone(&engine));
    let seeded = seed(&repo).await;

    for round in 1..=2 {
        info!(round, "conform round");
        let cloud_job = conformer.conform_virtual_system(seeded.cloud_vs).await?;
        let sdn_job = conformer.conform_virtual_system(seeded.sdn_vs).await?;
        for report in [cloud_job.wait().await, sdn_job.wait().await] {
            print_report(&report, json)?;
            if report.status != JobStatus::Succeeded {
                bail!("job '{}' ended {:?}", report.name, report.status);
            }
        }
    }

    let status = engine.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    engine.shutdown().await;
    Ok(())
}
