//! Reconciliation: meta-tasks that diff desired state against the external
//! systems and synthesize corrective subgraphs.
//!
//! Every meta-task follows the same shape:
//! 1. desired state を repository から読む
//! 2. 外部システムの実状態を capability 経由で読む
//! 3. keyed diff から create / update / delete タスクを合成する
//! 4. 依存のあるものは append、独立なものは add でグラフに組む
//!
//! A lookup failure inside a branch becomes a [`FailedWithContextTask`] in
//! that branch instead of failing the whole meta-task.
//!
//! [`FailedWithContextTask`]: crate::task::FailedWithContextTask

pub mod conform;
pub mod deployment_spec;
pub mod diff;
pub mod manager_devices;
pub mod policy_templates;
pub mod security_groups;
pub mod virtual_system;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::domain::errors::ConformError;
use crate::domain::model::{
    DistributedAppliance, ManagerConnector, VirtualSystem, VirtualizationConnector,
};
use crate::engine::TaskContext;
use crate::ports::repository::load;
use crate::ports::{ApplianceManagerApi, CloudNetworkApi, NetworkControllerApi, Transaction};

pub use self::conform::Conformer;
pub use self::deployment_spec::DeploymentSpecConformMetaTask;
pub use self::diff::{KeyedDiff, keyed_diff};
pub use self::manager_devices::ManagerDevicesCheckMetaTask;
pub use self::policy_templates::PolicyTemplatesCheckMetaTask;
pub use self::security_groups::ManagerSecurityGroupsCheckMetaTask;
pub use self::virtual_system::VirtualSystemConformMetaTask;

pub(crate) async fn appliance_manager(
    ctx: &TaskContext,
    tx: &mut dyn Transaction,
    vs: &VirtualSystem,
) -> Result<Arc<dyn ApplianceManagerApi>, ConformError> {
    let da: DistributedAppliance = load(tx, vs.appliance_id).await?;
    let mc: ManagerConnector = load(tx, da.manager_connector_id).await?;
    ctx.capabilities.appliance_manager(&mc)
}

pub(crate) async fn network_controller(
    ctx: &TaskContext,
    tx: &mut dyn Transaction,
    vs: &VirtualSystem,
) -> Result<Arc<dyn NetworkControllerApi>, ConformError> {
    let vc: VirtualizationConnector = load(tx, vs.connector_id).await?;
    ctx.capabilities.network_controller(&vc)
}

pub(crate) async fn cloud_network(
    ctx: &TaskContext,
    tx: &mut dyn Transaction,
    vs: &VirtualSystem,
) -> Result<Arc<dyn CloudNetworkApi>, ConformError> {
    let vc: VirtualizationConnector = load(tx, vs.connector_id).await?;
    ctx.capabilities.cloud_network(&vc)
}
