//! CapabilityFactory port - コネクタから具体的なクライアントを得る
//!
//! コアはここで返される trait object だけに依存し、
//! プラグイン探索などの解決方法は関知しません。

use std::sync::Arc;

use crate::domain::errors::ConformError;
use crate::domain::model::{ManagerConnector, VirtualizationConnector};

use super::capability::{ApplianceManagerApi, CloudNetworkApi, NetworkControllerApi};

pub trait CapabilityFactory: Send + Sync {
    fn appliance_manager(
        &self,
        connector: &ManagerConnector,
    ) -> Result<Arc<dyn ApplianceManagerApi>, ConformError>;

    /// Only meaningful for `ConnectorKind::Sdn` connectors.
    fn network_controller(
        &self,
        connector: &VirtualizationConnector,
    ) -> Result<Arc<dyn NetworkControllerApi>, ConformError>;

    /// Only meaningful for `ConnectorKind::Cloud` connectors.
    fn cloud_network(
        &self,
        connector: &VirtualizationConnector,
    ) -> Result<Arc<dyn CloudNetworkApi>, ConformError>;
}
