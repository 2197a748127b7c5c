//! StaticCapabilityFactory - 固定のクライアントを返す CapabilityFactory
//!
//! コネクタ ID ごとにクライアントを登録できます。登録がなければ
//! `default_*` で設定したクライアントにフォールバックします。

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::ConformError;
use crate::domain::model::{ConnectorKind, ManagerConnector, VirtualizationConnector};
use crate::ports::{ApplianceManagerApi, CapabilityFactory, CloudNetworkApi, NetworkControllerApi};

#[derive(Default, Clone)]
pub struct StaticCapabilityFactory {
    managers: HashMap<u64, Arc<dyn ApplianceManagerApi>>,
    default_manager: Option<Arc<dyn ApplianceManagerApi>>,
    controller: Option<Arc<dyn NetworkControllerApi>>,
    cloud: Option<Arc<dyn CloudNetworkApi>>,
}

impl StaticCapabilityFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_manager(mut self, api: Arc<dyn ApplianceManagerApi>) -> Self {
        self.default_manager = Some(api);
        self
    }

    pub fn manager_for(mut self, connector_id: u64, api: Arc<dyn ApplianceManagerApi>) -> Self {
        self.managers.insert(connector_id, api);
        self
    }

    pub fn controller(mut self, api: Arc<dyn NetworkControllerApi>) -> Self {
        self.controller = Some(api);
        self
    }

    pub fn cloud(mut self, api: Arc<dyn CloudNetworkApi>) -> Self {
        self.cloud = Some(api);
        self
    }
}

fn wrong_kind(connector: &VirtualizationConnector, wanted: ConnectorKind) -> ConformError {
    ConformError::validation(format!(
        "connector '{}' is {:?}, not {:?}",
        connector.name, connector.kind, wanted
    ))
}

fn missing(what: &str, connector: &str) -> ConformError {
    ConformError::validation(format!("no {what} client configured for connector '{connector}'"))
}

impl CapabilityFactory for StaticCapabilityFactory {
    fn appliance_manager(
        &self,
        connector: &ManagerConnector,
    ) -> Result<Arc<dyn ApplianceManagerApi>, ConformError> {
        self.managers
            .get(&connector.id)
            .or(self.default_manager.as_ref())
            .cloned()
            .ok_or_else(|| missing("appliance manager", &connector.name))
    }

    fn network_controller(
        &self,
        connector: &VirtualizationConnector,
    ) -> Result<Arc<dyn NetworkControllerApi>, ConformError> {
        if connector.kind != ConnectorKind::Sdn {
            return Err(wrong_kind(connector, ConnectorKind::Sdn));
        }
        self.controller
            .clone()
            .ok_or_else(|| missing("network controller", &connector.name))
    }

    fn cloud_network(
        &self,
        connector: &VirtualizationConnector,
    ) -> Result<Arc<dyn CloudNetworkApi>, ConformError> {
        if connector.kind != ConnectorKind::Cloud {
            return Err(wrong_kind(connector, ConnectorKind::Cloud));
        }
        self.cloud
            .clone()
            .ok_or_else(|| missing("cloud network", &connector.name))
    }
}
