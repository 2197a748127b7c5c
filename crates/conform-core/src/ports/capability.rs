//! External-system capability ports.
//!
//! One trait per control-plane family. Implementations wrap the wire clients;
//! every error they return is an `ExternalSystem` failure of the calling task.
//! Deadlines are the implementation's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ConformError;

// ========================================
// Appliance manager
// ========================================

/// Device container the manager keeps for one virtual system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerDevice {
    pub id: String,
    pub name: String,
}

/// One appliance instance as registered under a device container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMember {
    pub id: String,
    pub name: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSecurityGroup {
    pub id: String,
    pub name: String,
    pub member_ips: Vec<String>,
}

#[async_trait]
pub trait ApplianceManagerApi: Send + Sync {
    /// Whether the manager groups instances under a device container.
    fn supports_device_groups(&self) -> bool;

    /// Whether security groups are pushed to the manager.
    fn syncs_security_groups(&self) -> bool;

    async fn find_device(&self, device_id: &str) -> Result<Option<ManagerDevice>, ConformError>;

    async fn create_device(&self, name: &str) -> Result<String, ConformError>;

    async fn update_device(&self, device: &ManagerDevice) -> Result<(), ConformError>;

    async fn delete_device(&self, device_id: &str) -> Result<(), ConformError>;

    async fn list_members(&self, device_id: &str) -> Result<Vec<DeviceMember>, ConformError>;

    async fn create_member(
        &self,
        device_id: &str,
        name: &str,
        ip_address: Option<&str>,
    ) -> Result<String, ConformError>;

    async fn update_member(&self, device_id: &str, member: &DeviceMember) -> Result<(), ConformError>;

    async fn delete_member(&self, device_id: &str, member_id: &str) -> Result<(), ConformError>;

    async fn list_security_groups(
        &self,
        device_id: &str,
    ) -> Result<Vec<ManagerSecurityGroup>, ConformError>;

    async fn create_security_group(
        &self,
        device_id: &str,
        name: &str,
        member_ips: &[String],
    ) -> Result<String, ConformError>;

    async fn update_security_group(
        &self,
        device_id: &str,
        group: &ManagerSecurityGroup,
    ) -> Result<(), ConformError>;

    async fn delete_security_group(&self, device_id: &str, group_id: &str) -> Result<(), ConformError>;
}

// ========================================
// Network virtualization controller
// ========================================

/// Service registration for one virtual system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerService {
    pub id: String,
    pub name: String,
}

/// Vendor template the controller exposes for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorTemplate {
    pub id: String,
    pub policy_id: u64,
    pub name: String,
}

#[async_trait]
pub trait NetworkControllerApi: Send + Sync {
    async fn find_service(&self, service_id: &str) -> Result<Option<ControllerService>, ConformError>;

    async fn register_service(&self, name: &str) -> Result<String, ConformError>;

    async fn update_service(&self, service: &ControllerService) -> Result<(), ConformError>;

    /// Removes the service and every template under it.
    async fn unregister_service(&self, service_id: &str) -> Result<(), ConformError>;

    async fn list_templates(&self, service_id: &str) -> Result<Vec<VendorTemplate>, ConformError>;

    async fn register_template(
        &self,
        service_id: &str,
        policy_id: u64,
        name: &str,
    ) -> Result<String, ConformError>;

    async fn update_template(&self, service_id: &str, template: &VendorTemplate) -> Result<(), ConformError>;

    async fn remove_template(&self, service_id: &str, template_id: &str) -> Result<(), ConformError>;
}

// ========================================
// Cloud network service
// ========================================

/// An appliance server. `tag` marks the deployment spec that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudServer {
    pub id: String,
    pub name: String,
    pub host: String,
    pub tag: String,
    pub ip_address: Option<String>,
}

#[async_trait]
pub trait CloudNetworkApi: Send + Sync {
    async fn list_hosts(&self, region: &str) -> Result<Vec<String>, ConformError>;

    async fn list_servers(&self, region: &str, tag: &str) -> Result<Vec<CloudServer>, ConformError>;

    async fn create_server(
        &self,
        region: &str,
        tag: &str,
        name: &str,
        host: &str,
    ) -> Result<CloudServer, ConformError>;

    async fn delete_server(&self, region: &str, server_id: &str) -> Result<(), ConformError>;
}
