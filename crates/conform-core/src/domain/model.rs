//! Desired-state model.
//!
//! These are the persisted records a reconciliation run compares against the
//! live state of the external systems. The engine itself never interprets
//! them; only the meta-tasks in `reconcile` do.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a persisted domain object. Also the type half of a lock reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    ManagerConnector,
    VirtualizationConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    ApplianceInstance,
    SecurityGroupInterface,
    Policy,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectType::ManagerConnector => "Manager Connector",
            ObjectType::VirtualizationConnector => "Virtualization Connector",
            ObjectType::DistributedAppliance => "Distributed Appliance",
            ObjectType::VirtualSystem => "Virtual System",
            ObjectType::DeploymentSpec => "Deployment Specification",
            ObjectType::ApplianceInstance => "Distributed Appliance Instance",
            ObjectType::SecurityGroupInterface => "Security Group Interface",
            ObjectType::Policy => "Policy",
        };
        f.write_str(label)
    }
}

/// Which control-plane family a virtualization connector talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Network virtualization controller (service + vendor templates).
    Sdn,
    /// Cloud networking service (appliance servers per host).
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConnector {
    pub id: u64,
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualizationConnector {
    pub id: u64,
    pub name: String,
    pub kind: ConnectorKind,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedAppliance {
    pub id: u64,
    pub name: String,
    pub manager_connector_id: u64,
    #[serde(default)]
    pub marked_for_deletion: bool,
}

/// An appliance bound to one virtualization connector.
///
/// `mgr_device_id` / `sdn_service_id` are the registration ids handed back by
/// the appliance manager and the network controller. `None` means "never
/// registered".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSystem {
    pub id: u64,
    pub name: String,
    pub appliance_id: u64,
    pub connector_id: u64,
    #[serde(default)]
    pub mgr_device_id: Option<String>,
    #[serde(default)]
    pub sdn_service_id: Option<String>,
    #[serde(default)]
    pub marked_for_deletion: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub id: u64,
    pub name: String,
    pub virtual_system_id: u64,
    pub region: String,
    pub hosts: Vec<String>,
    pub instances_per_host: u32,
    #[serde(default)]
    pub marked_for_deletion: bool,
}

impl DeploymentSpec {
    /// Name of the `n`th instance on `host`. Stable across runs; the instance diff keys on it.
    pub fn instance_name(&self, host: &str, n: u32) -> String {
        format!("{}-{}-{}", self.name, host, n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceInstance {
    pub id: u64,
    pub name: String,
    pub deployment_spec_id: u64,
    pub virtual_system_id: u64,
    pub host: String,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub mgr_member_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupInterface {
    pub id: u64,
    pub name: String,
    pub virtual_system_id: u64,
    pub member_ips: Vec<String>,
    #[serde(default)]
    pub mgr_security_group_id: Option<String>,
    #[serde(default)]
    pub marked_for_deletion: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    pub name: String,
    pub appliance_id: u64,
    #[serde(default)]
    pub marked_for_deletion: bool,
}

/// (type, id) address of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub object_type: ObjectType,
    pub id: u64,
}

impl EntityKey {
    pub fn new(object_type: ObjectType, id: u64) -> Self {
        Self { object_type, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_type, self.id)
    }
}

/// Type-erased record as the repository stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    ManagerConnector(ManagerConnector),
    VirtualizationConnector(VirtualizationConnector),
    DistributedAppliance(DistributedAppliance),
    VirtualSystem(VirtualSystem),
    DeploymentSpec(DeploymentSpec),
    ApplianceInstance(ApplianceInstance),
    SecurityGroupInterface(SecurityGroupInterface),
    Policy(Policy),
}

/// Typed view over one `Entity` variant.
pub trait DomainEntity: Clone + Send + Sync + Sized + 'static {
    const OBJECT_TYPE: ObjectType;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
    fn name(&self) -> &str;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: Entity) -> Option<Self>;

    fn key(&self) -> EntityKey {
        EntityKey::new(Self::OBJECT_TYPE, self.id())
    }
}

macro_rules! domain_entities {
    ($($variant:ident),* $(,)?) => {
        $(
            impl DomainEntity for $variant {
                const OBJECT_TYPE: ObjectType = ObjectType::$variant;

                fn id(&self) -> u64 {
                    self.id
                }

                fn set_id(&mut self, id: u64) {
                    self.id = id;
                }

                fn name(&self) -> &str {
                    &self.name
                }

                fn into_entity(self) -> Entity {
                    Entity::$variant(self)
                }

                fn from_entity(entity: Entity) -> Option<Self> {
                    match entity {
                        Entity::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*

        impl Entity {
            pub fn object_type(&self) -> ObjectType {
                match self {
                    $(Entity::$variant(_) => ObjectType::$variant,)*
                }
            }

            pub fn id(&self) -> u64 {
                match self {
                    $(Entity::$variant(inner) => inner.id,)*
                }
            }

            pub fn name(&self) -> &str {
                match self {
                    $(Entity::$variant(inner) => &inner.name,)*
                }
            }

            pub(crate) fn set_id(&mut self, id: u64) {
                match self {
                    $(Entity::$variant(inner) => inner.id = id,)*
                }
            }
        }
    };
}

domain_entities!(
    ManagerConnector,
    VirtualizationConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    ApplianceInstance,
    SecurityGroupInterface,
    Policy,
);

impl Entity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.object_type(), self.id())
    }
}
