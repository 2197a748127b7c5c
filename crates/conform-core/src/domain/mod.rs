//! Domain model: ids, errors, states, desired-state records and job reports.

pub mod errors;
pub mod ids;
pub mod job;
pub mod model;
pub mod state;

pub use self::errors::{ConformError, ErrorKind};
pub use self::ids::{JobId, TaskId};
pub use self::job::{FailedTask, JobRecord, JobReport, TaskReport};
pub use self::model::{
    ApplianceInstance, ConnectorKind, DeploymentSpec, DistributedAppliance, DomainEntity, Entity,
    EntityKey, ManagerConnector, ObjectType, Policy, SecurityGroupInterface, VirtualSystem,
    VirtualizationConnector,
};
pub use self::state::{JobStatus, TaskStatus};
