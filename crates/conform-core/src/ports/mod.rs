//! Ports - 抽象化レイヤー
//!
//! コアが外部に要求するインターフェースを定義します（Hexagonal Architecture の「ポート」）。
//! - 永続化: Repository / Transaction
//! - 外部システム: ApplianceManagerApi / NetworkControllerApi / CloudNetworkApi
//! - 解決: CapabilityFactory
//! - 時刻と ID: Clock / IdGenerator

pub mod capability;
pub mod clock;
pub mod factory;
pub mod id_generator;
pub mod repository;

pub use self::capability::{
    ApplianceManagerApi, CloudNetworkApi, CloudServer, ControllerService, DeviceMember,
    ManagerDevice, ManagerSecurityGroup, NetworkControllerApi, VendorTemplate,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::factory::CapabilityFactory;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::repository::{Repository, Transaction};
