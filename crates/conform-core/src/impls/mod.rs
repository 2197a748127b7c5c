//! 実装（開発・テスト用）
//!
//! 本番のクライアントや ORM はスコープ外です。ここにあるのは
//! テストと CLI デモが使うインメモリ実装だけです。

pub mod fake_cloud;
pub mod fake_controller;
pub mod fake_manager;
pub mod memory_repository;
pub mod script;
pub mod static_factory;

pub use self::fake_cloud::FakeCloudNetwork;
pub use self::fake_controller::FakeNetworkController;
pub use self::fake_manager::FakeApplianceManager;
pub use self::memory_repository::InMemoryRepository;
pub use self::script::CallScript;
pub use self::static_factory::StaticCapabilityFactory;
