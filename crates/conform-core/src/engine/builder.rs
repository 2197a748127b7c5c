//! EngineBuilder - JobEngine の構築とワイヤリング
//!
//! 必須の collaborator が欠けていれば `build()` で即座に失敗します（Fail-fast）。
//! 省略可能なものは既定値で補います:
//! - clock: `SystemClock`
//! - ids: `UlidGenerator<SystemClock>`
//! - locks: config の待ち時間上限を持つ新しい `LockRegistry`

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::lock::LockRegistry;
use crate::ports::{CapabilityFactory, Clock, IdGenerator, Repository, SystemClock, UlidGenerator};

use super::JobEngine;

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// # 使用例
/// ```ignore
/// let engine = JobEngine::builder()
///     .config(config.engine)
///     .repository(Arc::new(InMemoryRepository::new()))
///     .capabilities(Arc::new(factory))
///     .build()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    repository: Option<Arc<dyn Repository>>,
    capabilities: Option<Arc<dyn CapabilityFactory>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    locks: Option<Arc<LockRegistry>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityFactory>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Share a registry with another engine or with the caller.
    pub fn locks(mut self, locks: Arc<LockRegistry>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Wire everything and start the worker pool.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn build(self) -> Result<JobEngine, BuildError> {
        self.config.validate()?;
        let repository = self
            .repository
            .ok_or(BuildError::MissingCollaborator("repository"))?;
        let capabilities = self
            .capabilities
            .ok_or(BuildError::MissingCollaborator("capabilities"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(LockRegistry::new(self.config.lock_wait_timeout())));

        Ok(JobEngine::start(
            self.config,
            repository,
            capabilities,
            clock,
            ids,
            locks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryRepository, StaticCapabilityFactory};

    #[tokio::test]
    async fn build_fails_without_repository() {
        let result = EngineBuilder::new()
            .capabilities(Arc::new(StaticCapabilityFactory::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingCollaborator("repository"))));
    }

    #[tokio::test]
    async fn build_fails_without_capabilities() {
        let result = EngineBuilder::new()
            .repository(Arc::new(InMemoryRepository::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingCollaborator("capabilities"))));
    }

    #[tokio::test]
    async fn build_rejects_an_empty_pool() {
        let result = EngineBuilder::new()
            .config(EngineConfig {
                worker_pool_size: 0,
                ..EngineConfig::default()
            })
            .repository(Arc::new(InMemoryRepository::new()))
            .capabilities(Arc::new(StaticCapabilityFactory::new()))
            .build();
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn lock_timeout_comes_from_config() {
        let engine = EngineBuilder::new()
            .config(EngineConfig {
                worker_pool_size: 2,
                lock_wait_timeout_ms: 250,
                ..EngineConfig::default()
            })
            .repository(Arc::new(InMemoryRepository::new()))
            .capabilities(Arc::new(StaticCapabilityFactory::new()))
            .build()
            .unwrap();

        assert_eq!(
            engine.locks().wait_timeout(),
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(engine.worker_count(), 2);
        engine.shutdown().await;
    }
}
