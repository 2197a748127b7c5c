//! InMemoryRepository - 開発・テスト用の Repository
//!
//! # 実装詳細
//! - 共有ストアは `Arc<tokio::sync::Mutex<BTreeMap<EntityKey, Entity>>>`
//! - トランザクションは書き込みをオーバーレイに溜め、commit 時にまとめて反映
//! - rollback / drop はオーバーレイを捨てるだけ
//!
//! 読み取りは「オーバーレイ → 共有ストア」の順に解決するので、
//! 同じトランザクション内の書き込みは即座に見えます。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::ConformError;
use crate::domain::model::{DomainEntity, Entity, EntityKey, ObjectType};
use crate::ports::{Repository, Transaction};

type Store = BTreeMap<EntityKey, Entity>;

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<Mutex<Store>>,
    next_id: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record outside any transaction. An id of 0 is assigned.
    pub async fn insert<E: DomainEntity>(&self, mut entity: E) -> E {
        if entity.id() == 0 {
            entity.set_id(self.allocate_id());
        } else {
            self.next_id.fetch_max(entity.id(), Ordering::SeqCst);
        }
        self.store
            .lock()
            .await
            .insert(entity.key(), entity.clone().into_entity());
        entity
    }

    pub async fn get<E: DomainEntity>(&self, id: u64) -> Option<E> {
        let store = self.store.lock().await;
        store
            .get(&EntityKey::new(E::OBJECT_TYPE, id))
            .cloned()
            .and_then(E::from_entity)
    }

    pub async fn all<E: DomainEntity>(&self) -> Vec<E> {
        let store = self.store.lock().await;
        store
            .values()
            .filter(|e| e.object_type() == E::OBJECT_TYPE)
            .cloned()
            .filter_map(E::from_entity)
            .collect()
    }

    /// Number of committed transactions so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn Transaction>, ConformError> {
        Ok(Box::new(InMemoryTransaction {
            repo: self.clone(),
            overlay: BTreeMap::new(),
        }))
    }
}

/// `None` in the overlay is a pending delete.
struct InMemoryTransaction {
    repo: InMemoryRepository,
    overlay: BTreeMap<EntityKey, Option<Entity>>,
}

impl InMemoryTransaction {
    async fn resolve(&self, key: EntityKey) -> Option<Entity> {
        match self.overlay.get(&key) {
            Some(pending) => pending.clone(),
            None => self.repo.store.lock().await.get(&key).cloned(),
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn find(&mut self, key: EntityKey) -> Result<Option<Entity>, ConformError> {
        Ok(self.resolve(key).await)
    }

    async fn list(&mut self, object_type: ObjectType) -> Result<Vec<Entity>, ConformError> {
        let mut merged: BTreeMap<EntityKey, Entity> = {
            let store = self.repo.store.lock().await;
            store
                .iter()
                .filter(|(key, _)| key.object_type == object_type)
                .map(|(key, e)| (*key, e.clone()))
                .collect()
        };
        for (key, pending) in &self.overlay {
            if key.object_type != object_type {
                continue;
            }
            match pending {
                Some(entity) => merged.insert(*key, entity.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_values().collect())
    }

    async fn create(&mut self, mut entity: Entity) -> Result<Entity, ConformError> {
        if entity.id() == 0 {
            entity.set_id(self.repo.allocate_id());
        } else if self.resolve(entity.key()).await.is_some() {
            return Err(ConformError::persistence(format!(
                "{} already exists",
                entity.key()
            )));
        }
        self.overlay.insert(entity.key(), Some(entity.clone()));
        Ok(entity)
    }

    async fn update(&mut self, entity: Entity) -> Result<(), ConformError> {
        if self.resolve(entity.key()).await.is_none() {
            return Err(ConformError::persistence(format!(
                "cannot update {}: no such record",
                entity.key()
            )));
        }
        self.overlay.insert(entity.key(), Some(entity));
        Ok(())
    }

    async fn delete(&mut self, key: EntityKey) -> Result<(), ConformError> {
        if self.resolve(key).await.is_none() {
            return Err(ConformError::persistence(format!(
                "cannot delete {key}: no such record"
            )));
        }
        self.overlay.insert(key, None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ConformError> {
        let InMemoryTransaction { repo, overlay } = *self;
        {
            let mut store = repo.store.lock().await;
            for (key, pending) in overlay {
                match pending {
                    Some(entity) => store.insert(key, entity),
                    None => store.remove(&key),
                };
            }
        }
        repo.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ConformError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Policy;
    use crate::ports::repository;

    fn policy(name: &str) -> Policy {
        Policy {
            id: 0,
            name: name.to_string(),
            appliance_id: 1,
            marked_for_deletion: false,
        }
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let created = repository::create(tx.as_mut(), policy("p1")).await.unwrap();
        assert_ne!(created.id, 0);

        // not visible outside the transaction yet
        assert!(repo.get::<Policy>(created.id).await.is_none());
        // visible inside it
        let seen: Policy = repository::load(tx.as_mut(), created.id).await.unwrap();
        assert_eq!(seen.name, "p1");

        tx.commit().await.unwrap();
        assert_eq!(repo.get::<Policy>(created.id).await.unwrap().name, "p1");
        assert_eq!(repo.commit_count(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let repo = InMemoryRepository::new();
        let seeded = repo.insert(policy("keep")).await;

        let mut tx = repo.begin().await.unwrap();
        repository::delete::<Policy>(tx.as_mut(), seeded.id).await.unwrap();
        let listed: Vec<Policy> = repository::list(tx.as_mut(), |_| true).await.unwrap();
        assert!(listed.is_empty());
        tx.rollback().await.unwrap();

        assert!(repo.get::<Policy>(seeded.id).await.is_some());
        assert_eq!(repo.commit_count(), 0);
    }

    #[tokio::test]
    async fn missing_records_are_validation_errors_on_load() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();

        let result = repository::load::<Policy>(tx.as_mut(), 42).await;
        assert!(matches!(result, Err(ConformError::Validation(_))));

        let result = repository::update(tx.as_mut(), Policy { id: 42, ..policy("x") }).await;
        assert!(matches!(result, Err(ConformError::Persistence(_))));
    }

    #[tokio::test]
    async fn seeded_ids_do_not_collide_with_assigned_ones() {
        let repo = InMemoryRepository::new();
        repo.insert(Policy { id: 10, ..policy("a") }).await;
        let b = repo.insert(policy("b")).await;
        assert_eq!(b.id, 11);
    }
}
