//! Repository port - desired-state の永続化
//!
//! executor はタスクごとに `begin()` でトランザクションを開き、
//! 成功なら commit、失敗なら rollback します。
//! タスク側はトランザクション越しにのみ読み書きします。

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::domain::model::{DomainEntity, Entity, EntityKey, ObjectType};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, ConformError>;
}

/// One transaction scope. Dropped without `commit` means rolled back.
#[async_trait]
pub trait Transaction: Send {
    async fn find(&mut self, key: EntityKey) -> Result<Option<Entity>, ConformError>;

    async fn list(&mut self, object_type: ObjectType) -> Result<Vec<Entity>, ConformError>;

    /// Stores `entity`. An id of 0 asks the repository to assign one.
    async fn create(&mut self, entity: Entity) -> Result<Entity, ConformError>;

    async fn update(&mut self, entity: Entity) -> Result<(), ConformError>;

    async fn delete(&mut self, key: EntityKey) -> Result<(), ConformError>;

    async fn commit(self: Box<Self>) -> Result<(), ConformError>;

    async fn rollback(self: Box<Self>) -> Result<(), ConformError>;
}

// ========================================
// 型付きヘルパー
// ========================================

/// Load `E` by id. A missing record is a `Validation` error.
pub async fn load<E: DomainEntity>(tx: &mut dyn Transaction, id: u64) -> Result<E, ConformError> {
    find(tx, id)
        .await?
        .ok_or_else(|| ConformError::not_found(E::OBJECT_TYPE, id))
}

pub async fn find<E: DomainEntity>(
    tx: &mut dyn Transaction,
    id: u64,
) -> Result<Option<E>, ConformError> {
    match tx.find(EntityKey::new(E::OBJECT_TYPE, id)).await? {
        None => Ok(None),
        Some(entity) => E::from_entity(entity).map(Some).ok_or_else(|| {
            ConformError::persistence(format!("record {id} is not a {}", E::OBJECT_TYPE))
        }),
    }
}

/// Every `E` matching `filter`, ordered by id.
pub async fn list<E, F>(tx: &mut dyn Transaction, filter: F) -> Result<Vec<E>, ConformError>
where
    E: DomainEntity,
    F: Fn(&E) -> bool + Send,
{
    let mut items: Vec<E> = tx
        .list(E::OBJECT_TYPE)
        .await?
        .into_iter()
        .filter_map(E::from_entity)
        .filter(|e| filter(e))
        .collect();
    items.sort_by_key(|e| e.id());
    Ok(items)
}

pub async fn create<E: DomainEntity>(tx: &mut dyn Transaction, entity: E) -> Result<E, ConformError> {
    let stored = tx.create(entity.into_entity()).await?;
    E::from_entity(stored)
        .ok_or_else(|| ConformError::persistence(format!("created record is not a {}", E::OBJECT_TYPE)))
}

pub async fn update<E: DomainEntity>(tx: &mut dyn Transaction, entity: E) -> Result<(), ConformError> {
    tx.update(entity.into_entity()).await
}

pub async fn delete<E: DomainEntity>(tx: &mut dyn Transaction, id: u64) -> Result<(), ConformError> {
    tx.delete(EntityKey::new(E::OBJECT_TYPE, id)).await
}
