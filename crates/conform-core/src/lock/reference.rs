//! Lock identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::domain::model::{DomainEntity, ObjectType};

/// Identity handle used purely for mutual exclusion.
///
/// Equality and hashing use `(object_type, id)` only. `name` is carried for
/// diagnostics and may differ between two references to the same object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockObjectReference {
    pub object_type: ObjectType,
    pub id: u64,
    pub name: String,
}

impl LockObjectReference {
    pub fn new(object_type: ObjectType, id: u64, name: impl Into<String>) -> Self {
        Self {
            object_type,
            id,
            name: name.into(),
        }
    }

    pub fn of<E: DomainEntity>(entity: &E) -> Self {
        Self::new(E::OBJECT_TYPE, entity.id(), entity.name())
    }
}

impl PartialEq for LockObjectReference {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type && self.id == other.id
    }
}

impl Eq for LockObjectReference {}

impl Hash for LockObjectReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for LockObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (id={})", self.object_type, self.name, self.id)
    }
}

/// Lock mode. READ is shared, WRITE is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    Read,
    Write,
}
