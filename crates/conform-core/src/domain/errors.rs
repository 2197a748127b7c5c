//! Errors - エラー型と分類
//!
//! 1 つの enum で全レイヤーのエラーを表現します。
//! タスクのエラーは executor の境界で捕捉され、TaskReport に文字列として
//! 記録されるため、`Clone` 可能であることが要件です。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::ObjectType;

/// ErrorKind は運用上の分類（レポート用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    LockConflict,
    ExternalSystem,
    Persistence,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConformError {
    /// Rejected before any graph is built or run.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("Fail to gain lock for {object_type} '{name}'.")]
    LockConflict {
        object_type: ObjectType,
        name: String,
    },

    /// Remote call failure: connectivity, auth, not-found on the remote side.
    #[error("{system} call failed: {message}")]
    ExternalSystem { system: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ConformError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn external(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalSystem {
            system: system.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn not_found(object_type: ObjectType, id: u64) -> Self {
        Self::Validation(format!("{object_type} with id {id} does not exist"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConformError::Validation(_) => ErrorKind::Validation,
            ConformError::LockConflict { .. } => ErrorKind::LockConflict,
            ConformError::ExternalSystem { .. } => ErrorKind::ExternalSystem,
            ConformError::Persistence(_) => ErrorKind::Persistence,
            ConformError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}
