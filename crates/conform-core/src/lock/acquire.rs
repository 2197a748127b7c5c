//! Hierarchical acquisition helpers.
//!
//! Parents are always locked before the child so two jobs touching
//! overlapping trees cannot wait on each other in a cycle. On failure every
//! grant taken so far is released before the error is returned.

use tracing::debug;

use crate::domain::errors::ConformError;
use crate::domain::ids::JobId;

use super::reference::{LockMode, LockObjectReference};
use super::registry::{LockGrant, LockRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub reference: LockObjectReference,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn read(reference: LockObjectReference) -> Self {
        Self {
            reference,
            mode: LockMode::Read,
        }
    }

    pub fn write(reference: LockObjectReference) -> Self {
        Self {
            reference,
            mode: LockMode::Write,
        }
    }
}

/// Parents as READ in the given order, then the child as WRITE.
pub fn child_and_parents(
    child: LockObjectReference,
    parents: impl IntoIterator<Item = LockObjectReference>,
) -> Vec<LockRequest> {
    let mut requests: Vec<LockRequest> = parents.into_iter().map(LockRequest::read).collect();
    requests.push(LockRequest::write(child));
    requests
}

/// Acquire `requests` in order, waiting on each. All-or-nothing.
pub async fn lock_all(
    registry: &LockRegistry,
    owner: JobId,
    requests: &[LockRequest],
) -> Result<Vec<LockGrant>, ConformError> {
    let mut grants = Vec::with_capacity(requests.len());
    for request in requests {
        match registry.lock(owner, &request.reference, request.mode).await {
            Ok(grant) => grants.push(grant),
            Err(e) => {
                rollback(registry, &grants);
                return Err(e);
            }
        }
    }
    Ok(grants)
}

/// Acquire `requests` in order without waiting. All-or-nothing.
pub fn try_lock_all(
    registry: &LockRegistry,
    owner: JobId,
    requests: &[LockRequest],
) -> Result<Vec<LockGrant>, ConformError> {
    let mut grants = Vec::with_capacity(requests.len());
    for request in requests {
        match registry.try_lock(owner, &request.reference, request.mode) {
            Ok(grant) => grants.push(grant),
            Err(e) => {
                rollback(registry, &grants);
                return Err(e);
            }
        }
    }
    Ok(grants)
}

pub async fn lock_child_and_parents(
    registry: &LockRegistry,
    owner: JobId,
    child: LockObjectReference,
    parents: impl IntoIterator<Item = LockObjectReference>,
) -> Result<Vec<LockGrant>, ConformError> {
    lock_all(registry, owner, &child_and_parents(child, parents)).await
}

pub fn try_lock_child_and_parents(
    registry: &LockRegistry,
    owner: JobId,
    child: LockObjectReference,
    parents: impl IntoIterator<Item = LockObjectReference>,
) -> Result<Vec<LockGrant>, ConformError> {
    try_lock_all(registry, owner, &child_and_parents(child, parents))
}

fn rollback(registry: &LockRegistry, grants: &[LockGrant]) {
    for grant in grants.iter().rev() {
        if let Err(e) = registry.release(grant) {
            debug!(error = %e, "rollback release failed");
        }
    }
}
