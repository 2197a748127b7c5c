//! Process-wide lock table.
//!
//! Design:
//! - One record per referenced object, created on first grant and dropped when
//!   the last holder releases.
//! - A record tracks READ and WRITE counts per owning job, so a job can take
//!   the same reference more than once (nested meta-tasks do).
//! - The table mutex is never held across an `.await`. Blocked acquirers park
//!   on a `Notify` that every release/downgrade wakes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::errors::ConformError;
use crate::domain::ids::JobId;

use super::reference::{LockMode, LockObjectReference};

/// Proof that `owner` holds `mode` on `reference`. Released exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockGrant {
    pub reference: LockObjectReference,
    pub mode: LockMode,
    pub owner: JobId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Holding {
    reads: u32,
    writes: u32,
}

impl Holding {
    fn is_empty(&self) -> bool {
        self.reads == 0 && self.writes == 0
    }
}

#[derive(Debug)]
struct LockRecord {
    reference: LockObjectReference,
    holders: HashMap<JobId, Holding>,
}

impl LockRecord {
    fn new(reference: LockObjectReference) -> Self {
        Self {
            reference,
            holders: HashMap::new(),
        }
    }

    fn mode(&self) -> Option<LockMode> {
        if self.holders.is_empty() {
            None
        } else if self.holders.values().any(|h| h.writes > 0) {
            Some(LockMode::Write)
        } else {
            Some(LockMode::Read)
        }
    }

    /// READ: no other job holds WRITE. WRITE: no other job holds anything.
    fn admits(&self, owner: JobId, mode: LockMode) -> bool {
        let mut others = self.holders.iter().filter(|(job, _)| **job != owner);
        match mode {
            LockMode::Read => others.all(|(_, h)| h.writes == 0),
            LockMode::Write => others.next().is_none(),
        }
    }

    fn hold(&mut self, owner: JobId, mode: LockMode) {
        let holding = self.holders.entry(owner).or_default();
        match mode {
            LockMode::Read => holding.reads += 1,
            LockMode::Write => holding.writes += 1,
        }
    }

    /// Returns false if `owner` holds no lock of that mode.
    fn drop_one(&mut self, owner: JobId, mode: LockMode) -> bool {
        let Some(holding) = self.holders.get_mut(&owner) else {
            return false;
        };
        let count = match mode {
            LockMode::Read => &mut holding.reads,
            LockMode::Write => &mut holding.writes,
        };
        if *count == 0 {
            return false;
        }
        *count -= 1;
        if holding.is_empty() {
            self.holders.remove(&owner);
        }
        true
    }
}

/// One holder in a [`LockInfo`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub job_id: JobId,
    pub reads: u32,
    pub writes: u32,
}

/// Serializable view of one held reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub reference: LockObjectReference,
    pub mode: LockMode,
    pub holders: Vec<LockHolder>,
}

/// Read/write lock table keyed by [`LockObjectReference`].
pub struct LockRegistry {
    records: Mutex<HashMap<LockObjectReference, LockRecord>>,
    released: Notify,
    /// Upper bound for blocking acquisition. `None` waits forever.
    wait_timeout: Option<Duration>,
}

impl LockRegistry {
    pub fn new(wait_timeout: Option<Duration>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            released: Notify::new(),
            wait_timeout,
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    fn records(&self) -> MutexGuard<'_, HashMap<LockObjectReference, LockRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn grant(&self, owner: JobId, reference: &LockObjectReference, mode: LockMode) -> Option<LockGrant> {
        let mut records = self.records();
        let record = records
            .entry(reference.clone())
            .or_insert_with(|| LockRecord::new(reference.clone()));
        if !record.admits(owner, mode) {
            return None;
        }
        record.hold(owner, mode);
        debug!(job_id = %owner, object = %reference, ?mode, "lock acquired");
        Some(LockGrant {
            reference: reference.clone(),
            mode,
            owner,
        })
    }

    /// Non-blocking acquisition. Contention is a `LockConflict`.
    pub fn try_lock(
        &self,
        owner: JobId,
        reference: &LockObjectReference,
        mode: LockMode,
    ) -> Result<LockGrant, ConformError> {
        self.grant(owner, reference, mode).ok_or_else(|| {
            debug!(job_id = %owner, object = %reference, ?mode, "lock conflict");
            conflict(reference)
        })
    }

    /// Blocking acquisition bounded by the registry's wait timeout.
    pub async fn lock(
        &self,
        owner: JobId,
        reference: &LockObjectReference,
        mode: LockMode,
    ) -> Result<LockGrant, ConformError> {
        self.lock_with_timeout(owner, reference, mode, self.wait_timeout)
            .await
    }

    /// Blocking acquisition. `timeout = None` waits until the lock is free.
    pub async fn lock_with_timeout(
        &self,
        owner: JobId,
        reference: &LockObjectReference,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<LockGrant, ConformError> {
        let wait = async {
            loop {
                // Register interest before checking so a release between the
                // check and the await is not lost.
                let notified = self.released.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(grant) = self.grant(owner, reference, mode) {
                    return grant;
                }
                debug!(job_id = %owner, object = %reference, ?mode, "waiting for lock");
                notified.await;
            }
        };

        match timeout {
            None => Ok(wait.await),
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(grant) => Ok(grant),
                Err(_) => {
                    warn!(job_id = %owner, object = %reference, ?mode, ?limit, "lock wait timed out");
                    Err(conflict(reference))
                }
            },
        }
    }

    /// Release one grant. Fails if the grant's owner does not hold it.
    pub fn release(&self, grant: &LockGrant) -> Result<(), ConformError> {
        {
            let mut records = self.records();
            let Some(record) = records.get_mut(&grant.reference) else {
                return Err(not_held(grant));
            };
            if !record.drop_one(grant.owner, grant.mode) {
                return Err(not_held(grant));
            }
            if record.holders.is_empty() {
                records.remove(&grant.reference);
            }
        }
        debug!(job_id = %grant.owner, object = %grant.reference, mode = ?grant.mode, "lock released");
        self.released.notify_waiters();
        Ok(())
    }

    /// READ -> WRITE without waiting. Fails if any other job holds the reference.
    pub fn upgrade(&self, grant: &LockGrant) -> Result<LockGrant, ConformError> {
        if grant.mode != LockMode::Read {
            return Err(ConformError::unexpected(format!(
                "cannot upgrade a {:?} lock on {}",
                grant.mode, grant.reference
            )));
        }
        let mut records = self.records();
        let Some(record) = records.get_mut(&grant.reference) else {
            return Err(not_held(grant));
        };
        if !record.admits(grant.owner, LockMode::Write) {
            return Err(conflict(&grant.reference));
        }
        if !record.drop_one(grant.owner, LockMode::Read) {
            return Err(not_held(grant));
        }
        record.hold(grant.owner, LockMode::Write);
        debug!(job_id = %grant.owner, object = %grant.reference, "lock upgraded");
        Ok(LockGrant {
            mode: LockMode::Write,
            ..grant.clone()
        })
    }

    /// WRITE -> READ. Always succeeds for the holder and wakes waiting readers.
    pub fn downgrade(&self, grant: &LockGrant) -> Result<LockGrant, ConformError> {
        if grant.mode != LockMode::Write {
            return Err(ConformError::unexpected(format!(
                "cannot downgrade a {:?} lock on {}",
                grant.mode, grant.reference
            )));
        }
        {
            let mut records = self.records();
            let Some(record) = records.get_mut(&grant.reference) else {
                return Err(not_held(grant));
            };
            if !record.drop_one(grant.owner, LockMode::Write) {
                return Err(not_held(grant));
            }
            record.hold(grant.owner, LockMode::Read);
        }
        debug!(job_id = %grant.owner, object = %grant.reference, "lock downgraded");
        self.released.notify_waiters();
        Ok(LockGrant {
            mode: LockMode::Read,
            ..grant.clone()
        })
    }

    /// Every grant `owner` currently holds, one entry per acquisition.
    pub fn held_by(&self, owner: JobId) -> Vec<LockGrant> {
        let records = self.records();
        let mut grants = Vec::new();
        for record in records.values() {
            if let Some(holding) = record.holders.get(&owner) {
                for (mode, count) in [(LockMode::Read, holding.reads), (LockMode::Write, holding.writes)] {
                    for _ in 0..count {
                        grants.push(LockGrant {
                            reference: record.reference.clone(),
                            mode,
                            owner,
                        });
                    }
                }
            }
        }
        grants
    }

    /// Drop everything `owner` holds. Returns what was released.
    pub fn release_all(&self, owner: JobId) -> Vec<LockGrant> {
        let grants = self.held_by(owner);
        for grant in &grants {
            // held_by just listed it; a concurrent release by the same job is the only way this fails
            if let Err(e) = self.release(grant) {
                warn!(job_id = %owner, error = %e, "release_all skipped a grant");
            }
        }
        grants
    }

    pub fn snapshot(&self) -> Vec<LockInfo> {
        let records = self.records();
        let mut infos: Vec<LockInfo> = records
            .values()
            .filter_map(|record| {
                let mode = record.mode()?;
                let mut holders: Vec<LockHolder> = record
                    .holders
                    .iter()
                    .map(|(job_id, h)| LockHolder {
                        job_id: *job_id,
                        reads: h.reads,
                        writes: h.writes,
                    })
                    .collect();
                holders.sort_by_key(|h| h.job_id);
                Some(LockInfo {
                    reference: record.reference.clone(),
                    mode,
                    holders,
                })
            })
            .collect();
        infos.sort_by_key(|info| (info.reference.object_type, info.reference.id));
        infos
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn conflict(reference: &LockObjectReference) -> ConformError {
    ConformError::LockConflict {
        object_type: reference.object_type,
        name: reference.name.clone(),
    }
}

fn not_held(grant: &LockGrant) -> ConformError {
    ConformError::unexpected(format!(
        "{} does not hold a {:?} lock on {}",
        grant.owner, grant.mode, grant.reference
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ObjectType;
    use rstest::rstest;
    use std::sync::Arc;

    fn vs_ref() -> LockObjectReference {
        LockObjectReference::new(ObjectType::VirtualSystem, 1, "vs-1")
    }

    #[rstest]
    #[case::read_read(LockMode::Read, LockMode::Read, true)]
    #[case::read_write(LockMode::Read, LockMode::Write, false)]
    #[case::write_read(LockMode::Write, LockMode::Read, false)]
    #[case::write_write(LockMode::Write, LockMode::Write, false)]
    fn exclusion_between_jobs(
        #[case] held: LockMode,
        #[case] requested: LockMode,
        #[case] granted: bool,
    ) {
        let registry = LockRegistry::default();
        let (job1, job2) = (JobId::generate(), JobId::generate());

        registry.try_lock(job1, &vs_ref(), held).unwrap();
        let result = registry.try_lock(job2, &vs_ref(), requested);

        assert_eq!(result.is_ok(), granted);
        if !granted {
            assert!(matches!(result, Err(ConformError::LockConflict { .. })));
        }
    }

    #[test]
    fn same_job_can_reenter() {
        let registry = LockRegistry::default();
        let job = JobId::generate();

        let w = registry.try_lock(job, &vs_ref(), LockMode::Write).unwrap();
        let r = registry.try_lock(job, &vs_ref(), LockMode::Read).unwrap();
        assert_eq!(registry.held_by(job).len(), 2);

        registry.release(&r).unwrap();
        registry.release(&w).unwrap();
        assert!(registry.held_by(job).is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn sole_reader_upgrades_in_place() {
        let registry = LockRegistry::default();
        let job = JobId::generate();

        let read = registry.try_lock(job, &vs_ref(), LockMode::Read).unwrap();
        let write = registry.upgrade(&read).unwrap();
        assert_eq!(write.mode, LockMode::Write);

        let other = JobId::generate();
        assert!(registry.try_lock(other, &vs_ref(), LockMode::Read).is_err());

        let read = registry.downgrade(&write).unwrap();
        assert!(registry.try_lock(other, &vs_ref(), LockMode::Read).is_ok());
        registry.release(&read).unwrap();
    }

    #[test]
    fn upgrade_fails_when_another_job_reads() {
        let registry = LockRegistry::default();
        let (job1, job2) = (JobId::generate(), JobId::generate());

        let read = registry.try_lock(job1, &vs_ref(), LockMode::Read).unwrap();
        registry.try_lock(job2, &vs_ref(), LockMode::Read).unwrap();

        assert!(matches!(
            registry.upgrade(&read),
            Err(ConformError::LockConflict { .. })
        ));
        // the read grant is untouched
        assert_eq!(registry.held_by(job1), vec![read]);
    }

    #[test]
    fn releasing_a_foreign_grant_is_rejected() {
        let registry = LockRegistry::default();
        let job1 = JobId::generate();
        let grant = registry.try_lock(job1, &vs_ref(), LockMode::Read).unwrap();

        let forged = LockGrant {
            owner: JobId::generate(),
            ..grant.clone()
        };
        assert!(matches!(
            registry.release(&forged),
            Err(ConformError::Unexpected(_))
        ));
        registry.release(&grant).unwrap();
        assert!(registry.release(&grant).is_err());
    }

    #[tokio::test]
    async fn blocking_lock_waits_for_release() {
        let registry = Arc::new(LockRegistry::default());
        let (job1, job2) = (JobId::generate(), JobId::generate());
        let grant = registry.try_lock(job1, &vs_ref(), LockMode::Write).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.lock(job2, &vs_ref(), LockMode::Read).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.release(&grant).unwrap();
        let granted = waiter.await.unwrap().unwrap();
        assert_eq!(granted.owner, job2);
    }

    #[tokio::test]
    async fn blocking_lock_times_out_as_conflict() {
        let registry = LockRegistry::new(Some(Duration::from_millis(30)));
        let (job1, job2) = (JobId::generate(), JobId::generate());
        registry.try_lock(job1, &vs_ref(), LockMode::Read).unwrap();

        let result = registry.lock(job2, &vs_ref(), LockMode::Write).await;
        assert!(matches!(result, Err(ConformError::LockConflict { .. })));
    }

    #[test]
    fn snapshot_reports_mode_and_holders() {
        let registry = LockRegistry::default();
        let (job1, job2) = (JobId::generate(), JobId::generate());
        registry.try_lock(job1, &vs_ref(), LockMode::Read).unwrap();
        registry.try_lock(job2, &vs_ref(), LockMode::Read).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].mode, LockMode::Read);
        assert_eq!(snapshot[0].holders.len(), 2);

        assert_eq!(registry.release_all(job1).len(), 1);
        assert_eq!(registry.release_all(job2).len(), 1);
        assert!(registry.snapshot().is_empty());
    }
}
