//! Status views for operators.

use serde::{Deserialize, Serialize};

use crate::domain::state::JobStatus;
use crate::lock::LockInfo;

/// Number of known jobs per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl EngineCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed
    }
}

/// Point-in-time view of the engine: job counts plus every held lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub jobs: EngineCounts,
    pub locks: Vec<LockInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_status() {
        let mut counts = EngineCounts::default();
        for status in [JobStatus::Queued, JobStatus::Failed, JobStatus::Failed, JobStatus::Succeeded] {
            counts.record(status);
        }
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 4);

        let v = serde_json::to_value(EngineStatus { jobs: counts, locks: vec![] }).unwrap();
        assert_eq!(v["jobs"]["succeeded"], 1);
    }
}
