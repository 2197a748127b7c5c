//! Call recording and failure injection shared by the fake external systems.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::errors::ConformError;

pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct CallScript {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl CallScript {
    /// Make every later call to `op` fail with an `ExternalSystem` error.
    pub fn fail_on(&self, op: &str) {
        locked(&self.failing).insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        locked(&self.failing).clear();
    }

    /// Every call so far, as `op(arg)`.
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    /// Calls that change remote state (everything but `find_*` / `list_*`).
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("find_") && !c.starts_with("list_"))
            .collect()
    }

    pub fn reset_calls(&self) {
        locked(&self.calls).clear();
    }

    pub(crate) fn enter(&self, system: &str, op: &str, arg: &str) -> Result<(), ConformError> {
        locked(&self.calls).push(format!("{op}({arg})"));
        if locked(&self.failing).contains(op) {
            return Err(ConformError::external(system, format!("{op} rejected")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_and_injects_failures() {
        let script = CallScript::default();
        script.enter("manager", "list_members", "d1").unwrap();
        script.fail_on("create_member");

        let err = script.enter("manager", "create_member", "m1").unwrap_err();
        assert!(matches!(err, ConformError::ExternalSystem { .. }));
        assert_eq!(script.calls(), vec!["list_members(d1)", "create_member(m1)"]);
        assert_eq!(script.mutating_calls(), vec!["create_member(m1)"]);

        script.clear_failures();
        assert!(script.enter("manager", "create_member", "m1").is_ok());
    }
}
