//! Object-level read/write locking.
//!
//! Locks are the only coordination between concurrently running jobs. A job
//! takes its top-level locks synchronously at entry and gives them back
//! through an unlock task at the end of its graph.

pub mod acquire;
pub mod reference;
pub mod registry;

pub use self::acquire::{
    LockRequest, child_and_parents, lock_all, lock_child_and_parents, try_lock_all,
    try_lock_child_and_parents,
};
pub use self::reference::{LockMode, LockObjectReference};
pub use self::registry::{LockGrant, LockHolder, LockInfo, LockRegistry};
