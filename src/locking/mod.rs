//! Logical locking and the replica state table
//!
//! The state table stages before/after images of every replica of an
//! open object; the locking layer computes the status transitions and
//! commits them through the catalog so other agents observe the lock.
//! Advisory file locks back the explicit lock-at-open request.

mod advisory;
mod lock;
mod state_table;

pub use advisory::{AdvisoryLockTable, AdvisoryLockType};
pub use lock::{
    acquire_write_lock, commit_object_state, release_and_commit, stage_unlock, UnlockOutcome,
};
pub use state_table::{ReplicaStateEntry, ReplicaStateTable, ReplicaStates};
