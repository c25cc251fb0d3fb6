//! Logical lock transitions
//!
//! A write lock is catalog state, not a mutex: the target replica goes
//! INTERMEDIATE and every sibling goes WRITE_LOCK in one committed
//! payload. The first writer to commit wins; later write-opens observe
//! the lock and fail fast.

use serde_json::to_string;

use super::state_table::ReplicaStateTable;
use crate::catalog::executor::{finalize_data_object, FinalizePayload};
use crate::catalog::CatalogPool;
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::Logger;
use crate::replica::{LogicalObject, ReplicaStatus};

/// How a held write lock resolves at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Bytes were written: target GOOD, write-locked siblings STALE.
    WriteSucceeded,
    /// Replication/move destination: target mirrors the source replica's
    /// pre-operation status; the source is restored; other siblings go
    /// STALE unless preserved.
    ReplicationSucceeded {
        source_replica_number: i32,
        preserve_siblings: bool,
    },
    /// Nothing was written: every replica returns to its pre-open state.
    NoBytesWritten,
    /// The operation failed: target STALE (with the vault size recorded
    /// when known), siblings restored.
    OperationFailed { vault_size: Option<i64> },
}

/// Commit the staged state of one object through the finalize executor.
pub fn commit_object_state(
    state: &ReplicaStateTable,
    pool: &CatalogPool,
    logical_path: &str,
) -> CoreResult<()> {
    let payload_json = state.finalize_payload(logical_path)?;
    let serialized = to_string(&payload_json).map_err(|e| {
        CoreError::new(
            CoreErrorCode::InternalError,
            format!("cannot serialize finalize payload: {}", e),
        )
    })?;
    Logger::trace("finalize_commit", &[("path", logical_path)]);
    let payload = FinalizePayload::parse(&serialized)?;
    finalize_data_object(pool, &payload)
}

/// Acquire the logical write lock for `target_replica_number`.
///
/// Fails with a locked error before creating any state-table entry when
/// a sibling is busy. On success the lock is committed to the catalog
/// and visible to every other agent.
pub fn acquire_write_lock(
    state: &mut ReplicaStateTable,
    pool: &CatalogPool,
    object: &LogicalObject,
    target_replica_number: i32,
) -> CoreResult<()> {
    let logical_path = object.logical_path().to_string();

    if object.index_of_replica_number(target_replica_number).is_none() {
        return Err(CoreError::new(
            CoreErrorCode::ReplicaDoesNotExist,
            format!(
                "no replica [{}] of [{}]",
                target_replica_number, logical_path
            ),
        ));
    }

    for sibling in object
        .replicas()
        .iter()
        .filter(|r| r.replica_number != target_replica_number)
    {
        if sibling.replica_status.is_writer() || sibling.replica_status.is_read_locked() {
            return Err(CoreError::new(
                CoreErrorCode::HierarchyLocked,
                format!(
                    "replica [{}] of [{}] is busy (status {})",
                    sibling.replica_number, logical_path, sibling.replica_status
                ),
            ));
        }
    }

    state.insert(object);

    state.update(&logical_path, target_replica_number, |r| {
        r.replica_status = ReplicaStatus::Intermediate;
    })?;
    for sibling in object
        .replicas()
        .iter()
        .filter(|r| r.replica_number != target_replica_number)
    {
        state.update(&logical_path, sibling.replica_number, |r| {
            r.replica_status = ReplicaStatus::WriteLock;
        })?;
    }

    if let Err(e) = commit_object_state(state, pool, &logical_path) {
        // The lock never became visible; drop the staging entry.
        let _ = state.erase(&logical_path);
        return Err(e);
    }

    Logger::info(
        "write_lock_acquired",
        &[
            ("path", logical_path.as_str()),
            ("replica", &target_replica_number.to_string()),
        ],
    );
    Ok(())
}

/// Stage the unlock transitions for a held lock. Only `after` images
/// change; the caller commits.
pub fn stage_unlock(
    state: &mut ReplicaStateTable,
    logical_path: &str,
    target_replica_number: i32,
    outcome: UnlockOutcome,
) -> CoreResult<()> {
    let entry = state.entry(logical_path).ok_or_else(|| {
        CoreError::new(
            CoreErrorCode::InvalidInputParam,
            format!("no state table entry for [{}]", logical_path),
        )
    })?;
    let replica_numbers: Vec<i32> = entry
        .replicas
        .iter()
        .map(|r| r.before.replica_number)
        .collect();

    match outcome {
        UnlockOutcome::WriteSucceeded => {
            state.update(logical_path, target_replica_number, |r| {
                r.replica_status = ReplicaStatus::Good;
            })?;
            for rn in replica_numbers.iter().filter(|rn| **rn != target_replica_number) {
                state.update(logical_path, *rn, |r| {
                    if r.replica_status == ReplicaStatus::WriteLock {
                        r.replica_status = ReplicaStatus::Stale;
                    }
                })?;
            }
        }
        UnlockOutcome::ReplicationSucceeded {
            source_replica_number,
            preserve_siblings,
        } => {
            let source_status = state
                .before(logical_path, source_replica_number)
                .map(|r| r.replica_status)
                .ok_or_else(|| {
                    CoreError::new(
                        CoreErrorCode::ReplicaDoesNotExist,
                        format!(
                            "no staged source replica [{}] of [{}]",
                            source_replica_number, logical_path
                        ),
                    )
                })?;
            state.update(logical_path, target_replica_number, |r| {
                r.replica_status = source_status;
            })?;
            for rn in replica_numbers
                .iter()
                .filter(|rn| **rn != target_replica_number)
            {
                let restored = state
                    .before(logical_path, *rn)
                    .map(|r| r.replica_status)
                    .unwrap_or(ReplicaStatus::Stale);
                state.update(logical_path, *rn, |r| {
                    if *rn == source_replica_number || preserve_siblings {
                        r.replica_status = restored;
                    } else {
                        r.replica_status = ReplicaStatus::Stale;
                    }
                })?;
            }
        }
        UnlockOutcome::NoBytesWritten => {
            for rn in replica_numbers {
                let restored = state
                    .before(logical_path, rn)
                    .map(|r| r.replica_status)
                    .unwrap_or(ReplicaStatus::Stale);
                state.update(logical_path, rn, |r| {
                    r.replica_status = restored;
                })?;
            }
        }
        UnlockOutcome::OperationFailed { vault_size } => {
            state.update(logical_path, target_replica_number, |r| {
                r.replica_status = ReplicaStatus::Stale;
                if let Some(size) = vault_size {
                    r.size = size;
                }
            })?;
            for rn in replica_numbers
                .iter()
                .filter(|rn| **rn != target_replica_number)
            {
                let restored = state
                    .before(logical_path, *rn)
                    .map(|r| r.replica_status)
                    .unwrap_or(ReplicaStatus::Stale);
                state.update(logical_path, *rn, |r| {
                    r.replica_status = restored;
                })?;
            }
        }
    }
    Ok(())
}

/// Stage an unlock, commit it, and drop the staging entry. Terminal
/// cleanup path for failed opens and failed closes.
pub fn release_and_commit(
    state: &mut ReplicaStateTable,
    pool: &CatalogPool,
    logical_path: &str,
    target_replica_number: i32,
    outcome: UnlockOutcome,
) -> CoreResult<()> {
    stage_unlock(state, logical_path, target_replica_number, outcome)?;
    let result = commit_object_state(state, pool, logical_path);
    let _ = state.erase(logical_path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBackend, MemoryCatalog};
    use crate::replica::Replica;
    use std::sync::Arc;

    fn replica(rn: i32, resc_id: i64, status: ReplicaStatus) -> Replica {
        Replica {
            data_id: 9,
            coll_id: 1,
            logical_path: "/z/obj".to_string(),
            replica_number: rn,
            resc_id,
            resc_hier: format!("resc{}", resc_id),
            resc_name: format!("resc{}", resc_id),
            replica_status: status,
            ..Replica::default()
        }
    }

    fn seeded(statuses: &[ReplicaStatus]) -> (Arc<MemoryCatalog>, CatalogPool, LogicalObject) {
        let catalog = Arc::new(MemoryCatalog::new());
        let mut replicas = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            let r = replica(i as i32, 100 * (i as i64 + 1), *status);
            catalog.register_replica(&r).unwrap();
            replicas.push(r);
        }
        let pool = CatalogPool::new(catalog.clone(), 2);
        let object = LogicalObject::from_replicas(replicas).unwrap();
        (catalog, pool, object)
    }

    #[test]
    fn test_acquire_marks_target_and_siblings() {
        let (catalog, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::Good]);
        let mut state = ReplicaStateTable::new();
        acquire_write_lock(&mut state, &pool, &object, 0).unwrap();

        assert_eq!(
            catalog.row(9, 100).unwrap().replica_status,
            ReplicaStatus::Intermediate
        );
        assert_eq!(
            catalog.row(9, 200).unwrap().replica_status,
            ReplicaStatus::WriteLock
        );
    }

    #[test]
    fn test_acquire_fails_fast_on_busy_sibling() {
        let (_, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::Intermediate]);
        let mut state = ReplicaStateTable::new();
        let err = acquire_write_lock(&mut state, &pool, &object, 0).unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::HierarchyLocked);
        // No state-table entry is created for a refused lock.
        assert!(!state.contains("/z/obj"));
    }

    #[test]
    fn test_acquire_fails_on_read_locked_sibling() {
        let (_, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::ReadLockOnGood]);
        let mut state = ReplicaStateTable::new();
        let err = acquire_write_lock(&mut state, &pool, &object, 0).unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::HierarchyLocked);
    }

    #[test]
    fn test_write_success_stales_locked_siblings() {
        let (catalog, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::Good]);
        let mut state = ReplicaStateTable::new();
        acquire_write_lock(&mut state, &pool, &object, 0).unwrap();

        release_and_commit(&mut state, &pool, "/z/obj", 0, UnlockOutcome::WriteSucceeded)
            .unwrap();
        assert_eq!(catalog.row(9, 100).unwrap().replica_status, ReplicaStatus::Good);
        assert_eq!(catalog.row(9, 200).unwrap().replica_status, ReplicaStatus::Stale);
    }

    #[test]
    fn test_failed_close_restores_siblings_and_stales_target() {
        let (catalog, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::Stale]);
        let mut state = ReplicaStateTable::new();
        acquire_write_lock(&mut state, &pool, &object, 0).unwrap();

        release_and_commit(
            &mut state,
            &pool,
            "/z/obj",
            0,
            UnlockOutcome::OperationFailed {
                vault_size: Some(13),
            },
        )
        .unwrap();
        let target = catalog.row(9, 100).unwrap();
        assert_eq!(target.replica_status, ReplicaStatus::Stale);
        assert_eq!(target.size, 13);
        // Sibling reverted to its pre-open status, not write-locked.
        assert_eq!(catalog.row(9, 200).unwrap().replica_status, ReplicaStatus::Stale);
    }

    #[test]
    fn test_replication_success_preserves_source() {
        let (catalog, pool, object) =
            seeded(&[ReplicaStatus::Good, ReplicaStatus::Good, ReplicaStatus::Good]);
        let mut state = ReplicaStateTable::new();
        // Replica 2 is the destination, replica 0 the source.
        acquire_write_lock(&mut state, &pool, &object, 2).unwrap();

        release_and_commit(
            &mut state,
            &pool,
            "/z/obj",
            2,
            UnlockOutcome::ReplicationSucceeded {
                source_replica_number: 0,
                preserve_siblings: false,
            },
        )
        .unwrap();
        assert_eq!(catalog.row(9, 300).unwrap().replica_status, ReplicaStatus::Good);
        assert_eq!(catalog.row(9, 100).unwrap().replica_status, ReplicaStatus::Good);
        // The uninvolved sibling goes stale.
        assert_eq!(catalog.row(9, 200).unwrap().replica_status, ReplicaStatus::Stale);
    }

    #[test]
    fn test_no_bytes_written_restores_everything() {
        let (catalog, pool, object) = seeded(&[ReplicaStatus::Good, ReplicaStatus::Stale]);
        let mut state = ReplicaStateTable::new();
        acquire_write_lock(&mut state, &pool, &object, 0).unwrap();

        release_and_commit(&mut state, &pool, "/z/obj", 0, UnlockOutcome::NoBytesWritten)
            .unwrap();
        assert_eq!(catalog.row(9, 100).unwrap().replica_status, ReplicaStatus::Good);
        assert_eq!(catalog.row(9, 200).unwrap().replica_status, ReplicaStatus::Stale);
    }
}
