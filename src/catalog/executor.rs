//! Catalog finalize executor
//!
//! Sole persistence path for replica-state changes. Parses a finalize
//! payload, opens one transaction, updates every replica row keyed by
//! `(resc_id_before, data_id)`, and commits or rolls back as a unit.

use serde_json::Value;

use super::errors::CatalogError;
use super::CatalogPool;
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::Logger;
use crate::replica::Replica;

/// Parsed `data_object_finalize` payload.
#[derive(Debug, Clone)]
pub struct FinalizePayload {
    pub data_id: i64,
    /// (before, after) images per replica.
    pub replicas: Vec<(Replica, Replica)>,
}

impl FinalizePayload {
    /// Parse the serialized payload.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(input).map_err(|e| {
            CoreError::new(
                CoreErrorCode::InputNotWellFormed,
                format!("finalize payload is not valid JSON: {}", e),
            )
        })?;
        Self::from_value(&value)
    }

    /// Extract the payload from an already-parsed JSON value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let data_id: i64 = value
            .get("data_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    "finalize payload missing string field [data_id]",
                )
            })?;

        let entries = value
            .get("replicas")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    "finalize payload missing array field [replicas]",
                )
            })?;

        let mut replicas = Vec::with_capacity(entries.len());
        for entry in entries {
            let before = entry.get("before").ok_or_else(|| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    "finalize replica entry missing [before]",
                )
            })?;
            let after = entry.get("after").ok_or_else(|| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    "finalize replica entry missing [after]",
                )
            })?;
            replicas.push((Replica::from_json(before)?, Replica::from_json(after)?));
        }

        Ok(Self { data_id, replicas })
    }
}

/// Apply a finalize payload in one catalog transaction.
///
/// Success means every replica row was updated and the transaction
/// committed. Any failure rolls the whole payload back.
pub fn finalize_data_object(pool: &CatalogPool, payload: &FinalizePayload) -> CoreResult<()> {
    let connection = pool.connection().map_err(|e| {
        CoreError::new(CoreErrorCode::CatalogConnectionError, e.to_string())
    })?;

    let mut txn = connection.backend().begin().map_err(map_driver_error)?;

    for (before, after) in &payload.replicas {
        if let Err(e) = txn.update_replica(payload.data_id, before.resc_id, after) {
            Logger::error(
                "finalize_update_failed",
                &[
                    ("data_id", &payload.data_id.to_string()),
                    ("resc_id", &before.resc_id.to_string()),
                    ("reason", &e.to_string()),
                ],
            );
            let _ = txn.rollback();
            return Err(map_driver_error(e));
        }
    }

    txn.commit().map_err(map_driver_error)?;
    Ok(())
}

/// Parse and apply a serialized payload; the remote-procedure shape.
/// Returns 0 on success or the stable negative code.
pub fn finalize_data_object_json(pool: &CatalogPool, input: &str) -> i32 {
    let payload = match FinalizePayload::parse(input) {
        Ok(p) => p,
        Err(e) => return e.status(),
    };
    match finalize_data_object(pool, &payload) {
        Ok(()) => 0,
        Err(e) => e.status(),
    }
}

fn map_driver_error(e: CatalogError) -> CoreError {
    match e {
        CatalogError::Driver(msg) => CoreError::new(CoreErrorCode::CatalogLibraryError, msg),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBackend, MemoryCatalog};
    use crate::replica::{Replica, ReplicaStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn replica(data_id: i64, rn: i32, resc_id: i64) -> Replica {
        Replica {
            data_id,
            coll_id: 1,
            logical_path: "/z/home/obj".to_string(),
            replica_number: rn,
            resc_id,
            resc_hier: format!("resc{}", resc_id),
            resc_name: format!("resc{}", resc_id),
            replica_status: ReplicaStatus::Good,
            ..Replica::default()
        }
    }

    fn seeded_pool() -> (Arc<MemoryCatalog>, CatalogPool) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.register_replica(&replica(1, 0, 100)).unwrap();
        catalog.register_replica(&replica(1, 1, 200)).unwrap();
        let pool = CatalogPool::new(catalog.clone(), 2);
        (catalog, pool)
    }

    fn payload_json(size: i64, status: ReplicaStatus) -> String {
        let before = replica(1, 0, 100);
        let mut after = before.clone();
        after.size = size;
        after.replica_status = status;
        json!({
            "data_id": "1",
            "replicas": [{ "before": before.to_json(), "after": after.to_json() }],
        })
        .to_string()
    }

    #[test]
    fn test_commit_updates_rows() {
        let (catalog, pool) = seeded_pool();
        let status = finalize_data_object_json(&pool, &payload_json(7, ReplicaStatus::Good));
        assert_eq!(status, 0);
        let row = catalog.row(1, 100).unwrap();
        assert_eq!(row.size, 7);
        assert_eq!(row.replica_status, ReplicaStatus::Good);
    }

    #[test]
    fn test_reapplying_payload_is_idempotent() {
        let (catalog, pool) = seeded_pool();
        let payload = payload_json(7, ReplicaStatus::Good);
        assert_eq!(finalize_data_object_json(&pool, &payload), 0);
        let first = catalog.row(1, 100).unwrap();
        assert_eq!(finalize_data_object_json(&pool, &payload), 0);
        assert_eq!(catalog.row(1, 100).unwrap(), first);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let (_, pool) = seeded_pool();
        let status = finalize_data_object_json(&pool, "{not json");
        assert_eq!(status, CoreErrorCode::InputNotWellFormed.code());
    }

    #[test]
    fn test_missing_field_is_invalid_input() {
        let (_, pool) = seeded_pool();
        let status = finalize_data_object_json(&pool, "{\"replicas\": []}");
        assert_eq!(status, CoreErrorCode::InvalidInputParam.code());
    }

    #[test]
    fn test_unknown_row_rolls_back_whole_payload() {
        let (catalog, pool) = seeded_pool();
        let good_before = replica(1, 0, 100);
        let mut good_after = good_before.clone();
        good_after.size = 55;
        let missing_before = replica(1, 2, 999);
        let missing_after = missing_before.clone();

        let input = json!({
            "data_id": "1",
            "replicas": [
                { "before": good_before.to_json(), "after": good_after.to_json() },
                { "before": missing_before.to_json(), "after": missing_after.to_json() },
            ],
        })
        .to_string();

        let status = finalize_data_object_json(&pool, &input);
        assert_eq!(status, CoreErrorCode::CatalogNoRowsFound.code());
        // The in-range update must not have been applied.
        assert_eq!(catalog.row(1, 100).unwrap().size, 0);
    }

    #[test]
    fn test_exhausted_pool_is_connection_error() {
        let (_, pool) = seeded_pool();
        let held: Vec<_> = (0..pool.capacity())
            .map(|_| pool.connection().unwrap())
            .collect();
        let status = finalize_data_object_json(&pool, &payload_json(1, ReplicaStatus::Good));
        assert_eq!(status, CoreErrorCode::CatalogConnectionError.code());
        drop(held);
    }
}
