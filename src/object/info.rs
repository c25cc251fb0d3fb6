//! Replica information operations
//!
//! Catalog-backed queries and small single-replica updates: size,
//! emptiness, checksum (with optional recomputation), and last write
//! time. Updates go through the same finalize path as everything else.

use crate::catalog::executor::{finalize_data_object, FinalizePayload};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::replica::Replica;
use crate::session::Session;

/// When to recompute a checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationCalculation {
    /// Only when no checksum is registered
    IfEmpty,
    /// Unconditionally
    Always,
}

fn fetch_replica(session: &Session, logical_path: &str, replica_number: i32) -> CoreResult<Replica> {
    let conn = session.context.catalog.connection().map_err(CoreError::from)?;
    let rows = conn
        .backend()
        .object_rows(logical_path)
        .map_err(CoreError::from)?;
    rows.into_iter()
        .find(|r| r.replica_number == replica_number)
        .ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::CatalogNoRowsFound,
                format!("no replica [{}] of [{}]", replica_number, logical_path),
            )
        })
}

fn update_replica_row(session: &Session, before: Replica, after: Replica) -> CoreResult<()> {
    let payload = FinalizePayload {
        data_id: before.data_id,
        replicas: vec![(before, after)],
    };
    finalize_data_object(&session.context.catalog, &payload)
}

/// Registered size of one replica.
pub fn replica_size(session: &Session, logical_path: &str, replica_number: i32) -> CoreResult<i64> {
    Ok(fetch_replica(session, logical_path, replica_number)?.size)
}

/// Whether the replica's registered size is zero.
pub fn is_replica_empty(
    session: &Session,
    logical_path: &str,
    replica_number: i32,
) -> CoreResult<bool> {
    Ok(replica_size(session, logical_path, replica_number)? == 0)
}

/// Checksum of one replica, computing and registering it as directed.
pub fn replica_checksum(
    session: &Session,
    logical_path: &str,
    replica_number: i32,
    calculation: VerificationCalculation,
) -> CoreResult<String> {
    let replica = fetch_replica(session, logical_path, replica_number)?;
    if calculation == VerificationCalculation::IfEmpty && !replica.checksum.is_empty() {
        return Ok(replica.checksum);
    }

    let plugin = session
        .context
        .resources
        .plugin_for_hierarchy(&replica.resc_hier)?
        .clone();
    let computed = plugin.checksum(&replica.physical_path)?;

    if computed != replica.checksum {
        let mut after = replica.clone();
        after.checksum = computed.clone();
        update_replica_row(session, replica, after)?;
    }
    Ok(computed)
}

/// Registered last write time of one replica.
pub fn last_write_time(
    session: &Session,
    logical_path: &str,
    replica_number: i32,
) -> CoreResult<String> {
    Ok(fetch_replica(session, logical_path, replica_number)?.modify_ts)
}

/// Set the last write time of one replica. The timestamp is the
/// catalog's zero-padded epoch-second form.
pub fn set_last_write_time(
    session: &Session,
    logical_path: &str,
    replica_number: i32,
    modify_ts: &str,
) -> CoreResult<()> {
    if modify_ts.len() != 11 || !modify_ts.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::new(
            CoreErrorCode::InvalidInputParam,
            format!("malformed timestamp [{}]", modify_ts),
        ));
    }
    let replica = fetch_replica(session, logical_path, replica_number)?;
    let mut after = replica.clone();
    after.modify_ts = modify_ts.to_string();
    update_replica_row(session, replica, after)
}
