//! Unlink
//!
//! Removes one replica (with a replica-number hint) or the whole
//! object. Physical unlink failures are surfaced; catalog rows only go
//! once the vault file is gone or confirmed missing.

use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::{log_core_error, Logger};
use crate::replica::{keywords, CondInput, Replica};
use crate::session::Session;

/// Unlink `logical_path`, or just one replica of it when the replica
/// number keyword is present.
pub fn unlink(session: &mut Session, logical_path: &str, cond_input: &CondInput) -> CoreResult<()> {
    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();

    let rows = {
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .object_rows(logical_path)
            .map_err(CoreError::from)?
    };
    if rows.is_empty() {
        return Err(CoreError::new(
            CoreErrorCode::ReplicaDoesNotExist,
            format!("[{}] does not exist", logical_path),
        ));
    }

    let targets: Vec<Replica> = match cond_input.get(keywords::REPL_NUM) {
        Some(hint) => {
            let rn: i32 = hint.parse().map_err(|_| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    format!("replica number is not an integer [{}]", hint),
                )
            })?;
            let target = rows
                .iter()
                .find(|r| r.replica_number == rn)
                .cloned()
                .ok_or_else(|| {
                    CoreError::new(
                        CoreErrorCode::ReplicaDoesNotExist,
                        format!("no replica [{}] of [{}]", rn, logical_path),
                    )
                })?;
            vec![target]
        }
        None => rows.clone(),
    };

    // An in-flight writer anywhere on the object blocks the unlink.
    for row in &rows {
        if row.replica_status.is_writer() {
            return Err(CoreError::new(
                CoreErrorCode::HierarchyLocked,
                format!(
                    "replica [{}] of [{}] is busy",
                    row.replica_number, logical_path
                ),
            ));
        }
    }

    for target in targets {
        let plugin = registry.plugin_for_hierarchy(&target.resc_hier)?.clone();
        if let Err(e) = plugin.unlink(&target.physical_path) {
            if e.code() == CoreErrorCode::PhysicalUnlinkFailed {
                // A missing vault file is unregistered anyway.
                log_core_error("unlink_vault_file_failed", &e);
            } else {
                return Err(e);
            }
        }
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .unregister_replica(target.data_id, target.replica_number)
            .map_err(CoreError::from)?;
    }

    Logger::info("object_unlinked", &[("path", logical_path)]);
    Ok(())
}
