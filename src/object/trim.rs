//! Cache-replica trim
//!
//! Internal trim used by the purge-cache close flag: drops one replica,
//! addressed by number and hierarchy, while always keeping at least one
//! readable copy of the object.

use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::Logger;
use crate::session::Session;

/// Remove the replica `(replica_number, resc_hier)` of `logical_path`.
pub fn trim_cache_replica(
    session: &mut Session,
    logical_path: &str,
    replica_number: i32,
    resc_hier: &str,
) -> CoreResult<()> {
    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();

    let rows = {
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .object_rows(logical_path)
            .map_err(CoreError::from)?
    };

    let target = rows
        .iter()
        .find(|r| r.replica_number == replica_number && r.resc_hier == resc_hier)
        .cloned()
        .ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::ReplicaDoesNotExist,
                format!(
                    "no replica [{}] of [{}] on [{}]",
                    replica_number, logical_path, resc_hier
                ),
            )
        })?;

    // Never drop the last readable copy.
    let surviving_readable = rows
        .iter()
        .filter(|r| r.replica_number != replica_number)
        .filter(|r| r.replica_status.is_readable())
        .count();
    if surviving_readable == 0 {
        return Err(CoreError::new(
            CoreErrorCode::DeniedByPolicy,
            format!(
                "trimming replica [{}] would leave [{}] without a readable copy",
                replica_number, logical_path
            ),
        ));
    }

    let plugin = registry.plugin_for_hierarchy(&target.resc_hier)?.clone();
    if let Err(e) = plugin.unlink(&target.physical_path) {
        // The row still goes; a stray vault file is repairable.
        Logger::warn(
            "trim_unlink_failed",
            &[
                ("path", logical_path),
                ("physical", target.physical_path.as_str()),
                ("reason", e.message()),
            ],
        );
    }

    {
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .unregister_replica(target.data_id, replica_number)
            .map_err(CoreError::from)?;
    }

    Logger::info(
        "cache_replica_trimmed",
        &[
            ("path", logical_path),
            ("replica", &replica_number.to_string()),
            ("hier", resc_hier),
        ],
    );
    Ok(())
}
