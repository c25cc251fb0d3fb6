//! Physical move
//!
//! A replicate onto the destination followed by removal of the source
//! replica; the moved copy then takes over the source's replica number
//! through a single-row finalize so the object's numbering is stable.

use crate::catalog::executor::{finalize_data_object, FinalizePayload};
use crate::descriptor::{OpenFlags, OpenRequest, OperationKind};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::Logger;
use crate::replica::{keywords, CondInput};
use crate::resolve::Hierarchy;
use crate::session::Session;

use super::close::{close, CloseInput};
use super::io;

const TRANSFER_CHUNK: usize = 64 * 1024;

/// Move one replica of `logical_path` onto `dest_root`.
pub fn phymv(
    session: &mut Session,
    logical_path: &str,
    dest_root: &str,
    cond_input: CondInput,
) -> CoreResult<()> {
    let pool = session.context.catalog.clone();

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
    if rows
        .iter()
        .any(|r| Hierarchy::parse(&r.resc_hier).root() == Some(dest_root))
    {
        return Err(CoreError::new(
            CoreErrorCode::CopyAlreadyInResource,
            format!(
                "[{}] already has a replica on [{}]",
                logical_path, dest_root
            ),
        ));
    }

    // Source: the replica being moved.
    let mut src_request =
        OpenRequest::new(logical_path, OpenFlags::read()).with_oper_type(OperationKind::PhymvSrc);
    if let Some(hint) = cond_input.get(keywords::REPL_NUM) {
        src_request.cond_input.set(keywords::REPL_NUM, hint);
    }
    let src_index = super::open::open(session, src_request)?;
    let (src_size, src_rn, src_physical, src_hier) = {
        let slot = session.descriptors.get(src_index)?;
        (
            slot.expected_size,
            slot.replica_number,
            slot.physical_path.clone(),
            slot.resc_hier.clone(),
        )
    };

    // Destination: a fresh intermediate replica on the target root.
    let mut dest_cond = cond_input;
    dest_cond.erase(keywords::REPL_NUM);
    dest_cond.set(keywords::DEST_RESC_NAME, dest_root);
    let dest_request = OpenRequest::new(logical_path, OpenFlags::create())
        .with_cond_input(dest_cond)
        .with_data_size(src_size)
        .with_oper_type(OperationKind::PhymvDest);
    let dest_index = match super::open::open(session, dest_request) {
        Ok(index) => index,
        Err(e) => {
            let _ = close(session, src_index, &CloseInput::default());
            return Err(e);
        }
    };
    {
        let slot = session.descriptors.get_mut(dest_index)?;
        slot.source_descriptor = src_index;
        slot.expected_size = src_size;
    }

    let transfer: CoreResult<()> = loop {
        let chunk = match io::read(session, src_index, TRANSFER_CHUNK) {
            Ok(chunk) => chunk,
            Err(e) => break Err(e),
        };
        if chunk.is_empty() {
            break Ok(());
        }
        if let Err(e) = io::write(session, dest_index, &chunk) {
            break Err(e);
        }
    };
    if let Err(e) = transfer {
        let _ = close(session, dest_index, &CloseInput::default());
        let _ = close(session, src_index, &CloseInput::default());
        return Err(e);
    }

    let dest_rn = session.descriptors.get(dest_index)?.replica_number;
    close(session, dest_index, &CloseInput::default())?;
    close(session, src_index, &CloseInput::default())?;

    // Drop the source replica.
    let registry = session.context.resources.clone();
    let src_plugin = registry.plugin_for_hierarchy(&src_hier)?.clone();
    if let Err(e) = src_plugin.unlink(&src_physical) {
        Logger::warn(
            "phymv_source_unlink_failed",
            &[("path", logical_path), ("reason", e.message())],
        );
    }
    let data_id = rows[0].data_id;
    {
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .unregister_replica(data_id, src_rn)
            .map_err(CoreError::from)?;
    }

    // The moved copy inherits the source's replica number.
    let moved = {
        let conn = pool.connection().map_err(CoreError::from)?;
        conn.backend()
            .object_rows(logical_path)
            .map_err(CoreError::from)?
            .into_iter()
            .find(|r| r.replica_number == dest_rn)
    };
    if let Some(before) = moved {
        let mut after = before.clone();
        after.replica_number = src_rn;
        let payload = FinalizePayload {
            data_id,
            replicas: vec![(before, after)],
        };
        finalize_data_object(&pool, &payload)?;
    }

    Logger::info(
        "replica_moved",
        &[
            ("path", logical_path),
            ("dest", dest_root),
            ("replica", &src_rn.to_string()),
        ],
    );
    Ok(())
}
