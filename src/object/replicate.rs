//! Replication
//!
//! Copies one good replica onto another root resource: a read open of
//! the source, an intermediate create (or forced update) on the
//! destination, a chunked transfer, and a destination close that
//! mirrors the source replica's status and checksum.

use crate::descriptor::{OpenFlags, OpenRequest, OperationKind};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::{log_core_error, Logger};
use crate::replica::{keywords, CondInput};
use crate::resolve::Hierarchy;
use crate::session::Session;

use super::close::{close, CloseDisposition, CloseInput};
use super::io;

const TRANSFER_CHUNK: usize = 64 * 1024;

/// Replicate `logical_path` onto `dest_root`.
pub fn replicate(
    session: &mut Session,
    logical_path: &str,
    dest_root: &str,
    cond_input: CondInput,
) -> CoreResult<CloseDisposition> {
    let rows = {
        let conn = session.context.catalog.connection().map_err(CoreError::from)?;
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

    let existing_dest = rows
        .iter()
        .find(|r| Hierarchy::parse(&r.resc_hier).root() == Some(dest_root))
        .map(|r| r.replica_number);
    if existing_dest.is_some()
        && !cond_input.contains(keywords::UPDATE_REPL)
        && !cond_input.contains(keywords::FORCE_FLAG)
    {
        return Err(CoreError::new(
            CoreErrorCode::CopyAlreadyInResource,
            format!(
                "[{}] already has a replica on [{}]",
                logical_path, dest_root
            ),
        ));
    }

    // Source: a good replica, opened for read.
    let src_request = OpenRequest::new(logical_path, OpenFlags::read())
        .with_oper_type(OperationKind::ReplSrc);
    let src_index = super::open::open(session, src_request)?;
    let (src_size, src_rn) = {
        let slot = session.descriptors.get(src_index)?;
        (slot.expected_size, slot.replica_number)
    };

    // Destination: an intermediate replica on the target root, or a
    // forced update of the copy already there.
    let mut dest_cond = cond_input;
    let dest_request = match existing_dest {
        Some(dest_rn) => {
            dest_cond.set(keywords::REPL_NUM, dest_rn.to_string());
            let flags = OpenFlags {
                truncate: true,
                ..OpenFlags::write()
            };
            OpenRequest::new(logical_path, flags)
                .with_cond_input(dest_cond)
                .with_data_size(src_size)
                .with_oper_type(OperationKind::ReplDest)
        }
        None => {
            dest_cond.set(keywords::DEST_RESC_NAME, dest_root);
            OpenRequest::new(logical_path, OpenFlags::create())
                .with_cond_input(dest_cond)
                .with_data_size(src_size)
                .with_oper_type(OperationKind::ReplDest)
        }
    };

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

    // Chunked transfer.
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
        log_core_error("replication_transfer_failed", &e);
        // Destination close takes the failed path and stales the copy.
        let _ = close(session, dest_index, &CloseInput::default());
        let _ = close(session, src_index, &CloseInput::default());
        return Err(e);
    }

    let disposition = match close(session, dest_index, &CloseInput::default()) {
        Ok(d) => d,
        Err(e) => {
            let _ = close(session, src_index, &CloseInput::default());
            return Err(e);
        }
    };
    close(session, src_index, &CloseInput::default())?;

    Logger::info(
        "replica_replicated",
        &[
            ("path", logical_path),
            ("dest", dest_root),
            ("source_replica", &src_rn.to_string()),
        ],
    );
    Ok(disposition)
}
