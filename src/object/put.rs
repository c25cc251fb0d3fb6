//! Single-buffer put and get
//!
//! A put is an open(create|write) with the payload carried inline,
//! followed by the standard close/finalize. A get is the symmetric
//! single-buffer read of a good replica.

use crate::descriptor::{OpenFlags, OpenRequest, OperationKind};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::{log_core_error, Logger};
use crate::replica::{keywords, CondInput, LogicalObject};
use crate::resolve::Hierarchy;
use crate::session::Session;

use super::close::{close, CloseDisposition, CloseInput};
use super::io;
use super::replicate::replicate;

/// Force-put may only overwrite; it cannot silently land the object on
/// a different root than its existing replicas.
fn check_force_put_target(
    session: &Session,
    logical_path: &str,
    cond_input: &CondInput,
) -> CoreResult<()> {
    let dest = match cond_input.get(keywords::DEST_RESC_NAME) {
        Some(dest) if !dest.is_empty() => dest,
        _ => return Ok(()),
    };
    if !cond_input.contains(keywords::FORCE_FLAG) {
        return Ok(());
    }
    let conn = session.context.catalog.connection().map_err(CoreError::from)?;
    let rows = conn
        .backend()
        .object_rows(logical_path)
        .map_err(CoreError::from)?;
    if rows.is_empty() {
        return Ok(());
    }
    let matches = rows
        .iter()
        .any(|r| Hierarchy::parse(&r.resc_hier).root() == Some(dest));
    if !matches {
        return Err(CoreError::new(
            CoreErrorCode::HierarchyError,
            format!(
                "cannot force put [{}] to a different resource [{}]",
                logical_path, dest
            ),
        ));
    }
    Ok(())
}

/// Store `data` as the content of `logical_path`.
pub fn put(
    session: &mut Session,
    logical_path: &str,
    data: &[u8],
    cond_input: CondInput,
) -> CoreResult<CloseDisposition> {
    check_force_put_target(session, logical_path, &cond_input)?;

    let mut cond_input = cond_input;
    cond_input.set_flag(keywords::DATA_INCLUDED);
    let propagate_all = cond_input.contains(keywords::ALL);

    let request = OpenRequest::new(logical_path, OpenFlags::create())
        .with_cond_input(cond_input)
        .with_data_size(data.len() as i64)
        .with_oper_type(OperationKind::Put);

    let index = super::open::open(session, request)?;

    // The pre-open size of the target replica decides whether a
    // zero-length put counts as a write.
    let before_size = session
        .state
        .before(logical_path, session.descriptors.get(index)?.replica_number)
        .map(|r| r.size)
        .unwrap_or(0);

    if data.is_empty() {
        let slot = session.descriptors.get_mut(index)?;
        // Overwriting a non-empty replica with zero bytes still stales
        // the siblings.
        slot.bytes_written = if before_size > 0 { 1 } else { 0 };
    } else if let Err(e) = io::write(session, index, data) {
        log_core_error("put_write_failed", &e);
        // The failed-operation close path stales the replica.
        let _ = close(session, index, &CloseInput::default());
        return Err(e);
    }

    session.descriptors.get_mut(index)?.expected_size = data.len() as i64;

    let disposition = close(session, index, &CloseInput::default())?;

    if propagate_all && disposition == CloseDisposition::Committed {
        update_remaining_replicas(session, logical_path)?;
    }
    Ok(disposition)
}

/// Bring every stale replica of the object up to date after a put with
/// the propagate-to-all keyword.
fn update_remaining_replicas(session: &mut Session, logical_path: &str) -> CoreResult<()> {
    let rows = {
        let conn = session.context.catalog.connection().map_err(CoreError::from)?;
        conn.backend()
            .object_rows(logical_path)
            .map_err(CoreError::from)?
    };
    let object = LogicalObject::from_replicas(rows)?;
    let stale_roots: Vec<String> = object
        .replicas()
        .iter()
        .filter(|r| !r.replica_status.is_readable())
        .map(|r| r.root_resource().to_string())
        .collect();

    for root in stale_roots {
        let mut cond = CondInput::new();
        cond.set_flag(keywords::UPDATE_REPL);
        if let Err(e) = replicate(session, logical_path, &root, cond) {
            log_core_error("propagate_put_failed", &e);
        }
    }
    Ok(())
}

/// Fetch the content of `logical_path` in one buffer.
pub fn get(
    session: &mut Session,
    logical_path: &str,
    cond_input: CondInput,
) -> CoreResult<Vec<u8>> {
    let request = OpenRequest::new(logical_path, OpenFlags::read())
        .with_cond_input(cond_input)
        .with_oper_type(OperationKind::Get);
    let index = super::open::open(session, request)?;

    let mut data = Vec::new();
    loop {
        match io::read(session, index, 64 * 1024) {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(e) => {
                let _ = close(session, index, &CloseInput::default());
                return Err(e);
            }
        }
    }

    close(session, index, &CloseInput::default())?;
    Logger::trace(
        "object_fetched",
        &[
            ("path", logical_path),
            ("bytes", &data.len().to_string()),
        ],
    );
    Ok(data)
}
