//! Reads and writes through an open descriptor
//!
//! Thin plumbing over the storage plugin. A deferred physical open
//! (single-buffer transfers) is performed on the first transfer.

use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::descriptor::OpenType;
use crate::session::Session;

/// Open the slot's physical file if the open was deferred.
fn ensure_physical_fd(session: &mut Session, index: usize) -> CoreResult<i32> {
    let registry = session.context.resources.clone();
    let slot = session.descriptors.get(index)?;
    if slot.has_physical_fd() {
        return Ok(slot.physical_fd);
    }

    let plugin = registry.plugin_for_hierarchy(&slot.resc_hier)?.clone();
    let write = slot.open_type != OpenType::ForRead;
    let physical_path = slot.physical_path.clone();

    let fd = match plugin.open(&physical_path, write, false) {
        Ok(fd) => fd,
        // A deferred create has no file yet.
        Err(e) if write && e.code() == CoreErrorCode::PhysicalOpenFailed => {
            plugin.create(&physical_path)?
        }
        Err(e) => return Err(e),
    };
    session.descriptors.get_mut(index)?.physical_fd = fd;
    Ok(fd)
}

/// Write bytes through the descriptor, accumulating `bytes_written`.
pub fn write(session: &mut Session, index: usize, data: &[u8]) -> CoreResult<usize> {
    {
        let slot = session.descriptors.get(index)?;
        if slot.open_type == OpenType::ForRead {
            return Err(CoreError::new(
                CoreErrorCode::IncompatibleOpenFlags,
                format!("descriptor {} is open for read", index),
            ));
        }
    }

    let fd = ensure_physical_fd(session, index)?;
    let registry = session.context.resources.clone();
    let resc_hier = session.descriptors.get(index)?.resc_hier.clone();
    let plugin = registry.plugin_for_hierarchy(&resc_hier)?.clone();

    match plugin.write(fd, data) {
        Ok(written) => {
            let slot = session.descriptors.get_mut(index)?;
            if slot.bytes_written < 0 {
                slot.bytes_written = 0;
            }
            slot.bytes_written += written as i64;
            Ok(written)
        }
        Err(e) => {
            session.descriptors.get_mut(index)?.oper_status = e.status();
            Err(e)
        }
    }
}

/// Read up to `max_bytes` through the descriptor.
pub fn read(session: &mut Session, index: usize, max_bytes: usize) -> CoreResult<Vec<u8>> {
    let fd = ensure_physical_fd(session, index)?;
    let registry = session.context.resources.clone();
    let resc_hier = session.descriptors.get(index)?.resc_hier.clone();
    let plugin = registry.plugin_for_hierarchy(&resc_hier)?.clone();

    match plugin.read(fd, max_bytes) {
        Ok(data) => Ok(data),
        Err(e) => {
            session.descriptors.get_mut(index)?.oper_status = e.status();
            Err(e)
        }
    }
}
