//! Closing a replica: the finalize engine
//!
//! Invoked exactly once per descriptor. Consolidates size, checksum,
//! status and timestamps for the target replica (and its siblings where
//! the operation demands it), then commits the whole object's state in
//! one catalog transaction. Failure paths mark the target stale and
//! restore the siblings; a failed commit restores the replica access
//! entry and leaves the replica intermediate for the sweeper.

use std::sync::Arc;

use crate::descriptor::{
    AccessRestoreGuard, ChecksumFlag, L1Descriptor, OpenType, OperationKind, RESERVED_SLOTS,
};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::locking::{commit_object_state, release_and_commit, stage_unlock, UnlockOutcome};
use crate::observability::{log_core_error, Logger};
use crate::replica::{keywords, now_timestamp, Replica};
use crate::resource::{ResourcePlugin, UNKNOWN_FILE_SIZE};
use crate::rules::PostProcessHook;
use crate::session::Session;

use super::trim::trim_cache_replica;

/// Client-supplied close input.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseInput {
    /// Byte count reported by a peer zone; authoritative when the local
    /// count is zero.
    pub bytes_written: i64,
}

/// Terminal state of a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// The finalize payload committed; the target replica is good.
    Committed,
    /// The operation failed; the target replica was committed stale.
    AbortedStale,
    /// Nothing changed in the catalog beyond restored statuses.
    AbortedNoChange,
}

/// Close the descriptor at `index`.
pub fn close(
    session: &mut Session,
    index: usize,
    input: &CloseInput,
) -> CoreResult<CloseDisposition> {
    let slot = session.descriptors.get(index)?.clone();

    // Opens forwarded to a peer zone close on the peer.
    if let Some(link) = &slot.remote_zone {
        let gateway = session.context.gateway.clone().ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::UnknownHostname,
                format!("no gateway to zone [{}]", link.zone),
            )
        })?;
        let remote = gateway.forward_close(&link.zone, link.remote_index, input.bytes_written)?;
        session.descriptors.free(index)?;
        return Ok(if remote.status == 0 {
            CloseDisposition::Committed
        } else {
            CloseDisposition::AbortedStale
        });
    }

    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();
    let access = session.context.access.clone();
    let plugin: Arc<dyn ResourcePlugin> = registry.plugin_for_hierarchy(&slot.resc_hier)?.clone();

    // Erase the access entry before any finalize work so no other opener
    // sees the replica as writable mid-close. Restored on commit failure.
    let mut guard: Option<AccessRestoreGuard<'_>> = None;
    if slot.open_type != OpenType::ForRead {
        if !slot.replica_token.is_empty() {
            guard = Some(AccessRestoreGuard::erase(
                access.as_ref(),
                &slot.replica_token,
                session.pid(),
            ));
        } else {
            Logger::warn(
                "missing_replica_token",
                &[("path", slot.request.logical_path.as_str())],
            );
        }
    }

    // Physical close failure is surfaced but does not abort finalize;
    // the replica goes stale through the failed-operation path.
    let mut oper_status = slot.oper_status;
    if slot.has_physical_fd() {
        if let Err(e) = plugin.close(slot.physical_fd) {
            log_core_error("physical_close_failed", &e);
            if oper_status == 0 {
                oper_status = e.status();
            }
        }
    }

    if slot.open_type == OpenType::ForRead {
        release_advisory(session, &slot);
        session.descriptors.free(index)?;
        apply_post_hooks(session, &slot, 0);
        return Ok(CloseDisposition::AbortedNoChange);
    }

    let path = slot.request.logical_path.clone();
    let replica_number = slot.replica_number;

    // A sibling descriptor's close may already have finalized the
    // object and erased the staging entry; there is nothing left for
    // this slot to commit.
    if !session.state.contains(&path) {
        Logger::warn("state_entry_already_finalized", &[("path", path.as_str())]);
        if let Some(g) = guard.as_mut() {
            g.disarm();
        }
        release_advisory(session, &slot);
        session.descriptors.free(index)?;
        return Ok(if oper_status < 0 {
            CloseDisposition::AbortedStale
        } else {
            CloseDisposition::AbortedNoChange
        });
    }

    // Failed operation: stale the target with the vault size recorded,
    // restore the siblings, and report success at the catalog level.
    if oper_status < 0 {
        let vault_size = plugin.stat_size(&slot.physical_path).ok().filter(|s| *s >= 0);
        release_and_commit(
            &mut session.state,
            &pool,
            &path,
            replica_number,
            UnlockOutcome::OperationFailed { vault_size },
        )?;
        if let Some(g) = guard.as_mut() {
            g.disarm();
        }
        release_advisory(session, &slot);
        session.descriptors.free(index)?;
        return Ok(CloseDisposition::AbortedStale);
    }

    // A cross-zone write reports its byte count in the close input.
    let mut bytes_written = slot.bytes_written;
    if input.bytes_written > 0 && bytes_written <= 0 {
        bytes_written = input.bytes_written;
    }
    // A create with no writes still materializes an empty replica.
    let bytes_in_operation = bytes_written >= 0
        || slot.operation_kind.is_destination()
        || slot.open_type == OpenType::Create;

    if !bytes_in_operation {
        return close_with_no_bytes_written(session, index, &slot, plugin, guard);
    }

    // Size in vault, reconciled against the expected transfer length.
    let size_in_vault = match plugin.stat_size(&slot.physical_path) {
        Ok(UNKNOWN_FILE_SIZE) => {
            // Archive plugins cannot stat; trust the byte accounting.
            if bytes_written >= 0 {
                bytes_written
            } else {
                slot.expected_size.max(0)
            }
        }
        Ok(size) => size,
        Err(e) => {
            log_core_error("vault_stat_failed", &e);
            release_and_commit(
                &mut session.state,
                &pool,
                &path,
                replica_number,
                UnlockOutcome::OperationFailed { vault_size: None },
            )?;
            if let Some(g) = guard.as_mut() {
                g.disarm();
            }
            release_advisory(session, &slot);
            session.descriptors.free(index)?;
            return Ok(CloseDisposition::AbortedStale);
        }
    };

    let skip_size_check = slot.request.cond_input.contains(keywords::NO_CHK_COPY_LEN);
    let size_in_vault = if skip_size_check && slot.expected_size > 0 {
        // The declared transfer length is trusted over the vault stat.
        slot.expected_size
    } else {
        size_in_vault
    };
    if slot.expected_size > 0 && size_in_vault != slot.expected_size && !skip_size_check {
        release_and_commit(
            &mut session.state,
            &pool,
            &path,
            replica_number,
            UnlockOutcome::OperationFailed {
                vault_size: Some(size_in_vault),
            },
        )?;
        if let Some(g) = guard.as_mut() {
            g.disarm();
        }
        release_advisory(session, &slot);
        session.descriptors.free(index)?;
        return Err(CoreError::new(
            CoreErrorCode::CopyLenError,
            format!(
                "size in vault {} != expected size {} for [{}]",
                size_in_vault, slot.expected_size, path
            ),
        ));
    }

    // Checksum per policy.
    let checksum = match compute_close_checksum(session, &slot, plugin.as_ref()) {
        Ok(checksum) => checksum,
        Err(e) => {
            release_and_commit(
                &mut session.state,
                &pool,
                &path,
                replica_number,
                UnlockOutcome::OperationFailed {
                    vault_size: Some(size_in_vault),
                },
            )?;
            if let Some(g) = guard.as_mut() {
                g.disarm();
            }
            release_advisory(session, &slot);
            session.descriptors.free(index)?;
            return Err(e);
        }
    };

    // Stage the consolidated content into the after image.
    let physical_path = slot.physical_path.clone();
    session.state.update(&path, replica_number, |r| {
        r.size = size_in_vault;
        if let Some(sum) = &checksum {
            r.checksum = sum.clone();
        }
        r.modify_ts = now_timestamp();
        r.physical_path = physical_path.clone();
    })?;

    // Compute the status transitions.
    let outcome = if slot.operation_kind.mirrors_source_status() {
        let source = session.descriptors.get(slot.source_descriptor)?;
        UnlockOutcome::ReplicationSucceeded {
            source_replica_number: source.replica_number,
            preserve_siblings: false,
        }
    } else {
        UnlockOutcome::WriteSucceeded
    };
    stage_unlock(&mut session.state, &path, replica_number, outcome)?;

    // One transaction for the whole object. A failure here leaves the
    // replica intermediate and restores the access entry.
    if let Err(e) = commit_object_state(&session.state, &pool, &path) {
        log_core_error("finalize_commit_failed", &e);
        return Err(e);
    }
    let _ = session.state.erase(&path);
    if let Some(g) = guard.as_mut() {
        g.disarm();
    }

    if slot.purge_cache {
        if let Err(e) = trim_cache_replica(session, &path, replica_number, &slot.resc_hier) {
            log_core_error("cache_trim_failed", &e);
        }
    }

    release_advisory(session, &slot);
    session.descriptors.free(index)?;

    Logger::info(
        "replica_finalized",
        &[
            ("path", path.as_str()),
            ("replica", &replica_number.to_string()),
            ("size", &size_in_vault.to_string()),
        ],
    );
    apply_post_hooks(session, &slot, 0);
    Ok(CloseDisposition::Committed)
}

/// Nothing was written: verify checksum where requested, apply metadata
/// callbacks, restore every status. For PUT a requested checksum is
/// still computed and registered.
fn close_with_no_bytes_written(
    session: &mut Session,
    index: usize,
    slot: &L1Descriptor,
    plugin: Arc<dyn ResourcePlugin>,
    mut guard: Option<AccessRestoreGuard<'_>>,
) -> CoreResult<CloseDisposition> {
    let pool = session.context.catalog.clone();
    let hooks = session.context.hooks.clone();
    let path = slot.request.logical_path.clone();
    let replica_number = slot.replica_number;

    // Checksum verification comes first so a mismatch leaves no
    // metadata side effects behind.
    let mut staged_checksum = None;
    let wants_checksum = slot.checksum_flag == ChecksumFlag::Verify
        || (slot.operation_kind == OperationKind::Put
            && slot.checksum_flag != ChecksumFlag::None);
    if wants_checksum {
        match compute_close_checksum(session, slot, plugin.as_ref()) {
            Ok(checksum) => staged_checksum = checksum,
            Err(e) => {
                let vault_size = plugin.stat_size(&slot.physical_path).ok().filter(|s| *s >= 0);
                release_and_commit(
                    &mut session.state,
                    &pool,
                    &path,
                    replica_number,
                    UnlockOutcome::OperationFailed { vault_size },
                )?;
                if let Some(g) = guard.as_mut() {
                    g.disarm();
                }
                release_advisory(session, slot);
                session.descriptors.free(index)?;
                return Err(e);
            }
        }
    }

    if let Err(e) = hooks.apply_metadata_from_cond_input(&path, &slot.request.cond_input) {
        if slot.operation_kind == OperationKind::Put {
            // A put that cannot apply its metadata is unwound entirely.
            let _ = plugin.unlink(&slot.physical_path);
            if let Ok(conn) = pool.connection() {
                let data_id = session
                    .state
                    .entry(&path)
                    .map(|entry| entry.data_id)
                    .unwrap_or_default();
                let _ = conn.backend().unregister_replica(data_id, replica_number);
            }
            let _ = session.state.erase(&path);
            if let Some(g) = guard.as_mut() {
                g.disarm();
            }
        }
        release_advisory(session, slot);
        session.descriptors.free(index)?;
        return Err(e);
    }

    if let Some(sum) = staged_checksum {
        session
            .state
            .update(&path, replica_number, |r| r.checksum = sum.clone())?;
    }

    release_and_commit(
        &mut session.state,
        &pool,
        &path,
        replica_number,
        UnlockOutcome::NoBytesWritten,
    )?;
    if let Some(g) = guard.as_mut() {
        g.disarm();
    }
    release_advisory(session, slot);
    session.descriptors.free(index)?;
    apply_post_hooks(session, slot, 0);
    Ok(CloseDisposition::AbortedNoChange)
}

/// Checksum for the close, per the slot's policy.
///
/// Replication and move destinations verify against the source replica's
/// checksum when one exists; a direct-archive refusal preserves the
/// source checksum instead of failing the close.
fn compute_close_checksum(
    session: &Session,
    slot: &L1Descriptor,
    plugin: &dyn ResourcePlugin,
) -> CoreResult<Option<String>> {
    let path = &slot.request.logical_path;

    if slot.operation_kind.mirrors_source_status() {
        if slot.source_descriptor < RESERVED_SLOTS {
            return Err(CoreError::new(
                CoreErrorCode::DescriptorOutOfRange,
                format!("source descriptor {} out of range", slot.source_descriptor),
            ));
        }
        let source = session.descriptors.get(slot.source_descriptor)?;
        let source_state = session
            .state
            .before(path, source.replica_number)
            .cloned()
            .unwrap_or_default();
        if !source_state.checksum.is_empty() && source_state.replica_status.is_readable() {
            let computed = match plugin.checksum(&slot.physical_path) {
                Ok(sum) => sum,
                Err(e) if e.code() == CoreErrorCode::DirectArchiveAccess => {
                    // Benign: the archive keeps the source checksum.
                    return Ok(Some(source_state.checksum));
                }
                Err(e) => return Err(e),
            };
            if computed != source_state.checksum {
                return Err(CoreError::new(
                    CoreErrorCode::ChecksumMismatch,
                    format!(
                        "checksum mismatch for [{}]: source [{}], computed [{}]",
                        path, source_state.checksum, computed
                    ),
                ));
            }
            return Ok(Some(computed));
        }
    }

    // Overwriting a replica that carried a checksum re-registers it.
    let registered = session
        .state
        .before(path, slot.replica_number)
        .map(|r| r.checksum.clone())
        .unwrap_or_default();
    let mut flag = slot.checksum_flag;
    if flag == ChecksumFlag::None && !registered.is_empty() {
        flag = ChecksumFlag::Register;
    }

    match flag {
        ChecksumFlag::None => Ok(None),
        ChecksumFlag::Verify => {
            let computed = plugin.checksum(&slot.physical_path)?;
            if !slot.expected_checksum.is_empty() {
                if computed != slot.expected_checksum {
                    return Err(CoreError::new(
                        CoreErrorCode::ChecksumMismatch,
                        format!(
                            "checksum mismatch for [{}]: expected [{}], computed [{}]",
                            path, slot.expected_checksum, computed
                        ),
                    ));
                }
            } else if slot.operation_kind == OperationKind::CopyDest {
                if slot.source_descriptor >= RESERVED_SLOTS {
                    let source = session.descriptors.get(slot.source_descriptor)?;
                    let source_checksum = source.expected_checksum.clone();
                    if !source_checksum.is_empty() && computed != source_checksum {
                        return Err(CoreError::new(
                            CoreErrorCode::ChecksumMismatch,
                            format!(
                                "checksum mismatch for [{}]: source [{}], computed [{}]",
                                path, source_checksum, computed
                            ),
                        ));
                    }
                }
            } else if !registered.is_empty() && computed != registered {
                return Err(CoreError::new(
                    CoreErrorCode::ChecksumMismatch,
                    format!(
                        "checksum mismatch for [{}]: registered [{}], computed [{}]",
                        path, registered, computed
                    ),
                ));
            }
            Ok(Some(computed))
        }
        ChecksumFlag::Register => {
            let computed = plugin.checksum(&slot.physical_path)?;
            Ok(Some(computed))
        }
    }
}

fn release_advisory(session: &Session, slot: &L1Descriptor) {
    if slot.lock_fd >= 0 {
        if let Err(e) = session.context.advisory.release(slot.lock_fd) {
            log_core_error("advisory_unlock_failed", &e);
        }
    }
}

/// Static post-processing hooks. Return codes are informational; a
/// negative code is logged and never surfaced.
fn apply_post_hooks(session: &Session, slot: &L1Descriptor, close_status: i32) {
    let hooks = session.context.hooks.clone();
    let replica_view = Replica {
        logical_path: slot.request.logical_path.clone(),
        replica_number: slot.replica_number,
        resc_hier: slot.resc_hier.clone(),
        physical_path: slot.physical_path.clone(),
        ..Replica::default()
    };
    let path = &slot.request.logical_path;

    let mut fired = Vec::new();
    match slot.open_type {
        OpenType::Create => fired.push(PostProcessHook::Create),
        OpenType::ForRead => fired.push(PostProcessHook::OpenRead),
        OpenType::ForWrite => fired.push(PostProcessHook::OpenWrite),
    }
    if slot.operation_kind == OperationKind::ReplDest {
        fired.push(PostProcessHook::Replicate);
    }
    if slot.operation_kind == OperationKind::CopyDest {
        fired.push(PostProcessHook::Copy);
    } else if slot.operation_kind == OperationKind::Put
        || slot.open_type == OpenType::Create
        || (slot.open_type == OpenType::ForWrite && slot.bytes_written > 0)
    {
        fired.push(PostProcessHook::Put);
    } else if slot.operation_kind == OperationKind::PhymvDest {
        fired.push(PostProcessHook::Phymv);
    }

    for hook in fired {
        let code = hooks.postprocess(hook, path, &replica_view, close_status);
        if code < 0 {
            Logger::warn(
                "post_hook_failed",
                &[
                    ("hook", hook.as_str()),
                    ("path", path.as_str()),
                    ("code", &code.to_string()),
                ],
            );
        }
    }
}
