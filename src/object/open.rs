//! Opening a replica
//!
//! Resolution picks the hierarchy; this module creates or opens the
//! physical file, registers intermediate replicas, acquires the logical
//! write lock, and mints the replica access token. The returned slot
//! index is the client's handle for everything that follows.

use std::sync::Arc;

use crate::descriptor::{
    ChecksumFlag, OpenRequest, OpenType, OperationKind, RemoteZoneLink, RESERVED_SLOTS,
};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::locking::{acquire_write_lock, commit_object_state, AdvisoryLockType};
use crate::observability::Logger;
use crate::replica::{keywords, now_timestamp, LogicalObject, Replica, ReplicaStatus};
use crate::resolve::{resolve_resource_hierarchy, Hierarchy, Operation, Resolution, ResolveRequest};
use crate::resource::ResourcePlugin;
use crate::session::Session;
use crate::zone::zone_of;

/// Open a logical object and return the descriptor index.
pub fn open(session: &mut Session, mut request: OpenRequest) -> CoreResult<usize> {
    validate_request(session, &request)?;

    if let Some(zone) = zone_of(&request.logical_path) {
        if zone != session.context.config.zone_name {
            let zone = zone.to_string();
            return open_remote(session, request, zone);
        }
    }

    let mut lock_fd = -1;
    if let Some(lock_type) = request.cond_input.erase(keywords::LOCK_TYPE) {
        let lock_type = AdvisoryLockType::parse(&lock_type)?;
        lock_fd = session
            .context
            .advisory
            .acquire(&request.logical_path, lock_type)?;
    }

    match open_local(session, request, lock_fd) {
        Ok(index) => Ok(index),
        Err(e) => {
            if lock_fd >= 0 {
                let _ = session.context.advisory.release(lock_fd);
            }
            Err(e)
        }
    }
}

fn validate_request(session: &Session, request: &OpenRequest) -> CoreResult<()> {
    let path = &request.logical_path;
    if path.is_empty() || !path.starts_with('/') || path.ends_with('/') {
        return Err(CoreError::new(
            CoreErrorCode::InvalidLogicalPath,
            format!("malformed logical path [{}]", path),
        ));
    }
    if path.len() > session.context.config.path_length_limit {
        return Err(CoreError::new(
            CoreErrorCode::PathTooLong,
            format!("logical path exceeds {} bytes", session.context.config.path_length_limit),
        ));
    }
    request.flags.validate()
}

fn open_remote(session: &mut Session, request: OpenRequest, zone: String) -> CoreResult<usize> {
    let gateway = session.context.gateway.clone().ok_or_else(|| {
        CoreError::new(
            CoreErrorCode::UnknownHostname,
            format!("no gateway to zone [{}]", zone),
        )
    })?;
    let remote = gateway.forward_open(
        &zone,
        &request.logical_path,
        &request.cond_input,
        request.flags.write,
    )?;

    let index = session.descriptors.allocate()?;
    let slot = session.descriptors.get_mut(index)?;
    slot.open_type = if request.flags.create {
        OpenType::Create
    } else if request.flags.write {
        OpenType::ForWrite
    } else {
        OpenType::ForRead
    };
    slot.operation_kind = request.oper_type.unwrap_or(if request.flags.write {
        OperationKind::OpenWrite
    } else {
        OperationKind::OpenRead
    });
    slot.remote_zone = Some(RemoteZoneLink {
        zone: zone.clone(),
        remote_index: remote.remote_index,
    });
    slot.request = request;
    Logger::info(
        "open_forwarded",
        &[("zone", zone.as_str()), ("index", &index.to_string())],
    );
    Ok(index)
}

fn open_local(session: &mut Session, request: OpenRequest, lock_fd: i32) -> CoreResult<usize> {
    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();
    let hooks = session.context.hooks.clone();
    let config = session.context.config.clone();

    let (rows, special) = {
        let conn = pool.connection().map_err(CoreError::from)?;
        let rows = conn
            .backend()
            .object_rows(&request.logical_path)
            .map_err(CoreError::from)?;
        let special = conn
            .backend()
            .special_collection(&request.logical_path)
            .map_err(CoreError::from)?;
        (rows, special)
    };
    let object = if rows.is_empty() {
        None
    } else {
        Some(LogicalObject::from_replicas(rows)?)
    };

    let (winner_hier, operation, overwrite) =
        if let Some(pinned) = request.cond_input.get(keywords::RESC_HIER) {
            let pinned = pinned.to_string();
            let mut operation = if request.flags.create {
                Operation::Create
            } else if request.flags.write {
                Operation::Write
            } else {
                Operation::Open
            };
            let mut overwrite = false;
            if operation == Operation::Create {
                if let Some(obj) = &object {
                    if obj.index_of_hierarchy(&pinned).is_some() {
                        if !request.cond_input.contains(keywords::FORCE_FLAG) {
                            return Err(CoreError::new(
                                CoreErrorCode::OverwriteWithoutForceFlag,
                                format!(
                                    "[{}] already has a replica on [{}]",
                                    request.logical_path, pinned
                                ),
                            ));
                        }
                        operation = Operation::Write;
                        overwrite = true;
                    }
                }
            }
            (pinned, operation, overwrite)
        } else {
            let operation = if request.flags.create {
                Operation::Create
            } else if request.flags.write {
                Operation::Write
            } else {
                Operation::Open
            };
            let resolve_request = ResolveRequest {
                operation,
                logical_path: &request.logical_path,
                cond_input: &request.cond_input,
                local_zone: &config.zone_name,
                local_host: &config.local_host,
                for_replication: matches!(
                    request.oper_type,
                    Some(OperationKind::ReplDest) | Some(OperationKind::PhymvDest)
                ),
            };
            match resolve_resource_hierarchy(
                &registry,
                hooks.as_ref(),
                object.as_ref(),
                special.as_ref(),
                &resolve_request,
            )? {
                Resolution::Remote { zone } => return open_remote(session, request, zone),
                Resolution::Local {
                    winner,
                    operation,
                    overwrite,
                } => (winner.hierarchy, operation, overwrite),
            }
        };

    if operation == Operation::Create {
        create_new_replica(session, request, &winner_hier, object, lock_fd)
    } else {
        let object = object.ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::ReplicaDoesNotExist,
                format!("[{}] does not exist", request.logical_path),
            )
        })?;
        open_existing_replica(session, request, &winner_hier, operation, overwrite, object, lock_fd)
    }
}

/// Checksum policy carried from the request into the slot.
fn checksum_policy(request: &OpenRequest) -> (ChecksumFlag, String) {
    if let Some(expected) = request.cond_input.get(keywords::VERIFY_CHKSUM) {
        (ChecksumFlag::Verify, expected.to_string())
    } else if request.cond_input.contains(keywords::REG_CHKSUM)
        || request.cond_input.contains(keywords::FORCE_CHKSUM)
    {
        (ChecksumFlag::Register, String::new())
    } else {
        (ChecksumFlag::None, String::new())
    }
}

/// Whether the physical open can be deferred to the first transfer.
fn defer_physical_open(request: &OpenRequest, single_buffer_max: i64) -> bool {
    if request.cond_input.contains(keywords::NO_OPEN) {
        return true;
    }
    request.cond_input.contains(keywords::PHYOPEN_BY_SIZE)
        && request.cond_input.contains(keywords::DATA_INCLUDED)
        && request.data_size >= 0
        && request.data_size <= single_buffer_max
}

fn create_with_retry(
    plugin: &dyn ResourcePlugin,
    physical_path: &mut String,
    retry_limit: u32,
) -> CoreResult<i32> {
    let base = physical_path.clone();
    let mut attempts = 0;
    loop {
        match plugin.create(physical_path) {
            Ok(fd) => return Ok(fd),
            Err(e) if e.code() == CoreErrorCode::PhysicalPathExists && attempts < retry_limit => {
                attempts += 1;
                let suffix: u32 = rand::random();
                *physical_path = format!("{}.{:08x}", base, suffix);
            }
            Err(e) => return Err(e),
        }
    }
}

fn create_new_replica(
    session: &mut Session,
    request: OpenRequest,
    winner_hier: &str,
    object: Option<LogicalObject>,
    lock_fd: i32,
) -> CoreResult<usize> {
    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();
    let config = session.context.config.clone();
    let plugin: Arc<dyn ResourcePlugin> = registry.plugin_for_hierarchy(winner_hier)?.clone();

    // Fail before any side effect when a sibling excludes writers.
    if let Some(obj) = &object {
        for sibling in obj.replicas() {
            if sibling.replica_status.is_writer() || sibling.replica_status.is_read_locked() {
                return Err(CoreError::new(
                    CoreErrorCode::HierarchyLocked,
                    format!(
                        "replica [{}] of [{}] is busy",
                        sibling.replica_number, request.logical_path
                    ),
                ));
            }
        }
    }

    let (data_id, coll_id, replica_number, owner_name, owner_zone) = match &object {
        Some(obj) => (
            obj.data_id(),
            obj.collection_id(),
            obj.next_replica_number(),
            obj.owner_name().to_string(),
            obj.owner_zone().to_string(),
        ),
        None => {
            let conn = pool.connection().map_err(CoreError::from)?;
            let data_id = conn.backend().next_data_id().map_err(CoreError::from)?;
            let coll_id = conn
                .backend()
                .collection_id(&request.logical_path)
                .map_err(CoreError::from)?;
            (
                data_id,
                coll_id,
                0,
                session.user_name().to_string(),
                config.zone_name.clone(),
            )
        }
    };

    let index = session.descriptors.allocate()?;

    let ts = now_timestamp();
    let mut replica = Replica {
        data_id,
        coll_id,
        logical_path: request.logical_path.clone(),
        replica_number,
        resc_hier: winner_hier.to_string(),
        resc_name: Hierarchy::parse(winner_hier).root().unwrap_or("").to_string(),
        resc_id: plugin.leaf_resource_id(),
        physical_path: plugin.generate_physical_path(&request.logical_path),
        owner_name,
        owner_zone,
        replica_status: ReplicaStatus::Intermediate,
        size: 0,
        create_ts: ts.clone(),
        modify_ts: ts,
        ..Replica::default()
    };

    // Register the intermediate replica before touching storage so the
    // catalog is the arbiter of the path.
    {
        let conn = match pool.connection() {
            Ok(c) => c,
            Err(e) => {
                let _ = session.descriptors.free(index);
                return Err(e.into());
            }
        };
        if let Err(e) = conn.backend().register_replica(&replica) {
            let _ = session.descriptors.free(index);
            return Err(e.into());
        }
    }

    let unregister = |session: &mut Session| {
        if let Ok(conn) = pool.connection() {
            if let Err(e) = conn.backend().unregister_replica(data_id, replica_number) {
                Logger::error(
                    "intermediate_unregister_failed",
                    &[
                        ("path", request.logical_path.as_str()),
                        ("reason", &e.to_string()),
                    ],
                );
            }
        }
        let _ = session.descriptors.free(index);
    };

    let mut physical_fd = 0;
    if !defer_physical_open(&request, config.single_buffer_max_bytes) {
        match create_with_retry(
            plugin.as_ref(),
            &mut replica.physical_path,
            config.vault_path_retry_limit,
        ) {
            Ok(fd) => physical_fd = fd,
            Err(e) => {
                unregister(session);
                return Err(e);
            }
        }
    }

    let lock_object = match object {
        Some(mut obj) => {
            obj.push(replica.clone());
            obj
        }
        None => LogicalObject::from_replicas(vec![replica.clone()])?,
    };
    if let Err(e) = acquire_write_lock(&mut session.state, &pool, &lock_object, replica_number) {
        if physical_fd >= RESERVED_SLOTS as i32 {
            let _ = plugin.close(physical_fd);
            let _ = plugin.unlink(&replica.physical_path);
        }
        unregister(session);
        return Err(e);
    }

    let token = session
        .context
        .access
        .issue(data_id, replica_number, session.pid());

    let (checksum_flag, expected_checksum) = checksum_policy(&request);
    let purge_cache = request.cond_input.contains(keywords::PURGE_CACHE);
    let data_size = request.data_size;

    let slot = session.descriptors.get_mut(index)?;
    slot.operation_kind = request.oper_type.unwrap_or(OperationKind::Create);
    slot.open_type = OpenType::Create;
    slot.replica_number = replica_number;
    slot.resc_hier = replica.resc_hier.clone();
    slot.physical_path = replica.physical_path.clone();
    slot.physical_fd = physical_fd;
    slot.expected_size = data_size;
    slot.checksum_flag = checksum_flag;
    slot.expected_checksum = expected_checksum;
    slot.lock_fd = lock_fd;
    slot.replica_token = token;
    slot.purge_cache = purge_cache;
    slot.request = request;

    Logger::info(
        "replica_created",
        &[
            ("path", slot.request.logical_path.as_str()),
            ("hier", winner_hier),
            ("replica", &replica_number.to_string()),
        ],
    );
    Ok(index)
}

fn open_existing_replica(
    session: &mut Session,
    request: OpenRequest,
    winner_hier: &str,
    operation: Operation,
    overwrite: bool,
    object: LogicalObject,
    lock_fd: i32,
) -> CoreResult<usize> {
    let pool = session.context.catalog.clone();
    let registry = session.context.resources.clone();
    let hooks = session.context.hooks.clone();
    let write = operation == Operation::Write;

    let target_index = if let Some(hint) = request.cond_input.get(keywords::REPL_NUM) {
        let rn: i32 = hint.parse().map_err(|_| {
            CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("replica number is not an integer [{}]", hint),
            )
        })?;
        object.index_of_replica_number(rn).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::ReplicaDoesNotExist,
                format!("no replica [{}] of [{}]", rn, request.logical_path),
            )
        })?
    } else if let Some(index) = object.index_of_hierarchy(winner_hier) {
        index
    } else {
        let root = Hierarchy::parse(winner_hier).root().unwrap_or("").to_string();
        object.index_of_root(&root).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::HierarchyError,
                format!("[{}] hosts no replica of [{}]", root, request.logical_path),
            )
        })?
    };
    let target = object.replicas()[target_index].clone();
    let replica_number = target.replica_number;

    hooks.preprocess_open(&request.logical_path, &target, &request.cond_input)?;

    let plugin: Arc<dyn ResourcePlugin> = registry.plugin_for_hierarchy(&target.resc_hier)?.clone();

    // Arbitrate against the catalog lock state.
    let mut reopen_token: Option<String> = None;
    if write {
        match target.replica_status {
            ReplicaStatus::Intermediate => {
                let token_hint = request
                    .cond_input
                    .get(keywords::REPLICA_TOKEN)
                    .map(str::to_string);
                let authorized = token_hint
                    .as_deref()
                    .and_then(|t| session.context.access.contains(t))
                    .map(|entry| {
                        entry.pid == session.pid()
                            && entry.data_id == target.data_id
                            && entry.replica_number == replica_number
                    })
                    .unwrap_or(false);
                if !authorized {
                    return Err(CoreError::new(
                        CoreErrorCode::HierarchyLocked,
                        format!(
                            "another writer holds replica [{}] of [{}]",
                            replica_number, request.logical_path
                        ),
                    ));
                }
                reopen_token = token_hint;
            }
            ReplicaStatus::WriteLock
            | ReplicaStatus::ReadLockOnGood
            | ReplicaStatus::ReadLockOnStale => {
                return Err(CoreError::new(
                    CoreErrorCode::HierarchyLocked,
                    format!("[{}] is locked", request.logical_path),
                ));
            }
            _ => {}
        }
    } else if target.replica_status.is_writer() {
        return Err(CoreError::new(
            CoreErrorCode::HierarchyLocked,
            format!(
                "replica [{}] of [{}] is not a valid read source",
                replica_number, request.logical_path
            ),
        ));
    }

    let index = session.descriptors.allocate()?;

    let truncate = request.flags.truncate || overwrite;
    let mut physical_fd = 0;
    if !defer_physical_open(&request, session.context.config.single_buffer_max_bytes) {
        match plugin.open(&target.physical_path, write, truncate) {
            Ok(fd) => physical_fd = fd,
            Err(e) => {
                let _ = session.descriptors.free(index);
                return Err(e);
            }
        }
    }

    let close_physical = |plugin: &dyn ResourcePlugin, fd: i32| {
        if fd >= RESERVED_SLOTS as i32 {
            let _ = plugin.close(fd);
        }
    };

    if write {
        let had_entry = session.state.contains(&request.logical_path);
        let unwind = |session: &mut Session, e: CoreError| {
            if !had_entry {
                let _ = session.state.erase(&request.logical_path);
            }
            close_physical(plugin.as_ref(), physical_fd);
            let _ = session.descriptors.free(index);
            e
        };

        // Truncation is staged so the size reaches the catalog in the
        // same payload as the lock transition.
        if truncate {
            session.state.insert(&object);
            if let Err(e) = session
                .state
                .update(&request.logical_path, replica_number, |r| r.size = 0)
            {
                return Err(unwind(session, e));
            }
        }
        if reopen_token.is_none() {
            if let Err(e) = acquire_write_lock(&mut session.state, &pool, &object, replica_number)
            {
                return Err(unwind(session, e));
            }
        } else {
            session.state.insert(&object);
            if truncate {
                if let Err(e) = commit_object_state(&session.state, &pool, &request.logical_path) {
                    return Err(unwind(session, e));
                }
            }
        }
    }

    let token = match reopen_token {
        Some(token) => token,
        None if write => session
            .context
            .access
            .issue(target.data_id, replica_number, session.pid()),
        None => String::new(),
    };

    let (checksum_flag, mut expected_checksum) = checksum_policy(&request);
    if !write && expected_checksum.is_empty() {
        // Transfer sources carry the registered checksum so destination
        // closes can verify against it.
        expected_checksum = target.checksum.clone();
    }
    let purge_cache = request.cond_input.contains(keywords::PURGE_CACHE);
    let data_size = request.data_size;

    let slot = session.descriptors.get_mut(index)?;
    slot.operation_kind = request.oper_type.unwrap_or(if write {
        OperationKind::OpenWrite
    } else {
        OperationKind::OpenRead
    });
    slot.open_type = if write {
        OpenType::ForWrite
    } else {
        OpenType::ForRead
    };
    slot.replica_number = replica_number;
    slot.resc_hier = target.resc_hier.clone();
    slot.physical_path = target.physical_path.clone();
    slot.physical_fd = physical_fd;
    slot.expected_size = if write { data_size } else { target.size };
    slot.checksum_flag = checksum_flag;
    slot.expected_checksum = expected_checksum;
    slot.lock_fd = lock_fd;
    slot.replica_token = token;
    slot.purge_cache = purge_cache;
    slot.request = request;

    Logger::info(
        "replica_opened",
        &[
            ("path", slot.request.logical_path.as_str()),
            ("replica", &replica_number.to_string()),
            ("write", if write { "true" } else { "false" }),
        ],
    );
    Ok(index)
}
