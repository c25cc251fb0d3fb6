//! Logical-locking invariants across concurrent agents
//!
//! - At most one replica of an object is intermediate or write-locked
//!   as the writer
//! - While a writer exists, every sibling is write-locked
//! - Tokens in the access table reference intermediate replicas
//! - A crashed agent leaves the lock for the sweeper, not a torn commit

use std::sync::Arc;

use gridvault::catalog::{CatalogBackend, CatalogPool, MemoryCatalog};
use gridvault::config::CoreConfig;
use gridvault::descriptor::{OpenFlags, OpenRequest};
use gridvault::error::CoreErrorCode;
use gridvault::object::{self, CloseInput};
use gridvault::replica::{keywords, CondInput, ReplicaStatus};
use gridvault::resource::{FilesystemResource, ResourceRegistry};
use gridvault::session::{Session, SessionContext};
use tempfile::TempDir;

fn grid(temp: &TempDir) -> (Arc<MemoryCatalog>, SessionContext) {
    let catalog = Arc::new(MemoryCatalog::new());
    let pool = CatalogPool::new(catalog.clone(), 4);
    let mut registry = ResourceRegistry::new();
    registry.insert(Arc::new(FilesystemResource::new(
        "rescA",
        100,
        temp.path().join("a"),
    )));
    registry.insert(Arc::new(FilesystemResource::new(
        "rescB",
        200,
        temp.path().join("b"),
    )));
    let context = SessionContext::new(CoreConfig::default(), pool, registry);
    (catalog, context)
}

fn seed_two_replicas(session: &mut Session, path: &str) {
    object::put(session, path, b"testing", CondInput::new()).unwrap();
    object::replicate(session, path, "rescB", CondInput::new()).unwrap();
}

#[test]
fn test_write_open_locks_target_and_siblings() {
    let temp = TempDir::new().unwrap();
    let (catalog, context) = grid(&temp);
    let mut session = Session::new(context, 200).with_user("alice");
    let path = "/tempZone/home/alice/x";
    seed_two_replicas(&mut session, path);

    let index = object::open(&mut session, OpenRequest::new(path, OpenFlags::write())).unwrap();

    let rows = catalog.object_rows(path).unwrap();
    let intermediates: Vec<_> = rows
        .iter()
        .filter(|r| r.replica_status == ReplicaStatus::Intermediate)
        .collect();
    assert_eq!(intermediates.len(), 1);
    for sibling in rows
        .iter()
        .filter(|r| r.replica_number != intermediates[0].replica_number)
    {
        assert_eq!(sibling.replica_status, ReplicaStatus::WriteLock);
    }

    object::close(&mut session, index, &CloseInput::default()).unwrap();
}

/// A second writer observes the committed lock and fails fast; the lock
/// state is untouched.
#[test]
fn test_second_writer_fails_fast_while_locked() {
    let temp = TempDir::new().unwrap();
    let (catalog, context) = grid(&temp);
    let mut writer = Session::new(context.clone(), 201).with_user("alice");
    let path = "/tempZone/home/alice/x";
    seed_two_replicas(&mut writer, path);

    let held = object::open(&mut writer, OpenRequest::new(path, OpenFlags::write())).unwrap();

    let mut second = Session::new(context, 202).with_user("bob");
    let err = object::open(&mut second, OpenRequest::new(path, OpenFlags::write())).unwrap_err();
    assert_eq!(err.code(), CoreErrorCode::HierarchyLocked);

    let rows = catalog.object_rows(path).unwrap();
    assert!(rows
        .iter()
        .any(|r| r.replica_status == ReplicaStatus::Intermediate));
    assert!(rows
        .iter()
        .any(|r| r.replica_status == ReplicaStatus::WriteLock));

    object::close(&mut writer, held, &CloseInput::default()).unwrap();
}

/// A concurrent create of a sibling replica is also refused.
#[test]
fn test_create_on_other_root_fails_while_locked() {
    let temp = TempDir::new().unwrap();
    let (_, context) = grid(&temp);
    let mut writer = Session::new(context.clone(), 203).with_user("alice");
    let path = "/tempZone/home/alice/x";
    object::put(&mut writer, path, b"testing", CondInput::new()).unwrap();

    let held = object::open(&mut writer, OpenRequest::new(path, OpenFlags::write())).unwrap();

    let mut second = Session::new(context, 204).with_user("bob");
    let mut cond = CondInput::new();
    cond.set(keywords::DEST_RESC_NAME, "rescB");
    let err = object::open(
        &mut second,
        OpenRequest::new(path, OpenFlags::create()).with_cond_input(cond),
    )
    .unwrap_err();
    assert_eq!(err.code(), CoreErrorCode::HierarchyLocked);

    object::close(&mut writer, held, &CloseInput::default()).unwrap();
}

/// Readers are not blocked by the writer; they see the pre-write
/// content from a good sibling... and never the intermediate replica.
#[test]
fn test_reader_never_sees_intermediate_replica() {
    let temp = TempDir::new().unwrap();
    let (_, context) = grid(&temp);
    let mut session = Session::new(context.clone(), 205).with_user("alice");
    let path = "/tempZone/home/alice/x";
    object::put(&mut session, path, b"testing", CondInput::new()).unwrap();

    let held = object::open(&mut session, OpenRequest::new(path, OpenFlags::write())).unwrap();
    object::write(&mut session, held, b"partial").unwrap();

    // The only replica is intermediate: no valid read source.
    let mut reader = Session::new(context, 206).with_user("bob");
    let err = object::open(&mut reader, OpenRequest::new(path, OpenFlags::read())).unwrap_err();
    assert!(matches!(
        err.code(),
        CoreErrorCode::HierarchyError | CoreErrorCode::HierarchyLocked
    ));

    object::close(&mut session, held, &CloseInput::default()).unwrap();
}

/// Every token in the access table references an intermediate replica.
#[test]
fn test_tokens_reference_intermediate_replicas() {
    let temp = TempDir::new().unwrap();
    let (catalog, context) = grid(&temp);
    let mut session = Session::new(context, 207).with_user("alice");
    let path = "/tempZone/home/alice/x";
    seed_two_replicas(&mut session, path);

    assert!(session.access().is_empty());

    let index = object::open(&mut session, OpenRequest::new(path, OpenFlags::write())).unwrap();
    assert_eq!(session.access().len(), 1);

    let token = session.descriptors().get(index).unwrap().replica_token.clone();
    let entry = session.access().contains(&token).unwrap();
    let rows = catalog.object_rows(path).unwrap();
    let referenced = rows
        .iter()
        .find(|r| r.data_id == entry.data_id && r.replica_number == entry.replica_number)
        .unwrap();
    assert_eq!(referenced.replica_status, ReplicaStatus::Intermediate);

    object::close(&mut session, index, &CloseInput::default()).unwrap();
    assert!(session.access().is_empty());
}

/// The token authorizes a reopen of the intermediate replica within the
/// session; without it the open is refused.
#[test]
fn test_token_authorizes_reopen_of_intermediate() {
    let temp = TempDir::new().unwrap();
    let (_, context) = grid(&temp);
    let mut session = Session::new(context, 208).with_user("alice");
    let path = "/tempZone/home/alice/x";
    object::put(&mut session, path, b"testing", CondInput::new()).unwrap();

    let first = object::open(&mut session, OpenRequest::new(path, OpenFlags::write())).unwrap();
    let token = session.descriptors().get(first).unwrap().replica_token.clone();

    // Without the token the replica is locked.
    let err = object::open(&mut session, OpenRequest::new(path, OpenFlags::write())).unwrap_err();
    assert_eq!(err.code(), CoreErrorCode::HierarchyLocked);

    // With it the same agent may open the replica again.
    let mut cond = CondInput::new();
    cond.set(keywords::REPLICA_TOKEN, token);
    let second = object::open(
        &mut session,
        OpenRequest::new(path, OpenFlags::write()).with_cond_input(cond),
    )
    .unwrap();
    assert_ne!(first, second);

    object::close(&mut session, second, &CloseInput::default()).unwrap();
    object::close(&mut session, first, &CloseInput::default()).unwrap();
}

/// Agent crash mid-write: the intermediate lock survives for the
/// sweeper, the catalog holds no partial update, and the pid's access
/// entries are gone.
#[test]
fn test_agent_crash_leaves_lock_for_sweeper() {
    let temp = TempDir::new().unwrap();
    let (catalog, context) = grid(&temp);
    let path = "/tempZone/home/alice/x";

    {
        let mut doomed = Session::new(context.clone(), 209).with_user("alice");
        seed_two_replicas(&mut doomed, path);
        let index =
            object::open(&mut doomed, OpenRequest::new(path, OpenFlags::write())).unwrap();
        object::write(&mut doomed, index, b"torn").unwrap();
        doomed.teardown();
    }

    let rows = catalog.object_rows(path).unwrap();
    let target = rows
        .iter()
        .find(|r| r.replica_status == ReplicaStatus::Intermediate)
        .unwrap();
    // The committed lock state is intact; size was never updated.
    assert_eq!(target.size, 7);
    assert!(rows
        .iter()
        .filter(|r| r.replica_number != target.replica_number)
        .all(|r| r.replica_status == ReplicaStatus::WriteLock));

    let survivor = Session::new(context, 209);
    assert!(survivor.access().is_empty());
}

/// Advisory lock requests at open conflict like file locks.
#[test]
fn test_lock_type_keyword_excludes_other_openers() {
    let temp = TempDir::new().unwrap();
    let (_, context) = grid(&temp);
    let mut session = Session::new(context.clone(), 210).with_user("alice");
    let path = "/tempZone/home/alice/x";
    object::put(&mut session, path, b"testing", CondInput::new()).unwrap();

    let mut cond = CondInput::new();
    cond.set(keywords::LOCK_TYPE, "write");
    let held = object::open(
        &mut session,
        OpenRequest::new(path, OpenFlags::read()).with_cond_input(cond),
    )
    .unwrap();

    let mut other = Session::new(context, 211).with_user("bob");
    let mut cond = CondInput::new();
    cond.set(keywords::LOCK_TYPE, "read");
    let err = object::open(
        &mut other,
        OpenRequest::new(path, OpenFlags::read()).with_cond_input(cond),
    )
    .unwrap_err();
    assert_eq!(err.code(), CoreErrorCode::AdvisoryLockConflict);

    // Close releases the advisory lock.
    object::close(&mut session, held, &CloseInput::default()).unwrap();
    let mut cond = CondInput::new();
    cond.set(keywords::LOCK_TYPE, "read");
    let reopened = object::open(
        &mut other,
        OpenRequest::new(path, OpenFlags::read()).with_cond_input(cond),
    )
    .unwrap();
    object::close(&mut other, reopened, &CloseInput::default()).unwrap();
}
