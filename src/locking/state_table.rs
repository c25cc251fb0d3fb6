//! The replica state table
//!
//! Per-session staging area keyed by logical path. Each entry snapshots
//! every replica of an object at open as identical before/after images;
//! mutations in the open-write-close window touch only `after`. At
//! finalize the diff becomes the catalog update; on teardown the entry
//! is erased.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::replica::{LogicalObject, Replica};

/// Before/after images of one replica.
#[derive(Debug, Clone)]
pub struct ReplicaStates {
    pub before: Replica,
    pub after: Replica,
}

/// All staged replicas of one object.
#[derive(Debug, Clone)]
pub struct ReplicaStateEntry {
    pub data_id: i64,
    pub logical_path: String,
    pub replicas: Vec<ReplicaStates>,
}

impl ReplicaStateEntry {
    pub fn index_of_replica_number(&self, replica_number: i32) -> Option<usize> {
        self.replicas
            .iter()
            .position(|r| r.before.replica_number == replica_number)
    }

    pub fn index_of_leaf_resource(&self, leaf: &str) -> Option<usize> {
        self.replicas
            .iter()
            .position(|r| r.before.leaf_resource() == leaf)
    }

    /// Finalize payload for the whole object.
    pub fn to_payload(&self) -> Value {
        let replicas: Vec<Value> = self
            .replicas
            .iter()
            .map(|r| json!({ "before": r.before.to_json(), "after": r.after.to_json() }))
            .collect();
        json!({
            "data_id": self.data_id.to_string(),
            "replicas": replicas,
        })
    }
}

/// Session-scoped map of open objects to their staged states.
#[derive(Debug, Default)]
pub struct ReplicaStateTable {
    entries: BTreeMap<String, ReplicaStateEntry>,
}

impl ReplicaStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every replica of the object. A second insert for the
    /// same path is a no-op; the first snapshot stays authoritative.
    pub fn insert(&mut self, object: &LogicalObject) {
        let path = object.logical_path().to_string();
        if self.entries.contains_key(&path) {
            return;
        }
        let replicas = object
            .replicas()
            .iter()
            .map(|r| ReplicaStates {
                before: r.clone(),
                after: r.clone(),
            })
            .collect();
        self.entries.insert(
            path.clone(),
            ReplicaStateEntry {
                data_id: object.data_id(),
                logical_path: path,
                replicas,
            },
        );
    }

    pub fn contains(&self, logical_path: &str) -> bool {
        self.entries.contains_key(logical_path)
    }

    pub fn entry(&self, logical_path: &str) -> Option<&ReplicaStateEntry> {
        self.entries.get(logical_path)
    }

    pub fn erase(&mut self, logical_path: &str) -> CoreResult<()> {
        self.entries.remove(logical_path).map(|_| ()).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("no state table entry for [{}]", logical_path),
            )
        })
    }

    /// Erase everything; agent teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, logical_path: &str) -> CoreResult<&mut ReplicaStateEntry> {
        self.entries.get_mut(logical_path).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("no state table entry for [{}]", logical_path),
            )
        })
    }

    /// Mutate the `after` image of one replica, addressed by the replica
    /// number in its `before` image.
    pub fn update<F>(&mut self, logical_path: &str, replica_number: i32, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut Replica),
    {
        let entry = self.entry_mut(logical_path)?;
        let index = entry.index_of_replica_number(replica_number).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::ReplicaDoesNotExist,
                format!(
                    "no staged replica [{}] of [{}]",
                    replica_number, logical_path
                ),
            )
        })?;
        f(&mut entry.replicas[index].after);
        Ok(())
    }

    /// Mutate the `after` image of one replica, addressed by the leaf
    /// resource in its `before` image.
    pub fn update_by_leaf<F>(&mut self, logical_path: &str, leaf: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut Replica),
    {
        let entry = self.entry_mut(logical_path)?;
        let index = entry.index_of_leaf_resource(leaf).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::ReplicaDoesNotExist,
                format!("no staged replica on leaf [{}] of [{}]", leaf, logical_path),
            )
        })?;
        f(&mut entry.replicas[index].after);
        Ok(())
    }

    pub fn before(&self, logical_path: &str, replica_number: i32) -> Option<&Replica> {
        let entry = self.entries.get(logical_path)?;
        let index = entry.index_of_replica_number(replica_number)?;
        Some(&entry.replicas[index].before)
    }

    pub fn after(&self, logical_path: &str, replica_number: i32) -> Option<&Replica> {
        let entry = self.entries.get(logical_path)?;
        let index = entry.index_of_replica_number(replica_number)?;
        Some(&entry.replicas[index].after)
    }

    /// Finalize payload for the object at `logical_path`.
    pub fn finalize_payload(&self, logical_path: &str) -> CoreResult<Value> {
        self.entries
            .get(logical_path)
            .map(ReplicaStateEntry::to_payload)
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    format!("no state table entry for [{}]", logical_path),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::ReplicaStatus;

    fn object() -> LogicalObject {
        let base = Replica {
            data_id: 5,
            coll_id: 2,
            logical_path: "/z/home/u/f".to_string(),
            owner_name: "u".to_string(),
            owner_zone: "z".to_string(),
            replica_status: ReplicaStatus::Good,
            ..Replica::default()
        };
        let mut first = base.clone();
        first.replica_number = 0;
        first.resc_hier = "rescA;leafA".to_string();
        first.resc_id = 100;
        let mut second = base;
        second.replica_number = 1;
        second.resc_hier = "rescB;leafB".to_string();
        second.resc_id = 200;
        LogicalObject::from_replicas(vec![first, second]).unwrap()
    }

    #[test]
    fn test_insert_snapshots_before_and_after() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        let entry = table.entry("/z/home/u/f").unwrap();
        assert_eq!(entry.data_id, 5);
        assert_eq!(entry.replicas.len(), 2);
        for r in &entry.replicas {
            assert_eq!(r.before, r.after);
        }
    }

    #[test]
    fn test_second_insert_is_noop() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        table
            .update("/z/home/u/f", 0, |r| r.size = 99)
            .unwrap();
        table.insert(&object());
        assert_eq!(table.after("/z/home/u/f", 0).unwrap().size, 99);
    }

    #[test]
    fn test_update_touches_only_after() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        table
            .update("/z/home/u/f", 1, |r| {
                r.replica_status = ReplicaStatus::WriteLock;
            })
            .unwrap();
        assert_eq!(
            table.before("/z/home/u/f", 1).unwrap().replica_status,
            ReplicaStatus::Good
        );
        assert_eq!(
            table.after("/z/home/u/f", 1).unwrap().replica_status,
            ReplicaStatus::WriteLock
        );
    }

    #[test]
    fn test_update_by_leaf_resource() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        table
            .update_by_leaf("/z/home/u/f", "leafB", |r| r.size = 7)
            .unwrap();
        assert_eq!(table.after("/z/home/u/f", 1).unwrap().size, 7);
    }

    #[test]
    fn test_missing_replica_is_an_error() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        let err = table.update("/z/home/u/f", 9, |_| {}).unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::ReplicaDoesNotExist);
    }

    #[test]
    fn test_erase_missing_entry_is_an_error() {
        let mut table = ReplicaStateTable::new();
        assert!(table.erase("/z/none").is_err());
        table.insert(&object());
        assert!(table.erase("/z/home/u/f").is_ok());
        assert!(!table.contains("/z/home/u/f"));
    }

    #[test]
    fn test_payload_reflects_staged_divergence() {
        let mut table = ReplicaStateTable::new();
        table.insert(&object());
        table
            .update("/z/home/u/f", 0, |r| {
                r.replica_status = ReplicaStatus::Intermediate;
            })
            .unwrap();
        let payload = table.finalize_payload("/z/home/u/f").unwrap();
        assert_eq!(payload["data_id"], "5");
        let first = &payload["replicas"][0];
        assert_eq!(first["before"]["data_is_dirty"], "1");
        assert_eq!(first["after"]["data_is_dirty"], "2");
    }
}
