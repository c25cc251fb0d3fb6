//! The logical object: one path, many replicas
//!
//! Owns its replicas as a contiguous sequence and hands out indices.
//! Object-level mutators propagate the shared fields to every replica so
//! the sharing invariant cannot drift.

use serde_json::{json, Value};

use super::record::Replica;
use super::status::ReplicaStatus;
use crate::error::{CoreError, CoreErrorCode, CoreResult};

/// A path-addressable record with one or more physical copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalObject {
    replicas: Vec<Replica>,
}

impl LogicalObject {
    /// Build an object from catalog rows. All rows must agree on the
    /// object-level fields.
    pub fn from_replicas(replicas: Vec<Replica>) -> CoreResult<Self> {
        if let Some(first) = replicas.first() {
            for r in &replicas[1..] {
                if r.data_id != first.data_id
                    || r.coll_id != first.coll_id
                    || r.logical_path != first.logical_path
                    || r.owner_name != first.owner_name
                    || r.owner_zone != first.owner_zone
                {
                    return Err(CoreError::new(
                        CoreErrorCode::InvalidInputParam,
                        format!(
                            "replicas of [{}] disagree on object-level fields",
                            first.logical_path
                        ),
                    ));
                }
            }
        }
        Ok(Self { replicas })
    }

    pub fn data_id(&self) -> i64 {
        self.replicas.first().map(|r| r.data_id).unwrap_or(0)
    }

    pub fn collection_id(&self) -> i64 {
        self.replicas.first().map(|r| r.coll_id).unwrap_or(0)
    }

    pub fn logical_path(&self) -> &str {
        self.replicas
            .first()
            .map(|r| r.logical_path.as_str())
            .unwrap_or("")
    }

    pub fn owner_name(&self) -> &str {
        self.replicas
            .first()
            .map(|r| r.owner_name.as_str())
            .unwrap_or("")
    }

    pub fn owner_zone(&self) -> &str {
        self.replicas
            .first()
            .map(|r| r.owner_zone.as_str())
            .unwrap_or("")
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn replicas_mut(&mut self) -> &mut [Replica] {
        &mut self.replicas
    }

    pub fn push(&mut self, replica: Replica) {
        self.replicas.push(replica);
    }

    /// Index of the replica with the given replica number.
    pub fn index_of_replica_number(&self, replica_number: i32) -> Option<usize> {
        self.replicas
            .iter()
            .position(|r| r.replica_number == replica_number)
    }

    /// Index of the replica whose hierarchy matches exactly.
    pub fn index_of_hierarchy(&self, resc_hier: &str) -> Option<usize> {
        self.replicas.iter().position(|r| r.resc_hier == resc_hier)
    }

    /// Index of the replica rooted at the given resource.
    pub fn index_of_root(&self, root: &str) -> Option<usize> {
        self.replicas.iter().position(|r| r.root_resource() == root)
    }

    /// The next free replica number for a new copy.
    pub fn next_replica_number(&self) -> i32 {
        self.replicas
            .iter()
            .map(|r| r.replica_number)
            .max()
            .map(|n| n + 1)
            .unwrap_or(0)
    }

    /// Whether any replica currently excludes writers.
    pub fn has_writer(&self) -> bool {
        self.replicas
            .iter()
            .any(|r| r.replica_status == ReplicaStatus::Intermediate)
    }

    // Object-level mutators. Each propagates to every replica.

    pub fn set_data_id(&mut self, data_id: i64) {
        for r in &mut self.replicas {
            r.data_id = data_id;
        }
    }

    pub fn set_collection_id(&mut self, coll_id: i64) {
        for r in &mut self.replicas {
            r.coll_id = coll_id;
        }
    }

    pub fn set_logical_path(&mut self, logical_path: &str) {
        for r in &mut self.replicas {
            r.logical_path = logical_path.to_string();
        }
    }

    pub fn set_owner(&mut self, name: &str, zone: &str) {
        for r in &mut self.replicas {
            r.owner_name = name.to_string();
            r.owner_zone = zone.to_string();
        }
    }

    /// Whole-object finalize payload with identical before and after
    /// images. Diverged images come from the replica state table, which
    /// snapshots `before` at open.
    pub fn to_finalize_payload(&self) -> Value {
        let replicas: Vec<Value> = self
            .replicas
            .iter()
            .map(|r| {
                let image = r.to_json();
                json!({ "before": image, "after": image })
            })
            .collect();
        json!({
            "data_id": self.data_id().to_string(),
            "replicas": replicas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(rn: i32, root: &str, status: ReplicaStatus) -> Replica {
        Replica {
            data_id: 7,
            coll_id: 3,
            logical_path: "/zone/home/user/obj".to_string(),
            replica_number: rn,
            resc_hier: format!("{};leaf{}", root, rn),
            resc_id: 100 + i64::from(rn),
            owner_name: "user".to_string(),
            owner_zone: "zone".to_string(),
            replica_status: status,
            ..Replica::default()
        }
    }

    fn object() -> LogicalObject {
        LogicalObject::from_replicas(vec![
            replica(0, "rescA", ReplicaStatus::Good),
            replica(1, "rescB", ReplicaStatus::Stale),
        ])
        .unwrap()
    }

    #[test]
    fn test_shared_field_invariant_enforced() {
        let mut second = replica(1, "rescB", ReplicaStatus::Good);
        second.owner_name = "mallory".to_string();
        let result =
            LogicalObject::from_replicas(vec![replica(0, "rescA", ReplicaStatus::Good), second]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_by_number_root_and_hierarchy() {
        let obj = object();
        assert_eq!(obj.index_of_replica_number(1), Some(1));
        assert_eq!(obj.index_of_root("rescA"), Some(0));
        assert_eq!(obj.index_of_hierarchy("rescB;leaf1"), Some(1));
        assert_eq!(obj.index_of_root("rescC"), None);
    }

    #[test]
    fn test_object_mutators_propagate() {
        let mut obj = object();
        obj.set_data_id(99);
        obj.set_logical_path("/zone/home/user/renamed");
        obj.set_owner("bob", "otherZone");
        for r in obj.replicas() {
            assert_eq!(r.data_id, 99);
            assert_eq!(r.logical_path, "/zone/home/user/renamed");
            assert_eq!(r.owner_name, "bob");
            assert_eq!(r.owner_zone, "otherZone");
        }
    }

    #[test]
    fn test_next_replica_number() {
        assert_eq!(object().next_replica_number(), 2);
        assert_eq!(LogicalObject::default().next_replica_number(), 0);
    }

    #[test]
    fn test_finalize_payload_shape() {
        let payload = object().to_finalize_payload();
        assert_eq!(payload["data_id"], "7");
        let replicas = payload["replicas"].as_array().unwrap();
        assert_eq!(replicas.len(), 2);
        for entry in replicas {
            assert_eq!(entry["before"], entry["after"]);
        }
    }

    #[test]
    fn test_has_writer() {
        let mut obj = object();
        assert!(!obj.has_writer());
        obj.replicas_mut()[0].replica_status = ReplicaStatus::Intermediate;
        assert!(obj.has_writer());
    }
}
