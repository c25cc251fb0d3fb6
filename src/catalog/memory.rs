//! In-memory catalog backend
//!
//! Reference implementation of the catalog seam. Rows live in a map
//! keyed by `(data_id, resc_id)`, the same key the finalize executor
//! updates by. A SQL-backed implementation replaces this type without
//! touching the executor.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::errors::{CatalogError, CatalogResult};
use super::{CatalogBackend, CatalogTransaction, SpecialCollection};
use crate::replica::{CondInput, Replica};

const FIRST_DATA_ID: i64 = 10_000;
const FIRST_COLL_ID: i64 = 500;

#[derive(Debug, Default)]
struct Inner {
    /// (data_id, resc_id) -> replica row
    rows: BTreeMap<(i64, i64), Replica>,
    /// logical path -> data_id
    path_index: BTreeMap<String, i64>,
    /// collection path -> coll_id
    collections: BTreeMap<String, i64>,
    special: BTreeMap<String, SpecialCollection>,
    next_data_id: i64,
    next_coll_id: i64,
}

/// The in-memory catalog.
#[derive(Debug)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_data_id: FIRST_DATA_ID,
                next_coll_id: FIRST_COLL_ID,
                ..Inner::default()
            }),
        }
    }

    /// Register a mount/link collection. Test and bootstrap surface; not
    /// part of the backend trait.
    pub fn register_special_collection(&self, collection: SpecialCollection) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .special
            .insert(collection.logical_path.clone(), collection);
    }

    /// The stored row for `(data_id, resc_id)`, for assertions.
    pub fn row(&self, data_id: i64, resc_id: i64) -> Option<Replica> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .get(&(data_id, resc_id))
            .cloned()
    }

    /// New row contents for an updated key, carrying the stored logical
    /// path forward. The `after` image from a finalize payload only
    /// holds the object name in its path field.
    fn merge_columns(existing: &Replica, after: &Replica) -> Replica {
        let logical_path = if after.logical_path.contains('/') {
            after.logical_path.clone()
        } else if let Some(slash) = existing.logical_path.rfind('/') {
            format!("{}/{}", &existing.logical_path[..slash], after.logical_path)
        } else {
            after.logical_path.clone()
        };
        Replica {
            logical_path,
            cond_input: CondInput::new(),
            ..after.clone()
        }
    }
}

impl CatalogBackend for MemoryCatalog {
    fn next_data_id(&self) -> CatalogResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_data_id;
        inner.next_data_id += 1;
        Ok(id)
    }

    fn collection_id(&self, logical_path: &str) -> CatalogResult<i64> {
        let parent = logical_path
            .rfind('/')
            .map(|i| &logical_path[..i])
            .unwrap_or("")
            .to_string();
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.collections.get(&parent) {
            return Ok(*id);
        }
        let id = inner.next_coll_id;
        inner.next_coll_id += 1;
        inner.collections.insert(parent, id);
        Ok(id)
    }

    fn object_rows(&self, logical_path: &str) -> CatalogResult<Vec<Replica>> {
        let inner = self.inner.lock().unwrap();
        let Some(data_id) = inner.path_index.get(logical_path) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Replica> = inner
            .rows
            .values()
            .filter(|r| r.data_id == *data_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.replica_number);
        Ok(rows)
    }

    fn register_replica(&self, replica: &Replica) -> CatalogResult<()> {
        let mut inner = self.inner.lock().unwrap();

        let key = (replica.data_id, replica.resc_id);
        if inner.rows.contains_key(&key) {
            return Err(CatalogError::AlreadyPresent(format!(
                "data_id={} resc_id={}",
                key.0, key.1
            )));
        }
        if inner
            .rows
            .values()
            .any(|r| r.data_id == replica.data_id && r.replica_number == replica.replica_number)
        {
            return Err(CatalogError::AlreadyPresent(format!(
                "data_id={} repl_num={}",
                replica.data_id, replica.replica_number
            )));
        }
        if let Some(existing) = inner.path_index.get(&replica.logical_path) {
            if *existing != replica.data_id {
                return Err(CatalogError::AlreadyPresent(format!(
                    "path [{}] registered under data_id={}",
                    replica.logical_path, existing
                )));
            }
        }

        inner
            .path_index
            .insert(replica.logical_path.clone(), replica.data_id);
        let mut row = replica.clone();
        row.cond_input = CondInput::new();
        inner.rows.insert(key, row);
        Ok(())
    }

    fn unregister_replica(&self, data_id: i64, replica_number: i32) -> CatalogResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .rows
            .iter()
            .find(|(_, r)| r.data_id == data_id && r.replica_number == replica_number)
            .map(|(k, _)| *k)
            .ok_or_else(|| {
                CatalogError::NoRowsFound(format!(
                    "data_id={} repl_num={}",
                    data_id, replica_number
                ))
            })?;
        let removed = inner.rows.remove(&key).ok_or_else(|| {
            CatalogError::NoRowsFound(format!("data_id={} repl_num={}", data_id, replica_number))
        })?;
        if !inner.rows.values().any(|r| r.data_id == data_id) {
            inner.path_index.remove(&removed.logical_path);
        }
        Ok(())
    }

    fn special_collection(&self, logical_path: &str) -> CatalogResult<Option<SpecialCollection>> {
        let inner = self.inner.lock().unwrap();
        for (mount, collection) in inner.special.iter() {
            if logical_path == mount || logical_path.starts_with(&format!("{}/", mount)) {
                return Ok(Some(collection.clone()));
            }
        }
        Ok(None)
    }

    fn begin(&self) -> CatalogResult<Box<dyn CatalogTransaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            catalog: self,
            staged: Vec::new(),
        }))
    }
}

/// Staged updates against a [`MemoryCatalog`]. Nothing is visible until
/// `commit`.
struct MemoryTransaction<'a> {
    catalog: &'a MemoryCatalog,
    staged: Vec<((i64, i64), Replica)>,
}

impl CatalogTransaction for MemoryTransaction<'_> {
    fn update_replica(
        &mut self,
        data_id: i64,
        resc_id_before: i64,
        after: &Replica,
    ) -> CatalogResult<()> {
        let inner = self.catalog.inner.lock().unwrap();
        let key = (data_id, resc_id_before);
        if !inner.rows.contains_key(&key) {
            return Err(CatalogError::NoRowsFound(format!(
                "data_id={} resc_id={}",
                data_id, resc_id_before
            )));
        }
        let new_key = (data_id, after.resc_id);
        if new_key != key
            && (inner.rows.contains_key(&new_key)
                || self
                    .staged
                    .iter()
                    .any(|(_, r)| (r.data_id, r.resc_id) == new_key))
        {
            return Err(CatalogError::AlreadyPresent(format!(
                "data_id={} resc_id={}",
                new_key.0, new_key.1
            )));
        }
        self.staged.push((key, after.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> CatalogResult<()> {
        let mut inner = self.catalog.inner.lock().unwrap();
        for (key, after) in self.staged {
            let existing = inner.rows.remove(&key).ok_or_else(|| {
                CatalogError::NoRowsFound(format!("data_id={} resc_id={}", key.0, key.1))
            })?;
            let row = MemoryCatalog::merge_columns(&existing, &after);
            inner.rows.insert((row.data_id, row.resc_id), row);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> CatalogResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::ReplicaStatus;

    fn replica(data_id: i64, rn: i32, resc_id: i64, path: &str) -> Replica {
        Replica {
            data_id,
            coll_id: 1,
            logical_path: path.to_string(),
            replica_number: rn,
            resc_id,
            resc_hier: format!("resc{}", resc_id),
            resc_name: format!("resc{}", resc_id),
            replica_status: ReplicaStatus::Good,
            ..Replica::default()
        }
    }

    #[test]
    fn test_register_and_fetch_rows() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();
        catalog
            .register_replica(&replica(1, 1, 200, "/z/a"))
            .unwrap();

        let rows = catalog.object_rows("/z/a").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].replica_number, 0);
        assert_eq!(rows[1].replica_number, 1);
        assert!(catalog.object_rows("/z/missing").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();
        let err = catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::AlreadyPresent(_)));
    }

    #[test]
    fn test_unregister_last_replica_removes_object() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();
        catalog.unregister_replica(1, 0).unwrap();
        assert!(catalog.object_rows("/z/a").unwrap().is_empty());
        assert!(matches!(
            catalog.unregister_replica(1, 0).unwrap_err(),
            CatalogError::NoRowsFound(_)
        ));
    }

    #[test]
    fn test_transaction_stages_until_commit() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();

        let mut after = replica(1, 0, 100, "/z/a");
        after.size = 42;
        after.replica_status = ReplicaStatus::Stale;

        let mut txn = catalog.begin().unwrap();
        txn.update_replica(1, 100, &after).unwrap();
        assert_eq!(catalog.row(1, 100).unwrap().size, 0);
        txn.commit().unwrap();

        let row = catalog.row(1, 100).unwrap();
        assert_eq!(row.size, 42);
        assert_eq!(row.replica_status, ReplicaStatus::Stale);
    }

    #[test]
    fn test_update_missing_row_is_no_rows_found() {
        let catalog = MemoryCatalog::new();
        let mut txn = catalog.begin().unwrap();
        let err = txn.update_replica(1, 100, &replica(1, 0, 100, "/z/a")).unwrap_err();
        assert!(matches!(err, CatalogError::NoRowsFound(_)));
    }

    #[test]
    fn test_rollback_discards_updates() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();
        let mut after = replica(1, 0, 100, "/z/a");
        after.size = 99;

        let mut txn = catalog.begin().unwrap();
        txn.update_replica(1, 100, &after).unwrap();
        txn.rollback().unwrap();
        assert_eq!(catalog.row(1, 100).unwrap().size, 0);
    }

    #[test]
    fn test_update_can_move_row_to_new_resource() {
        let catalog = MemoryCatalog::new();
        catalog
            .register_replica(&replica(1, 0, 100, "/z/a"))
            .unwrap();

        let mut after = replica(1, 0, 300, "/z/a");
        after.resc_hier = "resc300".to_string();

        let mut txn = catalog.begin().unwrap();
        txn.update_replica(1, 100, &after).unwrap();
        txn.commit().unwrap();

        assert!(catalog.row(1, 100).is_none());
        assert_eq!(catalog.row(1, 300).unwrap().resc_hier, "resc300");
    }

    #[test]
    fn test_special_collection_prefix_match() {
        let catalog = MemoryCatalog::new();
        catalog.register_special_collection(SpecialCollection {
            logical_path: "/z/mounts/archive".to_string(),
            resc_hier: "mountResc".to_string(),
        });
        let hit = catalog
            .special_collection("/z/mounts/archive/file")
            .unwrap()
            .unwrap();
        assert_eq!(hit.resc_hier, "mountResc");
        assert!(catalog
            .special_collection("/z/mounts/archival")
            .unwrap()
            .is_none());
    }
}
