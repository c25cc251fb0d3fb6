//! Catalog seam
//!
//! The catalog is the only truly-shared resource in the system. All
//! consistency-critical updates go through [`executor::finalize_data_object`]
//! inside one transaction; reads and registrations go through
//! [`CatalogBackend`] directly.

pub mod errors;
pub mod executor;
mod memory;
mod pool;

pub use errors::{CatalogError, CatalogResult};
pub use memory::MemoryCatalog;
pub use pool::{CatalogConnection, CatalogPool};

use crate::replica::Replica;

/// A mount or link collection whose hierarchy is fixed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialCollection {
    pub logical_path: String,
    pub resc_hier: String,
}

/// Read/registration surface of the catalog.
pub trait CatalogBackend: Send + Sync + std::fmt::Debug {
    /// Mint the id for a new data object.
    fn next_data_id(&self) -> CatalogResult<i64>;

    /// Id of the collection containing `logical_path`, minting one for a
    /// collection the catalog has not seen.
    fn collection_id(&self, logical_path: &str) -> CatalogResult<i64>;

    /// All replica rows of the object at `logical_path`, ordered by
    /// replica number. Empty when the object does not exist.
    fn object_rows(&self, logical_path: &str) -> CatalogResult<Vec<Replica>>;

    /// Register a new replica row keyed by `(data_id, resc_id)`.
    fn register_replica(&self, replica: &Replica) -> CatalogResult<()>;

    /// Remove a replica row. Removing the last row removes the object.
    fn unregister_replica(&self, data_id: i64, replica_number: i32) -> CatalogResult<()>;

    /// Special-collection record covering `logical_path`, if any.
    fn special_collection(&self, logical_path: &str) -> CatalogResult<Option<SpecialCollection>>;

    /// Open a transaction for replica-row updates.
    fn begin(&self) -> CatalogResult<Box<dyn CatalogTransaction + '_>>;
}

/// One catalog transaction. Updates stage until `commit`; dropping the
/// transaction without committing discards them.
pub trait CatalogTransaction {
    /// Update the row keyed by `(resc_id_before, data_id)`, setting every
    /// non-identity column to its value in `after`. The key choice is
    /// deliberate: a replica's number may change, but its residency on a
    /// physical resource before the operation is fixed.
    fn update_replica(
        &mut self,
        data_id: i64,
        resc_id_before: i64,
        after: &Replica,
    ) -> CatalogResult<()>;

    fn commit(self: Box<Self>) -> CatalogResult<()>;

    fn rollback(self: Box<Self>) -> CatalogResult<()>;
}
