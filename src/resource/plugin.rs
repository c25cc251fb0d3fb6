//! The storage plugin dispatch trait

use crate::error::CoreResult;
use crate::replica::LogicalObject;
use crate::resolve::{Operation, Vote};

/// Size reported by plugins that cannot stat their storage (archives).
/// The caller falls back to its own byte accounting.
pub const UNKNOWN_FILE_SIZE: i64 = -1;

/// A root resource the core can route operations to.
///
/// One plugin instance represents one root and the hierarchy below it.
/// Descriptors returned by `create`/`open` are plugin-scoped handles,
/// valid until `close`.
pub trait ResourcePlugin: Send + Sync + std::fmt::Debug {
    /// Root resource name.
    fn name(&self) -> &str;

    /// Full hierarchy chain rooted at `name()`, `root;...;leaf` form.
    fn hierarchy(&self) -> String;

    /// Numeric id of the leaf resource, as registered in the catalog.
    fn leaf_resource_id(&self) -> i64;

    /// Vote on hosting `operation` for the given object.
    ///
    /// Returns the hierarchy the plugin would use and a fitness score in
    /// `[0, 1]`; zero refuses the operation.
    fn resolve_hierarchy(
        &self,
        operation: Operation,
        object: Option<&LogicalObject>,
        local_host: &str,
    ) -> CoreResult<(String, Vote)>;

    /// Vault path this plugin would store the given logical path at.
    fn generate_physical_path(&self, logical_path: &str) -> String;

    /// Create the vault file; fails if the path is already occupied.
    fn create(&self, physical_path: &str) -> CoreResult<i32>;

    /// Open an existing vault file.
    fn open(&self, physical_path: &str, write: bool, truncate: bool) -> CoreResult<i32>;

    /// Append bytes at the current position.
    fn write(&self, fd: i32, data: &[u8]) -> CoreResult<usize>;

    /// Read up to `max_bytes` from the current position.
    fn read(&self, fd: i32, max_bytes: usize) -> CoreResult<Vec<u8>>;

    fn close(&self, fd: i32) -> CoreResult<()>;

    /// Size of the vault file, or [`UNKNOWN_FILE_SIZE`].
    fn stat_size(&self, physical_path: &str) -> CoreResult<i64>;

    /// Checksum of the vault file in `sha2:<base64>` form.
    fn checksum(&self, physical_path: &str) -> CoreResult<String>;

    fn unlink(&self, physical_path: &str) -> CoreResult<()>;

    /// Whether the resource can absorb `additional_bytes` more.
    fn quota_allows(&self, additional_bytes: i64) -> bool {
        let _ = additional_bytes;
        true
    }

    /// Archive-class resources cannot stat or checksum directly.
    fn is_archive(&self) -> bool {
        false
    }
}
