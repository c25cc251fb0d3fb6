//! Catalog connection pooling
//!
//! A fixed number of permits in front of a shared backend. Finalize
//! acquires a connection for the duration of one transaction; exhaustion
//! maps to the connection-unavailable error rather than blocking, since
//! the hot path is single-threaded per agent.

use std::sync::{Arc, Mutex};

use super::errors::{CatalogError, CatalogResult};
use super::CatalogBackend;

/// Shared, permit-limited handle to the catalog backend.
#[derive(Debug, Clone)]
pub struct CatalogPool {
    backend: Arc<dyn CatalogBackend>,
    available: Arc<Mutex<usize>>,
    capacity: usize,
}

impl CatalogPool {
    pub fn new(backend: Arc<dyn CatalogBackend>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            available: Arc::new(Mutex::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire a connection; fails when every permit is handed out.
    pub fn connection(&self) -> CatalogResult<CatalogConnection<'_>> {
        let mut available = self.available.lock().unwrap();
        if *available == 0 {
            return Err(CatalogError::ConnectionUnavailable(format!(
                "all {} catalog connections in use",
                self.capacity
            )));
        }
        *available -= 1;
        Ok(CatalogConnection { pool: self })
    }
}

/// One checked-out connection. Returns its permit on drop.
#[derive(Debug)]
pub struct CatalogConnection<'a> {
    pool: &'a CatalogPool,
}

impl CatalogConnection<'_> {
    pub fn backend(&self) -> &dyn CatalogBackend {
        self.pool.backend.as_ref()
    }
}

impl Drop for CatalogConnection<'_> {
    fn drop(&mut self) {
        let mut available = self.pool.available.lock().unwrap();
        *available += 1;
    }
}
