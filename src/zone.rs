//! Inter-zone forwarding seam
//!
//! An object whose path is rooted in another zone must be opened and
//! closed on a peer server. The core only records the peer's descriptor
//! index and forwards through this trait; the connection itself lives
//! outside the core.

use crate::error::CoreResult;
use crate::replica::CondInput;

/// Zone component of a logical path (`/zone/...`).
pub fn zone_of(logical_path: &str) -> Option<&str> {
    let trimmed = logical_path.strip_prefix('/')?;
    let zone = trimmed.split('/').next()?;
    if zone.is_empty() {
        None
    } else {
        Some(zone)
    }
}

/// Result of forwarding an open to a peer zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteOpen {
    /// Descriptor index on the peer server.
    pub remote_index: usize,
}

/// Result of forwarding a close to a peer zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteClose {
    pub status: i32,
    /// Bytes the peer observed for the write; authoritative when the
    /// local count is zero.
    pub bytes_written: i64,
}

/// Connection to peer zone servers.
pub trait ZoneGateway: Send + Sync + std::fmt::Debug {
    fn forward_open(
        &self,
        zone: &str,
        logical_path: &str,
        cond_input: &CondInput,
        write: bool,
    ) -> CoreResult<RemoteOpen>;

    fn forward_close(
        &self,
        zone: &str,
        remote_index: usize,
        bytes_written: i64,
    ) -> CoreResult<RemoteClose>;
}
