//! Advisory file locks
//!
//! Backs the explicit lock-at-open request. These are cooperative,
//! process-wide locks handed out as small integer handles; the catalog
//! lock state in [`super::lock`] remains the consistency mechanism.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CoreError, CoreErrorCode, CoreResult};

/// Requested lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryLockType {
    Read,
    Write,
}

impl AdvisoryLockType {
    /// Parse the conditional-input value.
    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("unknown lock type [{}]", other),
            )),
        }
    }
}

#[derive(Debug)]
struct Holder {
    logical_path: String,
    lock_type: AdvisoryLockType,
}

#[derive(Debug, Default)]
struct Inner {
    next_fd: i32,
    holders: HashMap<i32, Holder>,
}

/// Process-wide advisory lock table.
#[derive(Debug)]
pub struct AdvisoryLockTable {
    inner: Mutex<Inner>,
}

impl Default for AdvisoryLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryLockTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_fd: 3,
                holders: HashMap::new(),
            }),
        }
    }

    /// Acquire a lock on the path. Multiple readers may coexist; a
    /// writer excludes everyone else.
    pub fn acquire(&self, logical_path: &str, lock_type: AdvisoryLockType) -> CoreResult<i32> {
        let mut inner = self.inner.lock().unwrap();
        for holder in inner.holders.values() {
            if holder.logical_path == logical_path
                && (holder.lock_type == AdvisoryLockType::Write
                    || lock_type == AdvisoryLockType::Write)
            {
                return Err(CoreError::new(
                    CoreErrorCode::AdvisoryLockConflict,
                    format!("[{}] is locked", logical_path),
                ));
            }
        }
        let fd = inner.next_fd;
        inner.next_fd += 1;
        inner.holders.insert(
            fd,
            Holder {
                logical_path: logical_path.to_string(),
                lock_type,
            },
        );
        Ok(fd)
    }

    pub fn release(&self, fd: i32) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.holders.remove(&fd).map(|_| ()).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("unknown lock handle [{}]", fd),
            )
        })
    }

    pub fn is_locked(&self, logical_path: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .holders
            .values()
            .any(|h| h.logical_path == logical_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_share_writers_exclude() {
        let table = AdvisoryLockTable::new();
        let a = table.acquire("/z/f", AdvisoryLockType::Read).unwrap();
        let _b = table.acquire("/z/f", AdvisoryLockType::Read).unwrap();
        assert_eq!(
            table
                .acquire("/z/f", AdvisoryLockType::Write)
                .unwrap_err()
                .code(),
            CoreErrorCode::AdvisoryLockConflict
        );
        table.release(a).unwrap();
    }

    #[test]
    fn test_write_lock_blocks_readers() {
        let table = AdvisoryLockTable::new();
        let fd = table.acquire("/z/f", AdvisoryLockType::Write).unwrap();
        assert!(table.acquire("/z/f", AdvisoryLockType::Read).is_err());
        table.release(fd).unwrap();
        assert!(table.acquire("/z/f", AdvisoryLockType::Read).is_ok());
    }

    #[test]
    fn test_handles_start_above_well_known_fds() {
        let table = AdvisoryLockTable::new();
        assert!(table.acquire("/z/a", AdvisoryLockType::Read).unwrap() >= 3);
    }

    #[test]
    fn test_release_unknown_handle_fails() {
        let table = AdvisoryLockTable::new();
        assert!(table.release(99).is_err());
    }

    #[test]
    fn test_lock_type_parse() {
        assert_eq!(
            AdvisoryLockType::parse("write").unwrap(),
            AdvisoryLockType::Write
        );
        assert!(AdvisoryLockType::parse("exclusive").is_err());
    }
}
