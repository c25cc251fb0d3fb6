//! Replica status codes
//!
//! The catalog stores the status as a stringified integer in the
//! `data_is_dirty` column. The numbering is part of the external
//! contract and must never change.

use std::fmt;

use crate::error::{CoreError, CoreErrorCode, CoreResult};

/// Catalog-level status of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaStatus {
    /// Contents are outdated relative to a sibling
    Stale = 0,
    /// Contents are current and readable
    Good = 1,
    /// A writer holds exclusive access; contents are not yet valid
    Intermediate = 2,
    /// Read-locked while stale
    ReadLockOnStale = 3,
    /// Read-locked while good
    ReadLockOnGood = 4,
    /// Sibling of an intermediate replica; do not mutate, not canonical
    WriteLock = 5,
}

impl ReplicaStatus {
    /// Integer form stored in the catalog.
    pub fn as_int(&self) -> i32 {
        *self as i32
    }

    /// Parse the catalog integer form.
    pub fn from_int(value: i32) -> CoreResult<Self> {
        match value {
            0 => Ok(Self::Stale),
            1 => Ok(Self::Good),
            2 => Ok(Self::Intermediate),
            3 => Ok(Self::ReadLockOnStale),
            4 => Ok(Self::ReadLockOnGood),
            5 => Ok(Self::WriteLock),
            other => Err(CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("invalid replica status [{}]", other),
            )),
        }
    }

    /// Parse the catalog string form.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let n: i32 = value.trim().parse().map_err(|_| {
            CoreError::new(
                CoreErrorCode::InvalidInputParam,
                format!("replica status is not an integer [{}]", value),
            )
        })?;
        Self::from_int(n)
    }

    /// A replica that currently excludes all other writers.
    pub fn is_writer(&self) -> bool {
        matches!(self, Self::Intermediate | Self::WriteLock)
    }

    /// A replica whose contents are valid for reads.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Good | Self::ReadLockOnGood)
    }

    pub fn is_read_locked(&self) -> bool {
        matches!(self, Self::ReadLockOnStale | Self::ReadLockOnGood)
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_int())
    }
}
