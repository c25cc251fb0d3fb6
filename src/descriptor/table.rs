//! The L1 descriptor table
//!
//! A fixed-size, per-agent table of in-flight opens. Slot numbers are
//! the opaque handles returned to clients. Slots 0-2 are permanently
//! reserved so a handle can never be confused with a well-known fd
//! number.

use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::replica::CondInput;

/// Slots below this index are never allocated.
pub const RESERVED_SLOTS: usize = 3;

/// What the open is doing, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationKind {
    Create,
    #[default]
    OpenRead,
    OpenWrite,
    ReplSrc,
    ReplDest,
    CopySrc,
    CopyDest,
    PhymvSrc,
    PhymvDest,
    Put,
    Get,
    Unlink,
}

impl OperationKind {
    /// Destination side of a two-descriptor transfer.
    pub fn is_destination(&self) -> bool {
        matches!(
            self,
            OperationKind::ReplDest | OperationKind::CopyDest | OperationKind::PhymvDest
        )
    }

    /// Operations whose finalize mirrors the source replica's status.
    pub fn mirrors_source_status(&self) -> bool {
        matches!(self, OperationKind::ReplDest | OperationKind::PhymvDest)
    }
}

/// How the replica was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenType {
    Create,
    #[default]
    ForRead,
    ForWrite,
}

/// Checksum policy for the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumFlag {
    #[default]
    None,
    /// Compute and compare against the expected checksum
    Verify,
    /// Compute and persist without comparison
    Register,
}

/// Client open flags. Reads are always permitted on an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn read() -> Self {
        Self::default()
    }

    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn create() -> Self {
        Self {
            write: true,
            create: true,
            ..Self::default()
        }
    }

    /// Truncating a read-only open is contradictory.
    pub fn validate(&self) -> CoreResult<()> {
        if self.truncate && !self.write {
            return Err(CoreError::new(
                CoreErrorCode::IncompatibleOpenFlags,
                "cannot truncate a read-only open",
            ));
        }
        Ok(())
    }
}

/// Snapshot of the client request, kept for the lifetime of the slot.
#[derive(Debug, Clone, Default)]
pub struct OpenRequest {
    pub logical_path: String,
    pub flags: OpenFlags,
    /// Expected size of the incoming data; -1 when unknown.
    pub data_size: i64,
    pub cond_input: CondInput,
    /// Caller-declared operation kind (put, replicate, move); `None`
    /// derives the kind from the flags.
    pub oper_type: Option<OperationKind>,
}

impl OpenRequest {
    pub fn new(logical_path: impl Into<String>, flags: OpenFlags) -> Self {
        Self {
            logical_path: logical_path.into(),
            flags,
            data_size: -1,
            cond_input: CondInput::new(),
            oper_type: None,
        }
    }

    pub fn with_cond_input(mut self, cond_input: CondInput) -> Self {
        self.cond_input = cond_input;
        self
    }

    pub fn with_data_size(mut self, data_size: i64) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn with_oper_type(mut self, oper_type: OperationKind) -> Self {
        self.oper_type = Some(oper_type);
        self
    }
}

/// Bookkeeping for an open forwarded to a peer zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteZoneLink {
    pub zone: String,
    pub remote_index: usize,
}

/// One slot of the descriptor table.
#[derive(Debug, Clone, Default)]
pub struct L1Descriptor {
    pub in_use: bool,
    pub operation_kind: OperationKind,
    pub open_type: OpenType,
    /// Client request snapshot
    pub request: OpenRequest,
    pub replica_number: i32,
    pub resc_hier: String,
    pub physical_path: String,
    /// Storage-layer handle; below [`RESERVED_SLOTS`] means "not open"
    pub physical_fd: i32,
    /// Bytes written through this slot; -1 until the first write
    pub bytes_written: i64,
    /// Expected final size; -1 when unknown
    pub expected_size: i64,
    /// Peer slot for copy/replicate destinations; 0 means none
    pub source_descriptor: usize,
    pub checksum_flag: ChecksumFlag,
    pub expected_checksum: String,
    /// Advisory lock handle; -1 means none
    pub lock_fd: i32,
    pub replica_token: String,
    /// Last error observed on this slot; 0 when healthy
    pub oper_status: i32,
    pub purge_cache: bool,
    pub remote_zone: Option<RemoteZoneLink>,
}

impl L1Descriptor {
    fn fresh() -> Self {
        Self {
            in_use: true,
            bytes_written: -1,
            expected_size: -1,
            lock_fd: -1,
            ..Self::default()
        }
    }

    /// Whether the slot has a usable storage handle.
    pub fn has_physical_fd(&self) -> bool {
        self.physical_fd >= RESERVED_SLOTS as i32
    }
}

/// Fixed-size table of in-flight opens.
#[derive(Debug)]
pub struct DescriptorTable {
    slots: Vec<L1Descriptor>,
}

impl DescriptorTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(RESERVED_SLOTS + 1);
        Self {
            slots: vec![L1Descriptor::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently in use.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// Claim the first unused slot at or above [`RESERVED_SLOTS`].
    pub fn allocate(&mut self) -> CoreResult<usize> {
        for index in RESERVED_SLOTS..self.slots.len() {
            if !self.slots[index].in_use {
                self.slots[index] = L1Descriptor::fresh();
                return Ok(index);
            }
        }
        Err(CoreError::new(
            CoreErrorCode::OutOfDescriptors,
            format!("all {} descriptor slots in use", self.slots.len()),
        ))
    }

    fn check_range(&self, index: usize) -> CoreResult<()> {
        if index < RESERVED_SLOTS || index >= self.slots.len() {
            return Err(CoreError::new(
                CoreErrorCode::DescriptorOutOfRange,
                format!("descriptor index {} out of range", index),
            ));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> CoreResult<&L1Descriptor> {
        self.check_range(index)?;
        let slot = &self.slots[index];
        if !slot.in_use {
            return Err(CoreError::new(
                CoreErrorCode::BadDescriptorIndex,
                format!("descriptor {} is not in use", index),
            ));
        }
        Ok(slot)
    }

    pub fn get_mut(&mut self, index: usize) -> CoreResult<&mut L1Descriptor> {
        self.check_range(index)?;
        let slot = &mut self.slots[index];
        if !slot.in_use {
            return Err(CoreError::new(
                CoreErrorCode::BadDescriptorIndex,
                format!("descriptor {} is not in use", index),
            ));
        }
        Ok(slot)
    }

    /// Release a slot, clearing the embedded request snapshot.
    pub fn free(&mut self, index: usize) -> CoreResult<()> {
        self.check_range(index)?;
        if !self.slots[index].in_use {
            return Err(CoreError::new(
                CoreErrorCode::BadDescriptorIndex,
                format!("descriptor {} is not in use", index),
            ));
        }
        self.slots[index] = L1Descriptor::default();
        Ok(())
    }
}
