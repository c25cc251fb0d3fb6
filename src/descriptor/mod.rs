//! In-flight open tracking
//!
//! The L1 descriptor table records every open this agent holds; the
//! replica access table authorizes a pid to keep writing to a replica it
//! opened, across close/reopen within a session.

mod access;
mod table;

pub use access::{AccessRestoreGuard, ReplicaAccessEntry, ReplicaAccessTable};
pub use table::{
    ChecksumFlag, DescriptorTable, L1Descriptor, OpenFlags, OpenRequest, OpenType, OperationKind,
    RemoteZoneLink, RESERVED_SLOTS,
};
