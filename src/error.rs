//! Core Error Taxonomy
//!
//! Every failure the lifecycle core distinguishes carries a stable,
//! negative integer code and a `GRID_*` name. The integer codes are part
//! of the external contract: remote-procedure shims return them verbatim,
//! so they must never be renumbered.

use std::fmt;
use std::io;

/// Severity of a core error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, agent continues
    Error,
    /// Invariant violation; the agent must terminate
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Error codes recognized by the lifecycle core.
///
/// Grouped by the thousands digit of the code: input (-301xxx), policy
/// (-302xxx), state (-303xxx), physical I/O (-304xxx), catalog (-305xxx),
/// environment (-306xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreErrorCode {
    // Input errors
    /// Payload could not be parsed
    InputNotWellFormed,
    /// A required field is missing or has the wrong shape
    InvalidInputParam,
    /// Logical path exceeds the configured limit
    PathTooLong,
    /// Open flags are mutually incompatible (e.g. read-only + truncate)
    IncompatibleOpenFlags,
    /// Logical path is structurally invalid
    InvalidLogicalPath,
    /// A resource hint names a non-root resource
    DirectChildAccess,

    // Authorization / policy errors
    /// Overwrite of an existing replica requires the force flag
    OverwriteWithoutForceFlag,
    /// Resource quota exceeded
    ResourceQuotaExceeded,
    /// A pre-operation hook vetoed the request
    DeniedByPolicy,

    // State errors
    /// No replica of the object exists where one was required
    ReplicaDoesNotExist,
    /// No eligible replica / hierarchy for the operation
    HierarchyError,
    /// Another writer holds the object (intermediate or write-locked sibling)
    HierarchyLocked,
    /// Descriptor index outside the table bounds
    DescriptorOutOfRange,
    /// Descriptor index inside bounds but not in use
    BadDescriptorIndex,
    /// Descriptor table is full
    OutOfDescriptors,
    /// Replica already present on the target resource
    CopyAlreadyInResource,
    /// Advisory lock is held by another opener
    AdvisoryLockConflict,

    // Physical I/O errors
    /// Storage plugin failed to create the vault file
    PhysicalCreateFailed,
    /// Storage plugin failed to open the vault file
    PhysicalOpenFailed,
    /// Storage plugin failed to close the vault file
    PhysicalCloseFailed,
    /// Storage plugin failed to stat the vault file
    PhysicalStatFailed,
    /// Storage plugin failed to unlink the vault file
    PhysicalUnlinkFailed,
    /// Storage plugin failed to read or write
    PhysicalIoFailed,
    /// Vault size does not match the expected transfer length
    CopyLenError,
    /// Computed checksum does not match the expected checksum
    ChecksumMismatch,
    /// Vault path already occupied by another file
    PhysicalPathExists,
    /// Archive-class resource cannot be checksummed directly (benign)
    DirectArchiveAccess,

    // Catalog errors
    /// No row matched the update/query key
    CatalogNoRowsFound,
    /// Catalog driver reported an error
    CatalogLibraryError,
    /// Row already registered under that key
    CatalogAlreadyHasItem,
    /// Catalog connection unavailable
    CatalogConnectionError,

    // Resource / environment errors
    /// Hostname could not be determined or resolved
    UnknownHostname,
    /// Configuration invalid or unreadable
    ConfigurationError,
    /// Operation not supported by the core
    NotSupported,
    /// Unspecified internal failure
    InternalError,
}

impl CoreErrorCode {
    /// Returns the stable `GRID_*` name for this code.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InputNotWellFormed => "GRID_INPUT_NOT_WELL_FORMED",
            Self::InvalidInputParam => "GRID_INVALID_INPUT_PARAM",
            Self::PathTooLong => "GRID_PATH_TOO_LONG",
            Self::IncompatibleOpenFlags => "GRID_INCOMPATIBLE_OPEN_FLAGS",
            Self::InvalidLogicalPath => "GRID_INVALID_LOGICAL_PATH",
            Self::DirectChildAccess => "GRID_DIRECT_CHILD_ACCESS",
            Self::OverwriteWithoutForceFlag => "GRID_OVERWRITE_WITHOUT_FORCE_FLAG",
            Self::ResourceQuotaExceeded => "GRID_RESOURCE_QUOTA_EXCEEDED",
            Self::DeniedByPolicy => "GRID_DENIED_BY_POLICY",
            Self::ReplicaDoesNotExist => "GRID_REPLICA_DOES_NOT_EXIST",
            Self::HierarchyError => "GRID_HIERARCHY_ERROR",
            Self::HierarchyLocked => "GRID_HIERARCHY_LOCKED",
            Self::DescriptorOutOfRange => "GRID_DESCRIPTOR_OUT_OF_RANGE",
            Self::BadDescriptorIndex => "GRID_BAD_DESCRIPTOR_INDEX",
            Self::OutOfDescriptors => "GRID_OUT_OF_DESCRIPTORS",
            Self::CopyAlreadyInResource => "GRID_COPY_ALREADY_IN_RESOURCE",
            Self::AdvisoryLockConflict => "GRID_ADVISORY_LOCK_CONFLICT",
            Self::PhysicalCreateFailed => "GRID_PHYSICAL_CREATE_FAILED",
            Self::PhysicalOpenFailed => "GRID_PHYSICAL_OPEN_FAILED",
            Self::PhysicalCloseFailed => "GRID_PHYSICAL_CLOSE_FAILED",
            Self::PhysicalStatFailed => "GRID_PHYSICAL_STAT_FAILED",
            Self::PhysicalUnlinkFailed => "GRID_PHYSICAL_UNLINK_FAILED",
            Self::PhysicalIoFailed => "GRID_PHYSICAL_IO_FAILED",
            Self::CopyLenError => "GRID_COPY_LEN_ERROR",
            Self::ChecksumMismatch => "GRID_CHECKSUM_MISMATCH",
            Self::PhysicalPathExists => "GRID_PHYSICAL_PATH_EXISTS",
            Self::DirectArchiveAccess => "GRID_DIRECT_ARCHIVE_ACCESS",
            Self::CatalogNoRowsFound => "GRID_CATALOG_NO_ROWS_FOUND",
            Self::CatalogLibraryError => "GRID_CATALOG_LIBRARY_ERROR",
            Self::CatalogAlreadyHasItem => "GRID_CATALOG_ALREADY_HAS_ITEM",
            Self::CatalogConnectionError => "GRID_CATALOG_CONNECTION_ERROR",
            Self::UnknownHostname => "GRID_UNKNOWN_HOSTNAME",
            Self::ConfigurationError => "GRID_CONFIGURATION_ERROR",
            Self::NotSupported => "GRID_NOT_SUPPORTED",
            Self::InternalError => "GRID_INTERNAL_ERROR",
        }
    }

    /// Returns the stable negative integer for this code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InputNotWellFormed => -301_000,
            Self::InvalidInputParam => -301_001,
            Self::PathTooLong => -301_002,
            Self::IncompatibleOpenFlags => -301_003,
            Self::InvalidLogicalPath => -301_004,
            Self::DirectChildAccess => -301_005,
            Self::OverwriteWithoutForceFlag => -302_000,
            Self::ResourceQuotaExceeded => -302_001,
            Self::DeniedByPolicy => -302_002,
            Self::ReplicaDoesNotExist => -303_000,
            Self::HierarchyError => -303_001,
            Self::HierarchyLocked => -303_002,
            Self::DescriptorOutOfRange => -303_003,
            Self::BadDescriptorIndex => -303_004,
            Self::OutOfDescriptors => -303_005,
            Self::CopyAlreadyInResource => -303_006,
            Self::AdvisoryLockConflict => -303_007,
            Self::PhysicalCreateFailed => -304_000,
            Self::PhysicalOpenFailed => -304_001,
            Self::PhysicalCloseFailed => -304_002,
            Self::PhysicalStatFailed => -304_003,
            Self::PhysicalUnlinkFailed => -304_004,
            Self::PhysicalIoFailed => -304_005,
            Self::CopyLenError => -304_006,
            Self::ChecksumMismatch => -304_007,
            Self::PhysicalPathExists => -304_008,
            Self::DirectArchiveAccess => -304_009,
            Self::CatalogNoRowsFound => -305_000,
            Self::CatalogLibraryError => -305_001,
            Self::CatalogAlreadyHasItem => -305_002,
            Self::CatalogConnectionError => -305_003,
            Self::UnknownHostname => -306_000,
            Self::ConfigurationError => -306_001,
            Self::NotSupported => -306_002,
            Self::InternalError => -306_003,
        }
    }

    /// Returns the severity for this code.
    pub fn severity(&self) -> Severity {
        match self {
            Self::InternalError => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for CoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A core error: a taxonomy code plus human-readable context.
#[derive(Debug)]
pub struct CoreError {
    code: CoreErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl CoreError {
    /// Create an error with the given code and message.
    pub fn new(code: CoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying I/O failure.
    pub fn with_source(
        code: CoreErrorCode,
        message: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn code(&self) -> CoreErrorCode {
        self.code
    }

    /// The stable negative integer returned to remote-procedure callers.
    pub fn status(&self) -> i32 {
        self.code.code()
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.code.severity(),
            self.code.name(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
