//! Lifecycle operations
//!
//! The orchestration layer tying resolution, descriptors, locking and
//! finalize together: open, write, read, close, put, get, replicate,
//! phymv, unlink and trim.
//!
//! Control flow for a write: resolve, open (intermediate), physical
//! create/open, write, close, finalize in memory, commit to catalog,
//! post-processing hooks.

mod close;
mod info;
mod io;
mod open;
mod phymv;
mod put;
mod replicate;
mod trim;
mod unlink;

pub use close::{close, CloseDisposition, CloseInput};
pub use info::{
    is_replica_empty, last_write_time, replica_checksum, replica_size, set_last_write_time,
    VerificationCalculation,
};
pub use io::{read, write};
pub use open::open;
pub use phymv::phymv;
pub use put::{get, put};
pub use replicate::replicate;
pub use trim::trim_cache_replica;
pub use unlink::unlink;
