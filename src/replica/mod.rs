//! Replica and data-object model
//!
//! A logical object is a path plus an ordered collection of replicas.
//! Every replica of one object shares `data_id`, `coll_id`, the logical
//! path and the owner; only per-copy fields differ. Replicas are plain
//! value types held in a contiguous sequence owned by [`LogicalObject`];
//! consumers address them by index, never by pointer.

mod cond_input;
mod object;
mod record;
mod status;

pub use cond_input::{keywords, CondInput};
pub use object::LogicalObject;
pub use record::{now_timestamp, Replica};
pub use status::ReplicaStatus;
