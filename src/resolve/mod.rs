//! Resource-hierarchy resolution
//!
//! Given a logical path, an operation and optional hints, pick the best
//! replica's storage hierarchy by collecting votes from the root
//! resource plugins.

mod hierarchy;
mod resolver;
mod voting;

pub use hierarchy::Hierarchy;
pub use resolver::{resolve_resource_hierarchy, ResolveRequest, Resolution, Winner};
pub use voting::{Operation, Vote};
