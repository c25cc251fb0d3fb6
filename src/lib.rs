//! gridvault - Replica lifecycle core for a distributed storage grid
//!
//! Mediates between clients opening/writing/closing a logical object and
//! the catalog + physical-storage layers that record and persist its
//! replicas.

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod locking;
pub mod object;
pub mod observability;
pub mod replica;
pub mod resolve;
pub mod resource;
pub mod rules;
pub mod session;
pub mod zone;
