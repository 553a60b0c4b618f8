//! Resource storage for the Talus command execution core
//!
//! This crate owns the in-memory representation of a resource (a named
//! node table) and the atomic update buffer that applies batched
//! structural edits to it in one consistent pass.
//!
//! The physical on-disk layout of a resource is a collaborator concern and
//! lives outside this workspace; everything here operates on the node
//! table interface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic;
pub mod resource;

pub use atomic::AtomicUpdates;
pub use resource::{Node, Resource, ResourceStats, DEFAULT_MAX_NODES};
