//! Locking for the Talus command execution core
//!
//! Commands declare the resources they read and write before executing;
//! the lock manager grants each declaration atomically as one set, in
//! strict FIFO order, so no command ever holds a partial lock set and
//! cyclic waiting cannot arise.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod request;

pub use manager::{LockGuard, LockManager};
pub use request::{LockList, LockRequest, LockScope, LockTarget};
