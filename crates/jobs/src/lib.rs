//! Job scheduling for the Talus command execution core
//!
//! Every command run, synchronous or asynchronous, is registered as a job:
//! it receives an id, its lifecycle state is tracked, it can be stopped
//! cooperatively, and asynchronous outcomes are cached until collected.
//!
//! The pool owns a bounded set of worker threads; synchronous jobs run on
//! the caller's own thread but share the same bookkeeping.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod id;
pub mod job;
pub mod pool;

pub use id::JobId;
pub use job::{JobHandle, JobInfo, JobSpec, JobState};
pub use pool::JobPool;
