//! TalusDB - command execution core for the Talus embedded database
//!
//! Talus accepts discrete commands against a pool of named, stateful
//! resources and guarantees that concurrent commands observe and mutate
//! them safely: multi-granularity locking over resources and cross-cutting
//! pseudo-resources, an inspectable job scheduler with cooperative
//! cancellation and cached asynchronous results, resource pinning that
//! protects in-use resources from destructive operations, and an atomic
//! batch-mutation buffer that keeps positional references consistent
//! across a whole batch of structural edits.
//!
//! # Quick Start
//!
//! ```ignore
//! use talusdb::{Command, Engine, Options};
//!
//! let engine = Engine::new(Options::default());
//! let mut ctx = engine.context("admin");
//!
//! engine.run(&mut ctx, Command::CreateDb {
//!     name: "docs".into(),
//!     payloads: vec!["hello".into()],
//! });
//! engine.run(&mut ctx, Command::Open { name: "docs".into() });
//! let outcome = engine.run(&mut ctx, Command::Add { payload: "world".into() });
//! assert!(outcome.success);
//! ```
//!
//! # Architecture
//!
//! All operations go through the [`Engine`], which wires the resource
//! registry, the lock manager, the job pool and the user store into one
//! command lifecycle. Front ends construct [`Command`] values and either
//! run them synchronously or submit them as asynchronous jobs.

pub use talus_core::{CancelToken, Error, Options, Permission, Progress, Result};
pub use talus_engine::{BatchOp, Command, CommandOutcome, Context, Engine};
pub use talus_jobs::{JobId, JobInfo, JobState};
pub use talus_locks::{LockGuard, LockList, LockManager, LockRequest, LockScope, LockTarget};
pub use talus_store::{AtomicUpdates, Node, Resource, ResourceStats};
