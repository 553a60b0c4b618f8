//! Command enum defining all Talus operations.
//!
//! Commands are the "instruction set" of the engine. Every operation a
//! front end can request is a variant of this enum:
//!
//! - **Self-contained**: all arguments needed for execution are in the
//!   variant, as plain data.
//! - **Serializable**: can be converted to/from JSON for cross-language
//!   front ends.
//! - **Introspectable**: each variant declares its required permission,
//!   whether it needs an open resource, whether it can be stopped, and
//!   the lock request it executes under.
//!
//! # Command categories
//!
//! | Category | Commands |
//! |----------|----------|
//! | Catalog | `CreateDb`, `DropDb`, `RenameDb`, `CopyDb`, `ListDbs` |
//! | Session | `Open`, `Close`, `InfoDb` |
//! | Content | `Add`, `Insert`, `Delete`, `Replace`, `Batch`, `Export` |
//! | Backup | `CreateBackup`, `Restore` |
//! | Inspection | `Stats` |
//! | Users | `CreateUser`, `DropUser`, `Grant` |
//! | Jobs | `ShowJobs`, `StopJob`, `JobResult` |

use serde::{Deserialize, Serialize};

use talus_core::{normalize_name, validate_name, Permission, Result};
use talus_jobs::JobId;
use talus_locks::{LockRequest, LockScope, LockTarget};

/// One structural edit inside a [`Command::Batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOp {
    /// Insert a payload before `position`.
    Insert {
        /// Anchor position.
        position: usize,
        /// Payload of the new node.
        payload: String,
    },
    /// Delete the node at `position`.
    Delete {
        /// Anchor position.
        position: usize,
    },
    /// Replace the payload of the node at `position`.
    Replace {
        /// Anchor position.
        position: usize,
        /// Replacement payload.
        payload: String,
    },
}

/// A command is a self-contained, serializable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Command {
    // ==================== Catalog ====================
    /// Create a resource, optionally pre-filled with payloads.
    CreateDb {
        /// Resource name.
        name: String,
        /// Initial node payloads.
        payloads: Vec<String>,
    },

    /// Drop a resource. Not stoppable: once started it runs to completion.
    DropDb {
        /// Resource name.
        name: String,
    },

    /// Rename a resource.
    RenameDb {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },

    /// Copy a resource to a new name.
    CopyDb {
        /// Source resource.
        from: String,
        /// Target resource; must not exist.
        to: String,
    },

    /// List all resources.
    ListDbs,

    // ==================== Session ====================
    /// Open a resource as the session's current context, pinning it.
    Open {
        /// Resource name.
        name: String,
    },

    /// Close the session's current context, releasing its pin.
    Close,

    /// Statistics of the currently open resource.
    InfoDb,

    // ==================== Content ====================
    /// Append one node to the currently open resource.
    Add {
        /// Payload of the new node.
        payload: String,
    },

    /// Insert one node before `position` in the currently open resource.
    Insert {
        /// Anchor position.
        position: usize,
        /// Payload of the new node.
        payload: String,
    },

    /// Delete the node at `position` in the currently open resource.
    Delete {
        /// Anchor position.
        position: usize,
    },

    /// Replace the node payload at `position` in the currently open
    /// resource.
    Replace {
        /// Anchor position.
        position: usize,
        /// Replacement payload.
        payload: String,
    },

    /// Apply a whole batch of structural edits atomically. Anchor
    /// positions refer to the resource as it is before the batch.
    Batch {
        /// Buffered edits, in any order.
        ops: Vec<BatchOp>,
        /// Defer statistics recomputation instead of doing it inline.
        optimize: bool,
    },

    /// Export the currently open resource to a JSON file.
    Export {
        /// Target file path.
        path: String,
    },

    // ==================== Backup ====================
    /// Take a backup snapshot of a resource.
    CreateBackup {
        /// Resource name.
        name: String,
    },

    /// Restore a resource from its backup snapshot. Not stoppable.
    Restore {
        /// Resource name.
        name: String,
    },

    // ==================== Inspection ====================
    /// Aggregate statistics over all resources matching a glob pattern.
    ///
    /// The matching set is only known at run time, so this command
    /// executes under a conservative global read lock and narrows its
    /// reported lock set afterwards.
    Stats {
        /// Glob pattern over resource names.
        pattern: String,
    },

    // ==================== Users ====================
    /// Create a user with a global permission.
    CreateUser {
        /// User name.
        name: String,
        /// Global permission.
        perm: Permission,
    },

    /// Drop a user.
    DropUser {
        /// User name.
        name: String,
    },

    /// Grant a permission, globally or for one resource.
    Grant {
        /// User name.
        user: String,
        /// Permission to grant.
        perm: Permission,
        /// Scope the grant to one resource; `None` grants globally.
        resource: Option<String>,
    },

    // ==================== Jobs ====================
    /// List all queued, running and result-holding jobs.
    ShowJobs,

    /// Signal cooperative cancellation of a job.
    StopJob {
        /// Job id, e.g. `job7`.
        id: String,
    },

    /// Collect the cached result of a completed asynchronous job.
    JobResult {
        /// Job id, e.g. `job7`.
        id: String,
    },
}

/// The lock target standing for the session's current context: the open
/// resource if there is one, the fixed context token otherwise.
fn context_target(open: Option<&str>) -> LockTarget {
    match open {
        Some(name) => LockTarget::name(name),
        None => LockTarget::Context,
    }
}

impl Command {
    /// Command type name, used for job records and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateDb { .. } => "create-db",
            Command::DropDb { .. } => "drop-db",
            Command::RenameDb { .. } => "rename-db",
            Command::CopyDb { .. } => "copy-db",
            Command::ListDbs => "list-dbs",
            Command::Open { .. } => "open",
            Command::Close => "close",
            Command::InfoDb => "info-db",
            Command::Add { .. } => "add",
            Command::Insert { .. } => "insert",
            Command::Delete { .. } => "delete",
            Command::Replace { .. } => "replace",
            Command::Batch { .. } => "batch",
            Command::Export { .. } => "export",
            Command::CreateBackup { .. } => "create-backup",
            Command::Restore { .. } => "restore",
            Command::Stats { .. } => "stats",
            Command::CreateUser { .. } => "create-user",
            Command::DropUser { .. } => "drop-user",
            Command::Grant { .. } => "grant",
            Command::ShowJobs => "show-jobs",
            Command::StopJob { .. } => "stop-job",
            Command::JobResult { .. } => "job-result",
        }
    }

    /// Minimum permission the command requires.
    pub fn required_perm(&self) -> Permission {
        match self {
            Command::ListDbs | Command::Close => Permission::None,
            Command::Open { .. }
            | Command::InfoDb
            | Command::Export { .. }
            | Command::Stats { .. } => Permission::Read,
            Command::Add { .. }
            | Command::Insert { .. }
            | Command::Delete { .. }
            | Command::Replace { .. }
            | Command::Batch { .. } => Permission::Write,
            Command::CreateDb { .. }
            | Command::DropDb { .. }
            | Command::RenameDb { .. }
            | Command::CopyDb { .. }
            | Command::CreateBackup { .. }
            | Command::Restore { .. } => Permission::Create,
            Command::CreateUser { .. }
            | Command::DropUser { .. }
            | Command::Grant { .. }
            | Command::ShowJobs
            | Command::StopJob { .. }
            | Command::JobResult { .. } => Permission::Admin,
        }
    }

    /// The resource whose per-user grant governs the permission check,
    /// if the command is scoped to one.
    pub fn perm_resource<'a>(&'a self, open: Option<&'a str>) -> Option<&'a str> {
        match self {
            Command::Open { name }
            | Command::DropDb { name }
            | Command::CreateBackup { name }
            | Command::Restore { name } => Some(name),
            Command::RenameDb { from, .. } | Command::CopyDb { from, .. } => Some(from),
            Command::InfoDb
            | Command::Add { .. }
            | Command::Insert { .. }
            | Command::Delete { .. }
            | Command::Replace { .. }
            | Command::Batch { .. }
            | Command::Export { .. } => open,
            _ => None,
        }
    }

    /// Whether the command operates on the session's open resource.
    pub fn needs_open(&self) -> bool {
        matches!(
            self,
            Command::InfoDb
                | Command::Add { .. }
                | Command::Insert { .. }
                | Command::Delete { .. }
                | Command::Replace { .. }
                | Command::Batch { .. }
                | Command::Export { .. }
        )
    }

    /// Whether cooperative cancellation is meaningful.
    ///
    /// Destructive, non-restartable commands run to completion once
    /// started and ignore stop signals.
    pub fn stoppable(&self) -> bool {
        !matches!(self, Command::DropDb { .. } | Command::Restore { .. })
    }

    /// The lock request this command executes under.
    ///
    /// Commands that can statically name their targets declare them
    /// precisely so unrelated commands run concurrently; commands bound
    /// to the session's context resolve it here, at declaration time;
    /// commands whose target set is only known mid-execution declare the
    /// global flag.
    pub fn locks(&self, open: Option<&str>) -> LockRequest {
        let ctx = || context_target(open);
        match self {
            Command::CreateDb { name, .. } | Command::DropDb { name } => {
                LockRequest::write_targets([LockTarget::name(name)])
            }
            Command::RenameDb { from, to } => {
                LockRequest::write_targets([LockTarget::name(from), LockTarget::name(to)])
            }
            Command::CopyDb { from, to } => LockRequest::new(
                LockScope::Targets([LockTarget::name(from)].into_iter().collect()),
                LockScope::Targets([LockTarget::name(to)].into_iter().collect()),
            ),
            Command::ListDbs => LockRequest::read_targets([]),
            Command::Open { name } => LockRequest::new(
                LockScope::Targets([LockTarget::name(name)].into_iter().collect()),
                LockScope::Targets([ctx()].into_iter().collect()),
            ),
            Command::Close => LockRequest::write_targets([ctx()]),
            Command::InfoDb | Command::Export { .. } => LockRequest::read_targets([ctx()]),
            Command::Add { .. }
            | Command::Insert { .. }
            | Command::Delete { .. }
            | Command::Replace { .. }
            | Command::Batch { .. } => LockRequest::write_targets([ctx()]),
            Command::CreateBackup { name } => LockRequest::new(
                LockScope::Targets([LockTarget::name(name)].into_iter().collect()),
                LockScope::Targets([LockTarget::Backup].into_iter().collect()),
            ),
            Command::Restore { name } => {
                LockRequest::write_targets([LockTarget::name(name), LockTarget::Backup])
            }
            Command::Stats { .. } => LockRequest::read_global(),
            Command::CreateUser { .. } | Command::DropUser { .. } | Command::Grant { .. } => {
                LockRequest::write_targets([LockTarget::Users])
            }
            Command::ShowJobs | Command::StopJob { .. } | Command::JobResult { .. } => {
                LockRequest::read_targets([LockTarget::Admin])
            }
        }
    }

    /// Validates the command's arguments. Runs before any lock is taken.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::CreateDb { name, .. }
            | Command::DropDb { name }
            | Command::Open { name }
            | Command::CreateBackup { name }
            | Command::Restore { name } => validate_name(name),
            Command::RenameDb { from, to } | Command::CopyDb { from, to } => {
                validate_name(from)?;
                validate_name(to)
            }
            Command::Export { path } => {
                if path.is_empty() {
                    Err(talus_core::Error::Validation {
                        reason: "export path must not be empty".into(),
                    })
                } else {
                    Ok(())
                }
            }
            Command::Grant { resource, .. } => match resource {
                Some(resource) => validate_name(resource),
                None => Ok(()),
            },
            Command::StopJob { id } | Command::JobResult { id } => {
                id.parse::<JobId>().map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Folds resource-name arguments according to the configured case
    /// sensitivity.
    pub fn normalized(mut self, case_insensitive: bool) -> Self {
        if !case_insensitive {
            return self;
        }
        let fold = |name: &mut String| *name = normalize_name(name, true);
        match &mut self {
            Command::CreateDb { name, .. }
            | Command::DropDb { name }
            | Command::Open { name }
            | Command::CreateBackup { name }
            | Command::Restore { name } => fold(name),
            Command::RenameDb { from, to } | Command::CopyDb { from, to } => {
                fold(from);
                fold(to);
            }
            Command::Stats { pattern } => fold(pattern),
            Command::Grant {
                resource: Some(resource),
                ..
            } => fold(resource),
            _ => {}
        }
        self
    }
}
