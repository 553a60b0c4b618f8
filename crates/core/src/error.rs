//! Error types for the Talus command execution core
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Errors are structured: each variant carries typed fields so front ends
//! can inspect *why* a command or job ended, and serializable so the jobs
//! surface can report them. Cancellation is represented by
//! [`Error::Interrupted`] and is a distinct outcome, not a failure: the
//! executor reports it as an interrupted status line.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::perm::Permission;

/// Result type alias for Talus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the command execution core.
///
/// # Categories
///
/// | Category | Variants | Reported |
/// |----------|----------|----------|
/// | Permission | `PermissionDenied` | before any lock or resource access |
/// | Validation | `Validation`, `PayloadTooLarge`, `PositionOutOfBounds`, `ConflictingUpdates` | before lock acquisition |
/// | Resource state | `ResourceNotFound`, `ResourceInUse`, `ResourceExists`, `NoResourceOpen` | after a lightweight check |
/// | Execution | `Io`, `Interrupted` | during the command body, locks released |
/// | Jobs | `JobNotFound`, `JobStillRunning`, `QueueFull` | by the scheduler surface |
/// | Consistency | `Consistency` | non-fatal: resource flagged for a check |
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum Error {
    /// Caller's effective permission is below the command's requirement.
    #[error("{required} permission required")]
    PermissionDenied {
        /// Minimum permission the command declares.
        required: Permission,
    },

    /// Malformed argument (bad name pattern, missing required argument).
    #[error("invalid argument: {reason}")]
    Validation {
        /// Why the argument was rejected.
        reason: String,
    },

    /// The named resource does not exist.
    #[error("resource not found: {name}")]
    ResourceNotFound {
        /// Requested resource name.
        name: String,
    },

    /// The resource is pinned by another session while exclusivity was required.
    #[error("resource in use: {name}")]
    ResourceInUse {
        /// Pinned resource name.
        name: String,
    },

    /// A resource with this name already exists.
    #[error("resource already exists: {name}")]
    ResourceExists {
        /// Conflicting resource name.
        name: String,
    },

    /// The command requires an open resource but the session has none.
    #[error("no resource is currently open")]
    NoResourceOpen,

    /// Node payload exceeds the configured limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Offered payload size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A buffered update anchors at a position outside the resource.
    #[error("position {position} out of bounds for resource of {len} nodes")]
    PositionOutOfBounds {
        /// Anchor position as recorded at entry creation.
        position: usize,
        /// Node count of the resource at batch application.
        len: usize,
    },

    /// Two destructive updates target the same position in one batch.
    #[error("conflicting updates at position {position}")]
    ConflictingUpdates {
        /// Position targeted by more than one destructive entry.
        position: usize,
    },

    /// Cooperative cancellation was observed at a checkpoint.
    #[error("interrupted")]
    Interrupted,

    /// No queued, running or cached job with this id.
    #[error("job not found: {id}")]
    JobNotFound {
        /// Requested job id.
        id: String,
    },

    /// The job has not finished yet; no result can be collected.
    #[error("job is still running: {id}")]
    JobStillRunning {
        /// Requested job id.
        id: String,
    },

    /// The bounded async job queue is at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// I/O failure from a lower-level collaborator.
    #[error("I/O error: {reason}")]
    Io {
        /// Underlying failure description.
        reason: String,
    },

    /// A batch was partially applied; the resource needs a consistency check.
    ///
    /// Non-fatal: the resource is flagged as dirty rather than treated as
    /// corrupted outright.
    #[error("resource {name} needs a consistency check: {reason}")]
    Consistency {
        /// Affected resource name.
        name: String,
        /// What went wrong mid-batch.
        reason: String,
    },
}

impl Error {
    /// Whether this error represents cooperative cancellation rather than a
    /// genuine failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_permission() {
        let err = Error::PermissionDenied {
            required: Permission::Create,
        };
        assert_eq!(err.to_string(), "create permission required");
    }

    #[test]
    fn test_display_resource_state() {
        assert!(Error::ResourceNotFound { name: "docs".into() }
            .to_string()
            .contains("docs"));
        assert!(Error::ResourceInUse { name: "docs".into() }
            .to_string()
            .contains("in use"));
    }

    #[test]
    fn test_display_position() {
        let err = Error::PositionOutOfBounds {
            position: 12,
            len: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn test_interrupted_is_not_a_failure_marker() {
        assert!(Error::Interrupted.is_interrupted());
        assert!(!Error::QueueFull.is_interrupted());
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let err = Error::Consistency {
            name: "docs".into(),
            reason: "batch aborted after entry 3".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
