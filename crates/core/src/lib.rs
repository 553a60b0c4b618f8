//! Core types for the Talus command execution core
//!
//! This crate defines the foundational types shared by every layer:
//! - Permission: total-ordered permission levels gating every command
//! - Resource names: validation, normalization and glob patterns
//! - Options: engine configuration with frozen defaults
//! - CancelToken / Progress: cooperative cancellation and progress reporting
//! - Error: the error taxonomy for the whole workspace

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod name;
pub mod options;
pub mod perm;

pub use cancel::{CancelToken, Progress};
pub use error::{Error, Result};
pub use name::{matches_pattern, normalize_name, validate_name, MAX_NAME_LEN};
pub use options::Options;
pub use perm::Permission;
