//! Cooperative cancellation and progress reporting.
//!
//! Cancellation is a polled flag: a stop signal sets it, and every
//! long-running loop checks it at unit-of-work boundaries via
//! [`CancelToken::checkpoint`]. Commands that are not stoppable simply
//! never read the token.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Cheap-to-clone cancellation handle shared between a job and its command.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Poll point for long-running loops.
    ///
    /// Returns `Err(Error::Interrupted)` once cancellation has been
    /// requested, so a `?` at each unit-of-work boundary unwinds the
    /// command body cleanly.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Shared progress fraction for long-running commands.
///
/// Stored as `f64` bits in an atomic so writers never block readers.
/// Commands that cannot estimate progress leave it at 0 and rely on
/// elapsed-time reporting.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    bits: Arc<AtomicU64>,
}

impl Progress {
    /// Creates a progress handle starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current completion fraction, clamped to 0..1.
    pub fn set(&self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.bits.store(clamped.to_bits(), Ordering::Release);
    }

    /// Reads the most recently recorded fraction.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
