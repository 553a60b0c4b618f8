//! Job records and lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use talus_core::{CancelToken, Progress, Result};

use crate::id::JobId;

/// Lifecycle state of a job.
///
/// ```text
/// Queued → Running → Cached (async only) → Done | Failed
///                  → Done | Failed | Cancelled
/// ```
///
/// A queued job that is stopped moves directly to `Cancelled` and never
/// runs. `Cached` means the job finished and its outcome (success or
/// failure) waits in the result cache; collecting resolves the state to
/// `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, waiting for a worker.
    Queued,
    /// Currently executing.
    Running,
    /// Finished asynchronously; outcome waiting in the result cache.
    Cached,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
    /// Stopped cooperatively, or cancelled before it started.
    Cancelled,
}

impl JobState {
    /// Whether the job still occupies the scheduler (queued, running, or
    /// holding a cached result).
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running | JobState::Cached)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Cached => "cached",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Static description of a job, captured at registration.
///
/// The lock sets are carried as display strings: the scheduler reports
/// them but never interprets them.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Command type name, e.g. `copy-db`.
    pub kind: String,
    /// Owning user.
    pub user: String,
    /// Declared read lock set.
    pub reads: String,
    /// Declared write lock set.
    pub writes: String,
    /// Whether cooperative cancellation is meaningful for this job.
    pub stoppable: bool,
}

/// Handle passed into a job body: the job's own id, the cancellation
/// token and the shared progress fraction.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    token: CancelToken,
    progress: Progress,
}

impl JobHandle {
    /// Fresh handle with an uncancelled token and zero progress.
    pub fn new(id: JobId) -> Self {
        JobHandle {
            id,
            token: CancelToken::new(),
            progress: Progress::new(),
        }
    }

    /// The id of the job this handle belongs to.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Poll point; returns `Err(Error::Interrupted)` once stopped.
    pub fn checkpoint(&self) -> Result<()> {
        self.token.checkpoint()
    }

    /// Records the completion fraction of a long-running body.
    pub fn set_progress(&self, fraction: f64) {
        self.progress.set(fraction);
    }

    /// The most recently reported completion fraction.
    pub fn progress(&self) -> f64 {
        self.progress.get()
    }
}

/// Snapshot of one job for the administration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job id.
    pub id: JobId,
    /// Command type name.
    pub kind: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Owning user.
    pub user: String,
    /// Registration time.
    pub started_at: DateTime<Utc>,
    /// Completion time; `None` while queued or running.
    pub ended_at: Option<DateTime<Utc>>,
    /// Total duration for finished jobs, elapsed time otherwise, in
    /// milliseconds.
    pub duration_ms: i64,
    /// Declared read lock set.
    pub reads: String,
    /// Declared write lock set.
    pub writes: String,
    /// Completion fraction reported by the body, 0..1.
    pub progress: f64,
    /// Whether an uncollected result is waiting.
    pub has_result: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_states() {
        assert!(JobState::Queued.is_live());
        assert!(JobState::Running.is_live());
        assert!(JobState::Cached.is_live());
        assert!(!JobState::Done.is_live());
        assert!(!JobState::Failed.is_live());
        assert!(!JobState::Cancelled.is_live());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::Cached.to_string(), "cached");
        assert_eq!(JobState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_handle_checkpoint() {
        let handle = JobHandle::new(JobId::new(1));
        assert!(handle.checkpoint().is_ok());
        handle.token().cancel();
        assert!(handle.checkpoint().is_err());
    }

    #[test]
    fn test_handle_progress_shared_across_clones() {
        let handle = JobHandle::new(JobId::new(1));
        let body_view = handle.clone();
        body_view.set_progress(0.75);
        assert_eq!(handle.progress(), 0.75);
        assert_eq!(body_view.id(), JobId::new(1));
    }
}
