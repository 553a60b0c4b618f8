//! The job pool.
//!
//! One scheduler interface for both execution styles: a synchronous run
//! executes on the caller's thread, an asynchronous submission is picked
//! up by a bounded worker pool. Both paths share the same registration,
//! state tracking and stop machinery; the only difference is whether the
//! caller awaits the outcome inline or collects it later by id.
//!
//! Asynchronous outcomes, success or failure, are captured into a result
//! cache instead of being thrown across threads. Collecting a result
//! removes it (at-most-once delivery); stopping a job with a cached
//! result evicts it.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use talus_core::{Error, Result};

use crate::id::JobId;
use crate::job::{JobHandle, JobInfo, JobSpec, JobState};

type JobBody = Box<dyn FnOnce(&JobHandle) -> Result<String> + Send + 'static>;

struct JobEntry {
    spec: JobSpec,
    state: JobState,
    handle: JobHandle,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    /// Narrowed lock sets reported by commands whose true target set is
    /// only known after partial execution. Reporting only; the grant held
    /// for execution is never narrowed.
    observed: Option<(String, String)>,
}

struct PoolInner {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    queue: Mutex<VecDeque<(JobId, JobBody)>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    next_number: AtomicU64,
    queue_capacity: usize,
    results: DashMap<JobId, Result<String>>,
}

/// Registers, schedules and tracks every command run.
pub struct JobPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPool {
    /// Creates a pool with `workers` threads (named `talus-job-0`, ...)
    /// and a pending queue bounded by `queue_capacity`.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let inner = Arc::new(PoolInner {
            jobs: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_number: AtomicU64::new(0),
            queue_capacity,
            results: DashMap::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("talus-job-{i}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn job worker thread");
            handles.push(handle);
        }

        JobPool {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Runs a job on the caller's thread, registered for visibility and
    /// cancellation like any other job. Returns the id and the outcome.
    pub fn run_sync(
        &self,
        spec: JobSpec,
        body: impl FnOnce(&JobHandle) -> Result<String>,
    ) -> (JobId, Result<String>) {
        let (id, handle) = self.register(spec, JobState::Running);
        debug!(%id, "job started inline");
        let outcome = run_body(body, &handle);

        let mut jobs = self.inner.jobs.lock();
        if let Some(entry) = jobs.get_mut(&id) {
            entry.ended_at = Some(Utc::now());
            entry.state = match &outcome {
                Ok(_) => JobState::Done,
                Err(e) if e.is_interrupted() => JobState::Cancelled,
                Err(_) => JobState::Failed,
            };
        }
        (id, outcome)
    }

    /// Schedules a job on the worker pool and returns its id immediately.
    ///
    /// The job is `Queued` until a worker picks it up. Fails with
    /// [`Error::QueueFull`] when the pending queue is at capacity or the
    /// pool has been shut down.
    pub fn submit(
        &self,
        spec: JobSpec,
        body: impl FnOnce(&JobHandle) -> Result<String> + Send + 'static,
    ) -> Result<JobId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::QueueFull);
        }

        // The capacity check and the push happen under one queue lock so
        // concurrent submissions cannot overshoot the bound. Registration
        // nests the jobs lock inside the queue lock; this is the only
        // place the two are held together.
        let id = {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.queue_capacity {
                return Err(Error::QueueFull);
            }
            let (id, _) = self.register(spec, JobState::Queued);
            queue.push_back((id, Box::new(body)));
            id
        };
        self.inner.work_ready.notify_one();
        debug!(%id, "job queued");
        Ok(id)
    }

    fn register(&self, spec: JobSpec, state: JobState) -> (JobId, JobHandle) {
        let id = JobId::new(self.inner.next_number.fetch_add(1, Ordering::SeqCst) + 1);
        let handle = JobHandle::new(id);
        let entry = JobEntry {
            spec,
            state,
            handle: handle.clone(),
            started_at: Utc::now(),
            ended_at: None,
            observed: None,
        };
        self.inner.jobs.lock().insert(id, entry);
        (id, handle)
    }

    /// Ids of all queued, running and result-holding jobs, sorted
    /// chronologically.
    pub fn list(&self) -> Vec<JobId> {
        let jobs = self.inner.jobs.lock();
        let mut ids: Vec<JobId> = jobs
            .iter()
            .filter(|(_, entry)| entry.state.is_live())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of one job, or `None` for an unknown id.
    pub fn describe(&self, id: JobId) -> Option<JobInfo> {
        let jobs = self.inner.jobs.lock();
        let entry = jobs.get(&id)?;
        let ended = entry.ended_at;
        let duration = ended.unwrap_or_else(Utc::now) - entry.started_at;
        let (reads, writes) = match &entry.observed {
            Some((reads, writes)) => (reads.clone(), writes.clone()),
            None => (entry.spec.reads.clone(), entry.spec.writes.clone()),
        };
        Some(JobInfo {
            id,
            kind: entry.spec.kind.clone(),
            state: entry.state,
            user: entry.spec.user.clone(),
            started_at: entry.started_at,
            ended_at: ended,
            duration_ms: duration.num_milliseconds(),
            reads,
            writes,
            progress: entry.handle.progress(),
            has_result: self.inner.results.contains_key(&id),
        })
    }

    /// Signals cooperative cancellation.
    ///
    /// A queued job moves directly to `Cancelled` and never starts. A
    /// running job has its token flagged; the body observes it at its
    /// next checkpoint. A job holding a cached result has the result
    /// evicted. Returns whether a live job was found and signalled;
    /// stopping an unknown, terminal or non-stoppable job is a no-op
    /// reporting `false`.
    pub fn stop(&self, id: JobId) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if !entry.spec.stoppable {
            debug!(%id, "stop ignored: job is not stoppable");
            return false;
        }
        match entry.state {
            JobState::Queued => {
                entry.state = JobState::Cancelled;
                entry.ended_at = Some(Utc::now());
                entry.handle.token().cancel();
                info!(%id, "cancelled before start");
                true
            }
            JobState::Running => {
                entry.handle.token().cancel();
                info!(%id, "stop signalled");
                true
            }
            JobState::Cached => {
                let outcome = self.inner.results.remove(&id);
                if let Some((_, outcome)) = &outcome {
                    entry.state = match outcome {
                        Ok(_) => JobState::Done,
                        Err(_) => JobState::Failed,
                    };
                    info!(%id, "cached result evicted");
                }
                outcome.is_some()
            }
            _ => false,
        }
    }

    /// Collects the cached outcome of a completed asynchronous job.
    ///
    /// Removes the cached entry as a side effect, so a result is
    /// delivered at most once; a second call reports the job as not
    /// found. A cached failure is surfaced as that failure. While the
    /// job is still queued or running this reports
    /// [`Error::JobStillRunning`] without side effects.
    pub fn collect(&self, id: JobId) -> Result<String> {
        if let Some((_, outcome)) = self.inner.results.remove(&id) {
            let mut jobs = self.inner.jobs.lock();
            if let Some(entry) = jobs.get_mut(&id) {
                entry.state = match &outcome {
                    Ok(_) => JobState::Done,
                    Err(_) => JobState::Failed,
                };
            }
            return outcome;
        }
        let jobs = self.inner.jobs.lock();
        match jobs.get(&id) {
            Some(entry) if matches!(entry.state, JobState::Queued | JobState::Running) => {
                Err(Error::JobStillRunning { id: id.to_string() })
            }
            _ => Err(Error::JobNotFound { id: id.to_string() }),
        }
    }

    /// Records the narrowed lock sets of a job for reporting.
    ///
    /// Used by commands whose true target set is only known after partial
    /// execution; the conservative grant taken up front stays in force.
    pub fn narrow_observed(&self, id: JobId, reads: String, writes: String) -> bool {
        let mut jobs = self.inner.jobs.lock();
        match jobs.get_mut(&id) {
            Some(entry) => {
                entry.observed = Some((reads, writes));
                true
            }
            None => false,
        }
    }

    /// Shuts the pool down: workers drain the pending queue and exit.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        // Lock the queue before notifying so a worker between its
        // shutdown check and its wait cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        // Anything still queued can never run now; dropping the bodies
        // releases whatever they captured.
        self.inner.queue.lock().clear();
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_body(body: impl FnOnce(&JobHandle) -> Result<String>, handle: &JobHandle) -> Result<String> {
    match catch_unwind(AssertUnwindSafe(|| body(handle))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            error!(%reason, "job body panicked");
            Err(Error::Io {
                reason: format!("job panicked: {reason}"),
            })
        }
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        let (id, body) = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(item) = queue.pop_front() {
                    break item;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        // A job cancelled while queued must never start; its body is
        // dropped unexecuted.
        let handle = {
            let mut jobs = inner.jobs.lock();
            match jobs.get_mut(&id) {
                Some(entry) if entry.state == JobState::Queued => {
                    entry.state = JobState::Running;
                    Some(entry.handle.clone())
                }
                _ => None,
            }
        };
        let Some(handle) = handle else {
            debug!(%id, "skipping cancelled job");
            continue;
        };

        debug!(%id, "job started");
        let outcome = run_body(body, &handle);

        let mut jobs = inner.jobs.lock();
        if let Some(entry) = jobs.get_mut(&id) {
            entry.ended_at = Some(Utc::now());
            if matches!(&outcome, Err(e) if e.is_interrupted()) {
                entry.state = JobState::Cancelled;
                info!(%id, "job interrupted");
            } else {
                entry.state = JobState::Cached;
                inner.results.insert(id, outcome);
            }
        }
    }
}
