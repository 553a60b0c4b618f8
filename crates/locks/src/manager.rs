//! The lock manager.
//!
//! Grants whole lock requests atomically: a caller either receives every
//! lock in its declaration or blocks without holding any. Waiting
//! requests are served in strict FIFO order, so a writer queued behind
//! readers cannot be starved by later readers. The number of concurrently
//! granted requests is additionally bounded by the configured parallel
//! limit; requests beyond the limit queue like any other.
//!
//! Acquisition never fails, it blocks until compatible. Dropping the
//! returned [`LockGuard`] releases the grant and wakes the queue.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::request::{LockRequest, LockScope, LockTarget};

#[derive(Debug, Default)]
struct TargetLocks {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct LockState {
    /// Per-target grant state. Entries are removed once free, so presence
    /// of a key means the target is read- or write-held.
    targets: HashMap<LockTarget, TargetLocks>,
    /// Number of targets currently write-held.
    writer_count: usize,
    /// Number of active global read grants.
    global_readers: usize,
    /// Whether a global write grant is active.
    global_writer: bool,
    /// Number of currently granted requests.
    holders: usize,
    /// FIFO queue of waiting tickets.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl LockState {
    /// Whether the request is compatible with every active grant.
    ///
    /// Compatibility is only checked against *other* holders; a single
    /// request may combine a global read with explicit writes.
    fn compatible(&self, request: &LockRequest) -> bool {
        match request.write() {
            // A global write excludes everything.
            LockScope::Global => {
                self.targets.is_empty() && self.global_readers == 0 && !self.global_writer
            }
            LockScope::Targets(write_list) => {
                // Any write anywhere is excluded by an active global read.
                if !write_list.is_empty() && (self.global_readers > 0 || self.global_writer) {
                    return false;
                }
                // A write target must be entirely free.
                if write_list.iter().any(|t| self.targets.contains_key(t)) {
                    return false;
                }
                match request.read() {
                    LockScope::Global => self.writer_count == 0 && !self.global_writer,
                    LockScope::Targets(read_list) => {
                        if !read_list.is_empty() && self.global_writer {
                            return false;
                        }
                        !read_list
                            .iter()
                            .any(|t| self.targets.get(t).is_some_and(|e| e.writer))
                    }
                }
            }
        }
    }

    fn grant(&mut self, request: &LockRequest) {
        match request.write() {
            LockScope::Global => self.global_writer = true,
            LockScope::Targets(list) => {
                for target in list.iter() {
                    let entry = self.targets.entry(target.clone()).or_default();
                    entry.writer = true;
                    self.writer_count += 1;
                }
            }
        }
        match request.read() {
            LockScope::Global => self.global_readers += 1,
            LockScope::Targets(list) => {
                for target in list.iter() {
                    self.targets.entry(target.clone()).or_default().readers += 1;
                }
            }
        }
        self.holders += 1;
    }

    fn release(&mut self, request: &LockRequest) {
        match request.write() {
            LockScope::Global => self.global_writer = false,
            LockScope::Targets(list) => {
                for target in list.iter() {
                    if let Some(entry) = self.targets.get_mut(target) {
                        entry.writer = false;
                        self.writer_count -= 1;
                        if entry.readers == 0 {
                            self.targets.remove(target);
                        }
                    }
                }
            }
        }
        match request.read() {
            LockScope::Global => self.global_readers -= 1,
            LockScope::Targets(list) => {
                for target in list.iter() {
                    if let Some(entry) = self.targets.get_mut(target) {
                        entry.readers -= 1;
                        if entry.readers == 0 && !entry.writer {
                            self.targets.remove(target);
                        }
                    }
                }
            }
        }
        self.holders -= 1;
    }
}

/// Grants and releases lock requests with strict FIFO fairness.
pub struct LockManager {
    state: Mutex<LockState>,
    grantable: Condvar,
    parallel: usize,
}

impl LockManager {
    /// Creates a manager allowing at most `parallel` concurrent holders.
    pub fn new(parallel: usize) -> Self {
        LockManager {
            state: Mutex::new(LockState::default()),
            grantable: Condvar::new(),
            parallel: parallel.max(1),
        }
    }

    /// Acquires the full request, blocking until it is grantable.
    ///
    /// The request is granted only when it is compatible with all current
    /// grants, the holder limit has room, and no older request is still
    /// waiting. The caller must not nest acquisitions: a command declares
    /// everything it needs in one request.
    pub fn acquire(&self, request: LockRequest) -> LockGuard<'_> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        trace!(ticket, read = %request.read(), write = %request.write(), "lock request queued");
        loop {
            let at_head = state.queue.front() == Some(&ticket);
            if at_head && state.holders < self.parallel && state.compatible(&request) {
                state.queue.pop_front();
                state.grant(&request);
                break;
            }
            self.grantable.wait(&mut state);
        }
        drop(state);
        // The next queued request may be grantable alongside this one.
        self.grantable.notify_all();
        trace!(ticket, "lock request granted");
        LockGuard {
            manager: self,
            request,
        }
    }

    fn release(&self, request: &LockRequest) {
        let mut state = self.state.lock();
        state.release(request);
        drop(state);
        self.grantable.notify_all();
    }

    /// Number of currently granted requests, for diagnostics.
    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }

    /// Total number of requests ever queued, for diagnostics: a command
    /// rejected before lock acquisition leaves this count untouched.
    pub fn requests(&self) -> u64 {
        self.state.lock().next_ticket
    }
}

/// An active grant. Dropping the guard releases every lock it holds.
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    request: LockRequest,
}

impl LockGuard<'_> {
    /// The normalized request this guard holds.
    pub fn request(&self) -> &LockRequest {
        &self.request
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.request);
    }
}
