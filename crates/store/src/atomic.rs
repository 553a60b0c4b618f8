//! Atomic update buffer.
//!
//! A container for structural updates against one resource, collected
//! while a command executes and applied as a single pass. Anchor
//! positions are interpreted against the resource as it was when the
//! batch started: the buffer applies entries from the highest to the
//! lowest position, so a deletion never shifts the position of any entry
//! still pending in the same batch.
//!
//! Entries may be added in any order. At most one destructive update
//! (delete or replace) may target a given position, and at most one
//! insert may anchor at a given position; violations are rejected when
//! the entry is added, before anything touches the resource.
//!
//! Application order within one position: the destructive entry first,
//! then the insert. Deleting position P and inserting at P therefore
//! lands the inserted node exactly where the deleted one was.

use std::collections::HashSet;

use talus_core::{Error, Result};
use tracing::debug;

use crate::resource::Resource;

#[derive(Debug, Clone, PartialEq, Eq)]
enum UpdateOp {
    Insert { payload: String },
    Delete,
    Replace { payload: String },
}

impl UpdateOp {
    /// Destructive updates remove or overwrite the node at their position.
    fn destructive(&self) -> bool {
        matches!(self, UpdateOp::Delete | UpdateOp::Replace { .. })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    position: usize,
    op: UpdateOp,
}

/// Buffered structural updates for one resource and one command invocation.
///
/// `add_*` methods only buffer; nothing touches the resource until
/// [`AtomicUpdates::execute`] runs.
#[derive(Debug)]
pub struct AtomicUpdates {
    entries: Vec<Entry>,
    destructive_positions: HashSet<usize>,
    insert_positions: HashSet<usize>,
    max_payload: usize,
}

impl AtomicUpdates {
    /// Creates an empty buffer enforcing the given payload limit.
    ///
    /// The limit is checked when an entry is buffered so an oversized
    /// payload fails before the batch starts applying.
    pub fn new(max_payload: usize) -> Self {
        AtomicUpdates {
            entries: Vec::new(),
            destructive_positions: HashSet::new(),
            insert_positions: HashSet::new(),
            max_payload,
        }
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards all buffered entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.destructive_positions.clear();
        self.insert_positions.clear();
    }

    /// Buffers an insert before `position`.
    pub fn add_insert(&mut self, position: usize, payload: impl Into<String>) -> Result<()> {
        let payload = payload.into();
        self.check_payload(&payload)?;
        if !self.insert_positions.insert(position) {
            return Err(Error::ConflictingUpdates { position });
        }
        self.entries.push(Entry {
            position,
            op: UpdateOp::Insert { payload },
        });
        Ok(())
    }

    /// Buffers a deletion of the node at `position`.
    pub fn add_delete(&mut self, position: usize) -> Result<()> {
        self.check_destructive(position)?;
        self.entries.push(Entry {
            position,
            op: UpdateOp::Delete,
        });
        Ok(())
    }

    /// Buffers an in-place replacement of the node at `position`.
    pub fn add_replace(&mut self, position: usize, payload: impl Into<String>) -> Result<()> {
        let payload = payload.into();
        self.check_payload(&payload)?;
        self.check_destructive(position)?;
        self.entries.push(Entry {
            position,
            op: UpdateOp::Replace { payload },
        });
        Ok(())
    }

    fn check_payload(&self, payload: &str) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload,
            });
        }
        Ok(())
    }

    fn check_destructive(&mut self, position: usize) -> Result<()> {
        if !self.destructive_positions.insert(position) {
            return Err(Error::ConflictingUpdates { position });
        }
        Ok(())
    }

    /// Applies all buffered entries to the resource in one pass.
    ///
    /// Anchors are validated against the resource's current node count
    /// before any entry is applied, so an out-of-bounds anchor leaves the
    /// resource untouched. A storage failure mid-pass stops the batch,
    /// marks the resource dirty and surfaces [`Error::Consistency`];
    /// entries applied before the failure are not rolled back since the
    /// storage layer offers no multi-entry rollback.
    ///
    /// With `optimize` set, resource statistics are only marked stale and
    /// recomputed lazily on the next read; otherwise they are recomputed
    /// inline before returning.
    ///
    /// Returns the number of applied entries. The buffer is cleared on
    /// success and retained on failure for inspection.
    pub fn execute(&mut self, resource: &mut Resource, optimize: bool) -> Result<usize> {
        let len = resource.len();
        for entry in &self.entries {
            let out_of_bounds = if entry.op.destructive() {
                entry.position >= len
            } else {
                entry.position > len
            };
            if out_of_bounds {
                return Err(Error::PositionOutOfBounds {
                    position: entry.position,
                    len,
                });
            }
        }

        // Highest position first; at equal positions the destructive entry
        // applies before the insert.
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| {
            b.position
                .cmp(&a.position)
                .then_with(|| a.op.destructive().cmp(&b.op.destructive()).reverse())
        });

        let total = ordered.len();
        let mut applied = 0;
        for entry in ordered {
            let outcome = match &entry.op {
                UpdateOp::Delete => resource.delete_at(entry.position).map(|_| ()),
                UpdateOp::Replace { payload } => {
                    resource.replace_at(entry.position, payload.clone())
                }
                UpdateOp::Insert { payload } => {
                    resource.insert_at(entry.position, payload.clone())
                }
            };
            if let Err(err) = outcome {
                resource.mark_dirty();
                return Err(Error::Consistency {
                    name: resource.name().to_string(),
                    reason: format!("batch aborted after {applied} of {total} entries: {err}"),
                });
            }
            applied += 1;
        }

        debug!(
            resource = %resource.name(),
            entries = applied,
            optimize,
            "applied atomic batch"
        );
        self.clear();
        resource.invalidate_stats();
        if !optimize {
            resource.recompute_stats();
        }
        Ok(applied)
    }
}
