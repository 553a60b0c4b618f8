//! In-memory node table of a resource.
//!
//! A resource holds an ordered sequence of nodes addressed by position.
//! Structural edits shift the positions of all following nodes, which is
//! why multi-edit commands go through the atomic update buffer instead of
//! editing the table directly.

use serde::{Deserialize, Serialize};
use talus_core::{Error, Result};
use tracing::warn;

/// Default maximum number of nodes per resource.
pub const DEFAULT_MAX_NODES: usize = 1_000_000;

/// One node of a resource: a stable id plus its payload.
///
/// Ids are assigned monotonically per resource and survive position shifts,
/// so two observations of the same id refer to the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable per-resource node id.
    pub id: u64,
    /// Node payload.
    pub payload: String,
}

/// Lazily recomputed resource statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Number of nodes in the table.
    pub node_count: usize,
    /// Total payload size in bytes.
    pub payload_bytes: usize,
}

/// A named, mutable, long-lived node table.
///
/// The table enforces two storage limits: a per-node payload size and a
/// node-count capacity. Payload size is checked when an edit is buffered;
/// capacity is only known at application time, so a capacity violation is
/// a storage-level failure surfaced by the atomic update buffer.
#[derive(Debug)]
pub struct Resource {
    name: String,
    nodes: Vec<Node>,
    next_id: u64,
    dirty: bool,
    stats: Option<ResourceStats>,
    max_payload: usize,
    max_nodes: usize,
}

impl Resource {
    /// Creates an empty resource.
    pub fn new(name: impl Into<String>, max_payload: usize) -> Self {
        Self::with_limits(name, max_payload, DEFAULT_MAX_NODES)
    }

    /// Creates an empty resource with an explicit node capacity.
    pub fn with_limits(name: impl Into<String>, max_payload: usize, max_nodes: usize) -> Self {
        Resource {
            name: name.into(),
            nodes: Vec::new(),
            next_id: 0,
            dirty: false,
            stats: Some(ResourceStats {
                node_count: 0,
                payload_bytes: 0,
            }),
            max_payload,
            max_nodes,
        }
    }

    /// Creates a resource pre-filled with the given payloads.
    pub fn with_payloads(
        name: impl Into<String>,
        payloads: Vec<String>,
        max_payload: usize,
    ) -> Result<Self> {
        let mut resource = Self::new(name, max_payload);
        for payload in payloads {
            let pos = resource.len();
            resource.insert_at(pos, payload)?;
        }
        Ok(resource)
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at the given position, if any.
    pub fn node(&self, position: usize) -> Option<&Node> {
        self.nodes.get(position)
    }

    /// Iterates over payloads in position order.
    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.payload.as_str())
    }

    /// Whether the resource was flagged for a consistency check.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flags the resource as needing a consistency check.
    pub fn mark_dirty(&mut self) {
        if !self.dirty {
            warn!(resource = %self.name, "resource flagged for consistency check");
        }
        self.dirty = true;
    }

    /// Re-derives the statistics from the table and clears the dirty flag.
    ///
    /// The node table itself is the source of truth, so a full recount is
    /// all the check needs; derived state invalidated by a partial batch is
    /// rebuilt here.
    pub fn run_consistency_check(&mut self) -> ResourceStats {
        self.dirty = false;
        self.recompute_stats()
    }

    /// Current statistics, recomputed if stale.
    pub fn stats(&mut self) -> ResourceStats {
        match self.stats {
            Some(stats) => stats,
            None => self.recompute_stats(),
        }
    }

    /// Marks the statistics stale for lazy recomputation.
    pub fn invalidate_stats(&mut self) {
        self.stats = None;
    }

    /// Recomputes the statistics inline.
    pub fn recompute_stats(&mut self) -> ResourceStats {
        let stats = ResourceStats {
            node_count: self.nodes.len(),
            payload_bytes: self.nodes.iter().map(|n| n.payload.len()).sum(),
        };
        self.stats = Some(stats);
        stats
    }

    /// Point-in-time payload snapshot, used by backups and copies.
    pub fn snapshot(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.payload.clone()).collect()
    }

    /// Replaces the whole table with the given payloads.
    ///
    /// Node ids are reassigned; the dirty flag is cleared since the new
    /// content is complete by construction.
    pub fn restore_from(&mut self, payloads: Vec<String>) -> Result<()> {
        let mut nodes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            self.check_payload(&payload)?;
            nodes.push(Node {
                id: self.next_id,
                payload,
            });
            self.next_id += 1;
        }
        self.nodes = nodes;
        self.dirty = false;
        self.invalidate_stats();
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

    /// Inserts a node before `position` (`position == len` appends).
    pub(crate) fn insert_at(&mut self, position: usize, payload: String) -> Result<()> {
        if position > self.nodes.len() {
            return Err(Error::PositionOutOfBounds {
                position,
                len: self.nodes.len(),
            });
        }
        self.check_payload(&payload)?;
        if self.nodes.len() >= self.max_nodes {
            return Err(Error::Io {
                reason: format!(
                    "resource {} is at capacity ({} nodes)",
                    self.name, self.max_nodes
                ),
            });
        }
        self.nodes.insert(
            position,
            Node {
                id: self.next_id,
                payload,
            },
        );
        self.next_id += 1;
        self.invalidate_stats();
        Ok(())
    }

    /// Removes and returns the node at `position`.
    pub(crate) fn delete_at(&mut self, position: usize) -> Result<Node> {
        if position >= self.nodes.len() {
            return Err(Error::PositionOutOfBounds {
                position,
                len: self.nodes.len(),
            });
        }
        let node = self.nodes.remove(position);
        self.invalidate_stats();
        Ok(node)
    }

    /// Replaces the payload of the node at `position` in place.
    ///
    /// The node keeps its id: a replace is a value change, not a
    /// delete-plus-insert.
    pub(crate) fn replace_at(&mut self, position: usize, payload: String) -> Result<()> {
        if position >= self.nodes.len() {
            return Err(Error::PositionOutOfBounds {
                position,
                len: self.nodes.len(),
            });
        }
        self.check_payload(&payload)?;
        self.nodes[position].payload = payload;
        self.invalidate_stats();
        Ok(())
    }
}
