//! Lock targets, lock lists and lock requests.
//!
//! A lock target is either a named resource or one of a small set of
//! fixed pseudo-resources representing cross-cutting exclusive zones.
//! Targets have one total order shared by every caller: pseudo-resources
//! first in declaration order, then resource names lexicographically.
//! The global flag sorts above everything and dominates any explicit set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One lockable target.
///
/// The derived `Ord` is the canonical acquisition order: pseudo-resources
/// in declaration order, then named resources sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockTarget {
    /// The caller's currently open resource, resolved at declaration time.
    Context,
    /// Server-wide metadata: users, sessions, jobs.
    Admin,
    /// Backup snapshots.
    Backup,
    /// The resource catalog itself.
    Repo,
    /// The user store.
    Users,
    /// Event notification state.
    Events,
    /// A named resource.
    Name(String),
}

impl LockTarget {
    /// Named resource target.
    pub fn name(name: impl Into<String>) -> Self {
        LockTarget::Name(name.into())
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::Context => f.write_str("$context"),
            LockTarget::Admin => f.write_str("$admin"),
            LockTarget::Backup => f.write_str("$backup"),
            LockTarget::Repo => f.write_str("$repo"),
            LockTarget::Users => f.write_str("$users"),
            LockTarget::Events => f.write_str("$events"),
            LockTarget::Name(name) => f.write_str(name),
        }
    }
}

/// A sorted, deduplicated list of lock targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockList {
    targets: Vec<LockTarget>,
}

impl LockList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target; duplicates are removed by [`LockList::finish`].
    pub fn add(&mut self, target: LockTarget) -> &mut Self {
        self.targets.push(target);
        self
    }

    /// Sorts into the canonical order and removes duplicates.
    pub fn finish(&mut self) {
        self.targets.sort();
        self.targets.dedup();
    }

    /// Removes every target contained in `other`.
    pub fn remove_all(&mut self, other: &LockList) {
        self.targets.retain(|t| !other.contains(t));
    }

    /// Whether the list contains the target.
    pub fn contains(&self, target: &LockTarget) -> bool {
        self.targets.contains(target)
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterates in canonical order (after [`LockList::finish`]).
    pub fn iter(&self) -> impl Iterator<Item = &LockTarget> {
        self.targets.iter()
    }
}

impl FromIterator<LockTarget> for LockList {
    fn from_iter<I: IntoIterator<Item = LockTarget>>(iter: I) -> Self {
        let mut list = LockList {
            targets: iter.into_iter().collect(),
        };
        list.finish();
        list
    }
}

impl fmt::Display for LockList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for target in &self.targets {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{target}")?;
            first = false;
        }
        Ok(())
    }
}

/// One scope (read or write) of a lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockScope {
    /// All resources of this kind, including ones not yet known.
    Global,
    /// An explicit target set.
    Targets(LockList),
}

impl LockScope {
    /// Empty explicit scope.
    pub fn none() -> Self {
        LockScope::Targets(LockList::new())
    }

    /// Whether this scope locks nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            LockScope::Global => false,
            LockScope::Targets(list) => list.is_empty(),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockScope::Global => f.write_str("(global)"),
            LockScope::Targets(list) => write!(f, "{list}"),
        }
    }
}

/// The full lock declaration of one command: a read scope and a write
/// scope, acquired together as one atomic set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    read: LockScope,
    write: LockScope,
}

impl LockRequest {
    /// Builds a normalized request.
    ///
    /// Normalization enforces two rules. Write subsumes read: a target in
    /// both explicit scopes is granted write-only, which also removes
    /// self-deadlock. Global write dominates: with a global write scope
    /// the read scope is redundant and cleared.
    pub fn new(read: LockScope, mut write: LockScope) -> Self {
        if let LockScope::Targets(list) = &mut write {
            list.finish();
        }
        let read = match (read, &write) {
            (_, LockScope::Global) => LockScope::none(),
            (LockScope::Global, _) => LockScope::Global,
            (LockScope::Targets(mut list), LockScope::Targets(write_list)) => {
                list.finish();
                list.remove_all(write_list);
                LockScope::Targets(list)
            }
        };
        LockRequest { read, write }
    }

    /// Read-only request over the given targets.
    pub fn read_targets<I: IntoIterator<Item = LockTarget>>(targets: I) -> Self {
        Self::new(targets.into_iter().collect::<LockList>().into(), LockScope::none())
    }

    /// Write request over the given targets.
    pub fn write_targets<I: IntoIterator<Item = LockTarget>>(targets: I) -> Self {
        Self::new(LockScope::none(), targets.into_iter().collect::<LockList>().into())
    }

    /// Global read request.
    pub fn read_global() -> Self {
        Self::new(LockScope::Global, LockScope::none())
    }

    /// Global write request.
    pub fn write_global() -> Self {
        Self::new(LockScope::none(), LockScope::Global)
    }

    /// The normalized read scope.
    pub fn read(&self) -> &LockScope {
        &self.read
    }

    /// The normalized write scope.
    pub fn write(&self) -> &LockScope {
        &self.write
    }

    /// Whether the request locks nothing at all.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}

impl From<LockList> for LockScope {
    fn from(list: LockList) -> Self {
        LockScope::Targets(list)
    }
}
