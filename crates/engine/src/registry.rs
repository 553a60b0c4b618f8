//! Resource registry.
//!
//! Tracks which named resources exist, which sessions hold pins on them,
//! and the backup snapshots taken from them. The pin table is the single
//! source of truth for "is this resource safe to destroy": every open,
//! close and destructive operation goes through one registry-wide
//! critical section. Opens and closes are rare compared to command
//! execution, so a single mutex is sufficient here; resource *content*
//! is protected by the lock manager, not by this table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use talus_core::{matches_pattern, Error, Options, Result};
use talus_store::{Resource, ResourceStats};

/// Identifies one front-end session.
pub type SessionId = Uuid;

struct ResourceEntry {
    resource: Arc<Mutex<Resource>>,
    /// Pin counts per session. An entry is removed when its count hits 0.
    pins: HashMap<SessionId, usize>,
}

impl ResourceEntry {
    fn total_pins(&self) -> usize {
        self.pins.values().sum()
    }

    fn foreign_pins(&self, session: SessionId) -> usize {
        self.pins
            .iter()
            .filter(|(s, _)| **s != session)
            .map(|(_, n)| *n)
            .sum()
    }
}

#[derive(Default)]
struct RegistryInner {
    resources: HashMap<String, ResourceEntry>,
    backups: HashMap<String, Vec<String>>,
}

/// Catalog of named resources with pin counts and backup snapshots.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    max_payload: usize,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new(options: &Options) -> Self {
        Registry {
            inner: Mutex::new(RegistryInner::default()),
            max_payload: options.max_payload_bytes,
        }
    }

    /// Creates a resource pre-filled with the given payloads.
    pub fn create(&self, name: &str, payloads: Vec<String>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.resources.contains_key(name) {
            return Err(Error::ResourceExists { name: name.into() });
        }
        let resource = Resource::with_payloads(name, payloads, self.max_payload)?;
        inner.resources.insert(
            name.to_string(),
            ResourceEntry {
                resource: Arc::new(Mutex::new(resource)),
                pins: HashMap::new(),
            },
        );
        info!(resource = name, "resource created");
        Ok(())
    }

    /// Whether a resource with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().resources.contains_key(name)
    }

    /// All resource names, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner.resources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resource names matching a glob pattern, sorted.
    pub fn names_matching(&self, pattern: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .resources
            .keys()
            .filter(|name| matches_pattern(name, pattern))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Shared handle to the content of a resource.
    pub fn resource(&self, name: &str) -> Result<Arc<Mutex<Resource>>> {
        let inner = self.inner.lock();
        inner
            .resources
            .get(name)
            .map(|entry| Arc::clone(&entry.resource))
            .ok_or_else(|| Error::ResourceNotFound { name: name.into() })
    }

    /// Pins a resource for a session. The pin is released when the
    /// returned handle is dropped.
    ///
    /// Takes the shared registry handle so the pin can outlive the
    /// caller's borrow.
    pub fn pin(registry: &Arc<Registry>, name: &str, session: SessionId) -> Result<PinHandle> {
        let mut inner = registry.inner.lock();
        let entry = inner
            .resources
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound { name: name.into() })?;
        *entry.pins.entry(session).or_insert(0) += 1;
        debug!(resource = name, %session, "resource pinned");
        Ok(PinHandle {
            registry: Arc::clone(registry),
            name: name.to_string(),
            session,
        })
    }

    fn unpin(&self, name: &str, session: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.resources.get_mut(name) {
            if let Some(count) = entry.pins.get_mut(&session) {
                *count -= 1;
                if *count == 0 {
                    entry.pins.remove(&session);
                }
                debug!(resource = name, %session, "resource unpinned");
            }
        }
    }

    /// Total pin count of a resource; 0 for unknown names.
    pub fn pin_count(&self, name: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .resources
            .get(name)
            .map(ResourceEntry::total_pins)
            .unwrap_or(0)
    }

    /// Whether any session other than `session` holds a pin.
    pub fn pinned_by_others(&self, name: &str, session: SessionId) -> bool {
        let inner = self.inner.lock();
        inner
            .resources
            .get(name)
            .map(|entry| entry.foreign_pins(session) > 0)
            .unwrap_or(false)
    }

    /// Drops a resource and its backup-independent state.
    ///
    /// Refuses while any pin is held; the caller closes its own reference
    /// first, so remaining pins always belong to other sessions.
    pub fn drop_resource(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .resources
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound { name: name.into() })?;
        if entry.total_pins() > 0 {
            return Err(Error::ResourceInUse { name: name.into() });
        }
        inner.resources.remove(name);
        info!(resource = name, "resource dropped");
        Ok(())
    }

    /// Renames a resource. Refuses while any pin is held or the target
    /// name is taken.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.resources.contains_key(to) {
            return Err(Error::ResourceExists { name: to.into() });
        }
        let entry = inner
            .resources
            .get(from)
            .ok_or_else(|| Error::ResourceNotFound { name: from.into() })?;
        if entry.total_pins() > 0 {
            return Err(Error::ResourceInUse { name: from.into() });
        }
        let entry = inner
            .resources
            .remove(from)
            .expect("entry present under registry lock");
        inner.resources.insert(to.to_string(), entry);
        info!(from, to, "resource renamed");
        Ok(())
    }

    /// Stores a point-in-time backup snapshot of a resource.
    ///
    /// Reading does not disturb other readers, but a session that holds
    /// the resource open elsewhere could be mid-mutation, so foreign pins
    /// refuse the backup.
    pub fn backup(&self, name: &str, session: SessionId) -> Result<usize> {
        let mut inner = self.inner.lock();
        let entry = inner
            .resources
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound { name: name.into() })?;
        if entry.foreign_pins(session) > 0 {
            return Err(Error::ResourceInUse { name: name.into() });
        }
        let snapshot = entry.resource.lock().snapshot();
        let nodes = snapshot.len();
        inner.backups.insert(name.to_string(), snapshot);
        info!(resource = name, nodes, "backup created");
        Ok(nodes)
    }

    /// Whether a backup snapshot exists for this name.
    pub fn has_backup(&self, name: &str) -> bool {
        self.inner.lock().backups.contains_key(name)
    }

    /// Restores a resource from its backup snapshot, creating the
    /// resource if it no longer exists. Refuses while any pin is held.
    pub fn restore(&self, name: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let snapshot = inner
            .backups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                name: format!("{name} (backup)"),
            })?;
        let nodes = snapshot.len();
        use std::collections::hash_map::Entry;
        match inner.resources.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let entry = entry.get();
                if entry.total_pins() > 0 {
                    return Err(Error::ResourceInUse { name: name.into() });
                }
                entry.resource.lock().restore_from(snapshot)?;
            }
            Entry::Vacant(slot) => {
                let resource = Resource::with_payloads(name, snapshot, self.max_payload)?;
                slot.insert(ResourceEntry {
                    resource: Arc::new(Mutex::new(resource)),
                    pins: HashMap::new(),
                });
            }
        }
        info!(resource = name, nodes, "resource restored");
        Ok(nodes)
    }

    /// Statistics of a resource, recomputed if stale.
    pub fn stats(&self, name: &str) -> Result<ResourceStats> {
        let resource = self.resource(name)?;
        let stats = resource.lock().stats();
        Ok(stats)
    }
}

/// An open reference to a resource. Dropping the handle releases the pin.
pub struct PinHandle {
    registry: Arc<Registry>,
    name: String,
    session: SessionId,
}

impl PinHandle {
    /// Name of the pinned resource.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        self.registry.unpin(&self.name, self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(&Options::default()))
    }

    fn payloads(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("n{i}")).collect()
    }

    #[test]
    fn test_create_and_list() {
        let registry = registry();
        registry.create("docs", payloads(3)).unwrap();
        registry.create("archive", payloads(1)).unwrap();
        assert_eq!(registry.names(), vec!["archive", "docs"]);
        assert!(registry.exists("docs"));
        assert!(!registry.exists("other"));
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let registry = registry();
        registry.create("docs", vec![]).unwrap();
        assert_eq!(
            registry.create("docs", vec![]),
            Err(Error::ResourceExists { name: "docs".into() })
        );
    }

    #[test]
    fn test_pattern_listing() {
        let registry = registry();
        for name in ["docs", "docs2", "logs"] {
            registry.create(name, vec![]).unwrap();
        }
        assert_eq!(registry.names_matching("docs*"), vec!["docs", "docs2"]);
        assert_eq!(registry.names_matching("*"), vec!["docs", "docs2", "logs"]);
    }

    #[test]
    fn test_pin_counts_per_session() {
        let registry = registry();
        registry.create("docs", vec![]).unwrap();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();

        let p1 = Registry::pin(&registry, "docs", s1).unwrap();
        let p2 = Registry::pin(&registry, "docs", s1).unwrap();
        let p3 = Registry::pin(&registry, "docs", s2).unwrap();
        assert_eq!(registry.pin_count("docs"), 3);
        assert!(registry.pinned_by_others("docs", s2));

        drop(p3);
        assert!(!registry.pinned_by_others("docs", s1));
        drop(p1);
        drop(p2);
        assert_eq!(registry.pin_count("docs"), 0);
    }

    #[test]
    fn test_pin_unknown_resource() {
        let registry = registry();
        assert!(matches!(
            Registry::pin(&registry, "ghost", Uuid::new_v4()),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_drop_refused_while_pinned() {
        let registry = registry();
        registry.create("docs", payloads(2)).unwrap();
        let pin = Registry::pin(&registry, "docs", Uuid::new_v4()).unwrap();

        assert_eq!(
            registry.drop_resource("docs"),
            Err(Error::ResourceInUse { name: "docs".into() })
        );
        // Resource unchanged by the refused drop.
        assert_eq!(registry.stats("docs").unwrap().node_count, 2);

        drop(pin);
        registry.drop_resource("docs").unwrap();
        assert!(!registry.exists("docs"));
    }

    #[test]
    fn test_rename() {
        let registry = registry();
        registry.create("docs", payloads(2)).unwrap();
        registry.rename("docs", "archive").unwrap();
        assert!(!registry.exists("docs"));
        assert_eq!(registry.stats("archive").unwrap().node_count, 2);
    }

    #[test]
    fn test_rename_refused_while_pinned_or_taken() {
        let registry = registry();
        registry.create("docs", vec![]).unwrap();
        registry.create("archive", vec![]).unwrap();
        assert_eq!(
            registry.rename("docs", "archive"),
            Err(Error::ResourceExists { name: "archive".into() })
        );

        let pin = Registry::pin(&registry, "docs", Uuid::new_v4()).unwrap();
        assert_eq!(
            registry.rename("docs", "fresh"),
            Err(Error::ResourceInUse { name: "docs".into() })
        );
        drop(pin);
        registry.rename("docs", "fresh").unwrap();
    }

    #[test]
    fn test_backup_and_restore() {
        let registry = registry();
        registry.create("docs", payloads(3)).unwrap();
        let session = Uuid::new_v4();
        assert_eq!(registry.backup("docs", session).unwrap(), 3);

        // Mutate after the snapshot.
        let resource = registry.resource("docs").unwrap();
        resource.lock().restore_from(vec!["changed".into()]).unwrap();
        assert_eq!(registry.stats("docs").unwrap().node_count, 1);

        assert_eq!(registry.restore("docs").unwrap(), 3);
        assert_eq!(registry.stats("docs").unwrap().node_count, 3);
    }

    #[test]
    fn test_backup_refused_for_foreign_pins() {
        let registry = registry();
        registry.create("docs", payloads(1)).unwrap();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let _pin = Registry::pin(&registry, "docs", other).unwrap();

        assert_eq!(
            registry.backup("docs", owner),
            Err(Error::ResourceInUse { name: "docs".into() })
        );
        // The pinning session itself may back up.
        assert!(registry.backup("docs", other).is_ok());
    }

    #[test]
    fn test_restore_recreates_dropped_resource() {
        let registry = registry();
        registry.create("docs", payloads(2)).unwrap();
        registry.backup("docs", Uuid::new_v4()).unwrap();
        registry.drop_resource("docs").unwrap();

        assert_eq!(registry.restore("docs").unwrap(), 2);
        assert!(registry.exists("docs"));
    }

    #[test]
    fn test_restore_without_backup() {
        let registry = registry();
        registry.create("docs", vec![]).unwrap();
        assert!(matches!(
            registry.restore("docs"),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_restore_refused_while_pinned() {
        let registry = registry();
        registry.create("docs", payloads(2)).unwrap();
        registry.backup("docs", Uuid::new_v4()).unwrap();
        let _pin = Registry::pin(&registry, "docs", Uuid::new_v4()).unwrap();
        assert_eq!(
            registry.restore("docs"),
            Err(Error::ResourceInUse { name: "docs".into() })
        );
        // Content untouched by the refused restore.
        assert_eq!(registry.stats("docs").unwrap().node_count, 2);
    }
}
