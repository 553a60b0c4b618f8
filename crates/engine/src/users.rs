//! User store and permission resolution.
//!
//! Every user carries a global permission plus optional per-resource
//! overrides. A command's permission check resolves the effective
//! permission for the resource it touches: the local override if one
//! exists, the global grant otherwise. Unknown users resolve to no
//! permission at all.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

use talus_core::{Error, Permission, Result};

/// The built-in administrator account; always present, never dropped.
pub const ADMIN_USER: &str = "admin";

#[derive(Debug, Clone)]
struct User {
    perm: Permission,
    locals: HashMap<String, Permission>,
}

/// Mutex-guarded table of users and their grants.
pub struct UserStore {
    inner: Mutex<HashMap<String, User>>,
}

impl UserStore {
    /// Creates a store holding only the built-in `admin` user.
    pub fn new() -> Self {
        let mut users = HashMap::new();
        users.insert(
            ADMIN_USER.to_string(),
            User {
                perm: Permission::Admin,
                locals: HashMap::new(),
            },
        );
        UserStore {
            inner: Mutex::new(users),
        }
    }

    /// Creates a user with a global permission.
    pub fn create(&self, name: &str, perm: Permission) -> Result<()> {
        let mut users = self.inner.lock();
        if users.contains_key(name) {
            return Err(Error::Validation {
                reason: format!("user already exists: {name}"),
            });
        }
        users.insert(
            name.to_string(),
            User {
                perm,
                locals: HashMap::new(),
            },
        );
        info!(user = name, %perm, "user created");
        Ok(())
    }

    /// Removes a user. The built-in admin cannot be dropped.
    pub fn drop_user(&self, name: &str) -> Result<()> {
        if name == ADMIN_USER {
            return Err(Error::Validation {
                reason: "the admin user cannot be dropped".into(),
            });
        }
        let mut users = self.inner.lock();
        if users.remove(name).is_none() {
            return Err(Error::Validation {
                reason: format!("unknown user: {name}"),
            });
        }
        info!(user = name, "user dropped");
        Ok(())
    }

    /// Grants a permission, globally or scoped to one resource.
    pub fn grant(&self, name: &str, perm: Permission, resource: Option<&str>) -> Result<()> {
        let mut users = self.inner.lock();
        let user = users.get_mut(name).ok_or_else(|| Error::Validation {
            reason: format!("unknown user: {name}"),
        })?;
        match resource {
            Some(resource) => {
                user.locals.insert(resource.to_string(), perm);
                info!(user = name, %perm, resource, "local permission granted");
            }
            None => {
                user.perm = perm;
                info!(user = name, %perm, "global permission granted");
            }
        }
        Ok(())
    }

    /// Whether the user exists.
    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// Effective permission of a user for an optional resource.
    pub fn effective(&self, name: &str, resource: Option<&str>) -> Permission {
        let users = self.inner.lock();
        let Some(user) = users.get(name) else {
            return Permission::None;
        };
        resource
            .and_then(|r| user.locals.get(r).copied())
            .unwrap_or(user.perm)
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_is_built_in() {
        let store = UserStore::new();
        assert_eq!(store.effective(ADMIN_USER, None), Permission::Admin);
        assert!(store.drop_user(ADMIN_USER).is_err());
    }

    #[test]
    fn test_unknown_user_has_no_permission() {
        let store = UserStore::new();
        assert_eq!(store.effective("ghost", None), Permission::None);
        assert_eq!(store.effective("ghost", Some("docs")), Permission::None);
    }

    #[test]
    fn test_create_and_drop() {
        let store = UserStore::new();
        store.create("erin", Permission::Write).unwrap();
        assert!(store.exists("erin"));
        assert!(store.create("erin", Permission::Read).is_err());

        store.drop_user("erin").unwrap();
        assert!(!store.exists("erin"));
        assert!(store.drop_user("erin").is_err());
    }

    #[test]
    fn test_local_override_beats_global() {
        let store = UserStore::new();
        store.create("erin", Permission::Read).unwrap();
        store
            .grant("erin", Permission::Write, Some("docs"))
            .unwrap();

        assert_eq!(store.effective("erin", Some("docs")), Permission::Write);
        assert_eq!(store.effective("erin", Some("other")), Permission::Read);
        assert_eq!(store.effective("erin", None), Permission::Read);
    }

    #[test]
    fn test_local_override_can_restrict() {
        let store = UserStore::new();
        store.create("erin", Permission::Write).unwrap();
        store.grant("erin", Permission::None, Some("vault")).unwrap();
        assert_eq!(store.effective("erin", Some("vault")), Permission::None);
        assert_eq!(store.effective("erin", Some("docs")), Permission::Write);
    }

    #[test]
    fn test_global_regrant() {
        let store = UserStore::new();
        store.create("erin", Permission::Read).unwrap();
        store.grant("erin", Permission::Create, None).unwrap();
        assert_eq!(store.effective("erin", None), Permission::Create);
    }
}
