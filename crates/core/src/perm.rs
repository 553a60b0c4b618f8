//! Permission levels.
//!
//! Every command declares the minimum permission it requires. A caller's
//! effective permission must be greater than or equal to that minimum or the
//! command is rejected before any lock is taken.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Permission level of a user, totally ordered.
///
/// The derived `Ord` follows declaration order, so
/// `Permission::None < Permission::Read < ... < Permission::Admin` and a
/// permission check is a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// No permissions.
    None,
    /// Read resources.
    Read,
    /// Modify resource contents.
    Write,
    /// Create, drop, rename, copy and restore resources.
    Create,
    /// Server administration: users, jobs, sessions.
    Admin,
}

impl Permission {
    /// Returns the lowercase name of the permission level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Create => "create",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Permission::None),
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "create" => Ok(Permission::Create),
            "admin" => Ok(Permission::Admin),
            other => Err(Error::Validation {
                reason: format!("unknown permission: {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(Permission::None < Permission::Read);
        assert!(Permission::Read < Permission::Write);
        assert!(Permission::Write < Permission::Create);
        assert!(Permission::Create < Permission::Admin);
    }

    #[test]
    fn test_check_is_a_comparison() {
        let granted = Permission::Write;
        assert!(granted >= Permission::Read);
        assert!(granted >= Permission::Write);
        assert!(granted < Permission::Create);
    }

    #[test]
    fn test_display_from_str_round_trip() {
        for perm in [
            Permission::None,
            Permission::Read,
            Permission::Write,
            Permission::Create,
            Permission::Admin,
        ] {
            let parsed: Permission = perm.to_string().parse().unwrap();
            assert_eq!(parsed, perm);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("superuser".parse::<Permission>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Permission::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
    }
}
