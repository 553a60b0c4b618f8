//! Resource name validation and patterns.
//!
//! Resource names are caller-supplied strings. They are validated before any
//! lock is taken and normalized according to the configured case
//! sensitivity. Commands that select resources at run time use simple glob
//! patterns (`*` and `?`).

use crate::error::{Error, Result};

/// Maximum length of a resource name in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Validates a resource name.
///
/// A valid name is non-empty, at most [`MAX_NAME_LEN`] bytes, starts with an
/// ASCII alphanumeric character and continues with alphanumerics, `-`, `_`
/// or `.`. Path separators are rejected outright so a name can never escape
/// into the file system.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation {
            reason: "resource name must not be empty".into(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Validation {
            reason: format!("resource name exceeds {MAX_NAME_LEN} bytes"),
        });
    }
    let mut chars = name.chars();
    if !matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric()) {
        return Err(Error::Validation {
            reason: format!("resource name must start with an alphanumeric character: {name}"),
        });
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
            return Err(Error::Validation {
                reason: format!("invalid character {c:?} in resource name: {name}"),
            });
        }
    }
    Ok(())
}

/// Normalizes a resource name according to the configured case sensitivity.
///
/// With `case_insensitive` set, names are folded to ASCII lowercase so that
/// `Docs` and `docs` address the same resource.
pub fn normalize_name(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_ascii_lowercase()
    } else {
        name.to_string()
    }
}

/// Matches a name against a glob pattern.
///
/// `*` matches any (possibly empty) run of characters, `?` matches exactly
/// one character, everything else matches literally.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    fn inner(name: &[u8], pattern: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(b'*'), _) => {
                inner(name, &pattern[1..]) || (!name.is_empty() && inner(&name[1..], pattern))
            }
            (Some(b'?'), Some(_)) => inner(&name[1..], &pattern[1..]),
            (Some(p), Some(n)) if p == n => inner(&name[1..], &pattern[1..]),
            _ => false,
        }
    }
    inner(name.as_bytes(), pattern.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["docs", "db1", "a", "my-db_2.bak", "0store"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "-docs", ".hidden", "a/b", "a\\b", "a b", "db:1"] {
            assert!(validate_name(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn test_name_length_limit() {
        let long = "a".repeat(MAX_NAME_LEN);
        assert!(validate_name(&long).is_ok());
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_name(&too_long).is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_name("Docs", true), "docs");
        assert_eq!(normalize_name("Docs", false), "Docs");
    }

    #[test]
    fn test_pattern_literal() {
        assert!(matches_pattern("docs", "docs"));
        assert!(!matches_pattern("docs", "doc"));
        assert!(!matches_pattern("doc", "docs"));
    }

    #[test]
    fn test_pattern_star() {
        assert!(matches_pattern("docs", "*"));
        assert!(matches_pattern("docs", "d*"));
        assert!(matches_pattern("docs", "*s"));
        assert!(matches_pattern("docs", "d*s"));
        assert!(matches_pattern("ds", "d*s"));
        assert!(!matches_pattern("docs", "e*"));
    }

    #[test]
    fn test_pattern_question_mark() {
        assert!(matches_pattern("docs", "d?cs"));
        assert!(!matches_pattern("docs", "d?s"));
        assert!(matches_pattern("db1", "db?"));
    }
}
