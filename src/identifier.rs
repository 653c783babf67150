//! Strict identifier validation for caller-supplied SQL identifiers.
//!
//! Table, column, index, and schema names come from the domain layer's
//! fixed enumerations, but nothing stops a future caller from passing
//! attacker-controlled strings through the same path. Every identifier is
//! checked here before it is interpolated (double-quoted) into SQL; values
//! are always bound as positional parameters instead.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, StorageError};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex is valid"));

/// Validates `name` against the strict identifier grammar: an ASCII letter
/// or underscore, followed by up to 62 letters, digits, or underscores.
/// PostgreSQL's own 63-byte identifier limit is enforced as a side effect.
pub fn validate_identifier(name: &str) -> Result<&str> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier {
            identifier: name.to_string(),
            reason: "must match [A-Za-z_][A-Za-z0-9_]{0,62}".to_string(),
        })
    }
}

/// Validates `name` and renders it as a double-quoted SQL identifier.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_identifier("mastra_threads").is_ok());
        assert!(validate_identifier("createdAt").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn rejects_sql_injection_attempts() {
        assert!(validate_identifier("threads; DROP TABLE x;--").is_err());
        assert!(validate_identifier("\"threads\"").is_err());
        assert!(validate_identifier("threads\"").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1threads").is_err());
        assert!(validate_identifier("thread name").is_err());
    }

    #[test]
    fn rejects_overlong_identifiers() {
        let long = "a".repeat(64);
        assert!(validate_identifier(&long).is_err());
        let ok = "a".repeat(63);
        assert!(validate_identifier(&ok).is_ok());
    }

    #[test]
    fn quote_wraps_in_double_quotes() {
        assert_eq!(quote_identifier("workflow_name").unwrap(), "\"workflow_name\"");
    }
}
