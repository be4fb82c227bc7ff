//! SQL identifier validation and sanitization.
//!
//! Table and column names are interpolated into DDL and queries, so they
//! must pass through [`validate`] (strict) or [`sanitize`] (lenient) first.
//! Values are always bound as parameters and never need this.

use csvcatalog_core::error::{CatalogError, Result};

/// Whether `name` matches `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn is_valid(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strict mode: return `name` unchanged if it is already safe.
pub fn validate(name: &str) -> Result<&str> {
    if is_valid(name) {
        Ok(name)
    } else {
        Err(CatalogError::InvalidIdentifier(name.to_string()))
    }
}

/// Lenient mode: rewrite `name` into a safe identifier. Never fails.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`; a leading digit or an
/// empty result gets a `_` prefix.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Validate, then wrap in double quotes for interpolation.
pub fn quote(name: &str) -> Result<String> {
    validate(name).map(|n| format!("\"{}\"", n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["people", "_x", "A1", "snake_case_9", "_"] {
            assert!(is_valid(name), "{name} should be valid");
            assert_eq!(validate(name).unwrap(), name);
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in ["", "1abc", "has space", "semi;colon", "quo\"te", "dash-ed", "é"] {
            assert!(!is_valid(name), "{name:?} should be invalid");
            assert!(matches!(
                validate(name),
                Err(CatalogError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_sanitize_known_cases() {
        assert_eq!(sanitize("1bad name!"), "_1bad_name_");
        assert_eq!(sanitize(""), "_");
        assert_eq!(sanitize("e-mail"), "e_mail");
        assert_eq!(sanitize("x\"; DROP TABLE y; --"), "x___DROP_TABLE_y____");
        assert_eq!(sanitize("naïve"), "na_ve");
    }

    #[test]
    fn test_sanitize_is_identity_on_safe_input() {
        for name in ["people", "_1", "Col_2", "ABC"] {
            assert_eq!(sanitize(name), name);
        }
    }

    #[test]
    fn test_sanitize_is_idempotent_and_always_valid() {
        let inputs = [
            "", " ", "0", "9lives", "a b c", "--", "ünïcødé", "tab\tsep", "ok_name", "é1",
            "..",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert!(is_valid(&once), "{once:?} from {input:?} is not valid");
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("people").unwrap(), "\"people\"");
        assert!(quote("bad name").is_err());
    }
}
