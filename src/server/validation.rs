//! Request validation utilities for the Warden API.
//!
//! Validation runs before any store access, so malformed requests are
//! rejected with 400 without touching the database or the audit trail.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Printable ASCII without spaces, compiled once per process.
fn key_pattern() -> &'static Regex {
    KEY_PATTERN.get_or_init(|| Regex::new(r"^[!-~]+$").expect("key pattern is valid"))
}

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate that a string is not empty or whitespace only.
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "cannot be empty".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validate string length is within bounds.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.len();
    if len < min {
        Err(ValidationError {
            field: field_name.to_string(),
            message: format!("must be at least {min} characters"),
        })
    } else if len > max {
        Err(ValidationError {
            field: field_name.to_string(),
            message: format!("must be at most {max} characters"),
        })
    } else {
        Ok(())
    }
}

/// Validate a license key.
///
/// Keys are opaque, but the transport rejects control characters and
/// whitespace: printable ASCII, 1-128 characters.
pub fn validate_license_key(value: &str, field_name: &str) -> ValidationResult<()> {
    validate_not_empty(value, field_name)?;
    validate_length(value, 1, 128, field_name)?;

    if key_pattern().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "must contain only printable characters without spaces".to_string(),
        })
    }
}

/// Validate a binding identifier (account id or hardware id).
///
/// Identifiers come from client machines, so only length and
/// non-emptiness are enforced.
pub fn validate_identifier(value: &str, field_name: &str) -> ValidationResult<()> {
    validate_not_empty(value, field_name)?;
    validate_length(value, 1, 255, field_name)
}
