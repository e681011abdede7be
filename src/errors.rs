//! Fault types for Warden.
//!
//! Denial outcomes (expired, mismatch, limit reached, ...) are not
//! errors; they are ordinary decision results carried by
//! [`crate::engine::Decision`]. This module covers the true faults:
//! infrastructure failures and invariant violations. Faults surface to
//! clients as an opaque internal error; the detail stays in the
//! operational log.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LicenseError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The license store could not be reached or a query failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored record violates a core invariant (e.g. an activation
    /// count that would go negative). Fatal to the single operation.
    #[error("corrupted license state: {0}")]
    CorruptedState(String),

    /// Catch-all server-side failure.
    #[error("server error: {0}")]
    ServerError(String),
}

pub type LicenseResult<T> = Result<T, LicenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = LicenseError::StorageUnavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = LicenseError::CorruptedState("activation count underflow".to_string());
        assert!(err.to_string().contains("underflow"));
    }
}
