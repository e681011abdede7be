//! Audit trail types.
//!
//! Every decision outcome, grant or denial, produces exactly one
//! [`AuditEntry`]. Entries are append-only: the core never updates or
//! deletes them. Tags are flat SCREAMING_SNAKE strings of the form
//! `OPERATION_SUCCESS` / `OPERATION_FAILED_REASON` so abuse patterns
//! (e.g. repeated `ACTIVATION_FAILED_IDENTIFIER_MISMATCH` from many
//! addresses) can be reconstructed with plain queries.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::DenyReason;

/// Which service operation produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Activate,
    Verify,
    Deactivate,
    RegisterBinding,
}

impl Operation {
    fn tag_prefix(&self) -> &'static str {
        match self {
            Operation::Activate => "ACTIVATION",
            Operation::Verify => "VERIFICATION",
            Operation::Deactivate => "DEACTIVATION",
            Operation::RegisterBinding => "REBIND",
        }
    }

    /// Tag for a granted outcome, e.g. `ACTIVATION_SUCCESS`.
    pub fn success_tag(&self) -> String {
        format!("{}_SUCCESS", self.tag_prefix())
    }

    /// Tag for a denied outcome, e.g. `ACTIVATION_FAILED_EXPIRED`.
    pub fn failure_tag(&self, reason: DenyReason) -> String {
        let suffix = match reason {
            DenyReason::NotFound => "INVALID_KEY",
            DenyReason::Inactive => "INACTIVE",
            DenyReason::Expired => "EXPIRED",
            DenyReason::IdentifierMismatch => "IDENTIFIER_MISMATCH",
            DenyReason::NotBound => "NOT_BOUND",
            DenyReason::ActivationLimitReached => "LIMIT_REACHED",
            DenyReason::Conflict => "CONFLICT",
        };
        format!("{}_FAILED_{}", self.tag_prefix(), suffix)
    }

    /// Tag for an internal fault (storage or invariant failure). The
    /// fault detail goes to the operational log, not the audit trail.
    pub fn fault_tag(&self) -> String {
        format!("{}_FAILED_INTERNAL", self.tag_prefix())
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub license_key: String,
    /// The identifier presented by the caller (requested, not
    /// necessarily the bound one).
    pub binding_identifier: String,
    pub action: String,
    pub source_ip: Option<String>,
    pub created_at: NaiveDateTime,
}

impl AuditEntry {
    pub fn new(
        license_key: impl Into<String>,
        binding_identifier: impl Into<String>,
        action: impl Into<String>,
        source_ip: Option<String>,
    ) -> Self {
        Self {
            license_key: license_key.into(),
            binding_identifier: binding_identifier.into(),
            action: action.into(),
            source_ip,
            created_at: Utc::now().naive_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_tags_carry_operation_prefix() {
        assert_eq!(Operation::Activate.success_tag(), "ACTIVATION_SUCCESS");
        assert_eq!(Operation::Verify.success_tag(), "VERIFICATION_SUCCESS");
        assert_eq!(Operation::Deactivate.success_tag(), "DEACTIVATION_SUCCESS");
        assert_eq!(Operation::RegisterBinding.success_tag(), "REBIND_SUCCESS");
    }

    #[test]
    fn failure_tags_name_the_reason() {
        assert_eq!(
            Operation::Activate.failure_tag(DenyReason::NotFound),
            "ACTIVATION_FAILED_INVALID_KEY"
        );
        assert_eq!(
            Operation::Activate.failure_tag(DenyReason::ActivationLimitReached),
            "ACTIVATION_FAILED_LIMIT_REACHED"
        );
        assert_eq!(
            Operation::Verify.failure_tag(DenyReason::IdentifierMismatch),
            "VERIFICATION_FAILED_IDENTIFIER_MISMATCH"
        );
        assert_eq!(
            Operation::Deactivate.failure_tag(DenyReason::NotBound),
            "DEACTIVATION_FAILED_NOT_BOUND"
        );
    }

    #[test]
    fn entry_records_requested_identifier() {
        let entry = AuditEntry::new("LIC-A", "acct-9", "ACTIVATION_SUCCESS", None);
        assert_eq!(entry.binding_identifier, "acct-9");
        assert!(entry.source_ip.is_none());
    }
}
