//! The license binding state machine.
//!
//! Everything in this module is pure decision logic: a license record,
//! a requested binding identifier, and a clock go in; a
//! [`Decision`] comes out. No I/O happens here. The service layer
//! ([`crate::server::service`] when the `server` feature is enabled)
//! is responsible for fetching records, committing granted state
//! transitions, and writing the audit trail.
//!
//! The check order in [`decide`] is deliberate: when several failure
//! conditions overlap (e.g. an expired license presented with the
//! wrong identifier), the first matching rule determines which denial
//! reason is returned and therefore which audit tag is recorded.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{LicenseError, LicenseResult};

/// A license record as seen by the decision engine.
///
/// Owned by the store; mutated only through granted decisions. The
/// store's revision counter is tracked separately so this type stays
/// free of persistence concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Opaque unique key, immutable after provisioning.
    pub license_key: String,
    /// Administrative on/off switch; read-only to the engine.
    pub is_active: bool,
    /// Expiry timestamp (naive UTC); `None` means never expires.
    pub expires_at: Option<NaiveDateTime>,
    /// The account or hardware id currently holding the binding.
    pub bound_identifier: Option<String>,
    pub max_activations: i64,
    pub current_activations: i64,
    /// Timestamp of the most recent successful verification.
    pub last_used_at: Option<NaiveDateTime>,
}

impl LicenseRecord {
    /// A fresh unbound record with the given activation cap.
    pub fn new(license_key: impl Into<String>, max_activations: i64) -> Self {
        Self {
            license_key: license_key.into(),
            is_active: true,
            expires_at: None,
            bound_identifier: None,
            max_activations,
            current_activations: 0,
            last_used_at: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_identifier.is_some()
    }

    /// Expired iff an expiry is set and it is at or before `now`.
    /// The boundary is strict: `expires_at == now` is already expired.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Usable = administratively active and not expired.
    pub fn is_usable(&self, now: NaiveDateTime) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Which client-facing check is being decided.
///
/// Activate and Verify share the same rule chain; they differ only on
/// an unbound record, where Activate creates the binding and Verify
/// refuses (verification never mutates the activation count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Activate,
    Verify,
}

/// Reasons a request can be denied.
///
/// These are expected, client-facing outcomes, serialized in the wire
/// format as SCREAMING_SNAKE_CASE codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// License key does not exist.
    NotFound,
    /// License is administratively disabled.
    Inactive,
    /// License expiry has passed.
    Expired,
    /// License is bound to a different identifier.
    IdentifierMismatch,
    /// License is not bound (verify or deactivate on an unbound key).
    NotBound,
    /// No activation slot left on an unbound license.
    ActivationLimitReached,
    /// Lost the optimistic-concurrency race twice; retryable.
    Conflict,
}

impl DenyReason {
    /// Human-readable message matching the wire contract.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "Invalid license key",
            DenyReason::Inactive => "License is inactive",
            DenyReason::Expired => "License has expired",
            DenyReason::IdentifierMismatch => "License is bound to a different identifier",
            DenyReason::NotBound => "License is not bound to any identifier",
            DenyReason::ActivationLimitReached => "Maximum activations reached",
            DenyReason::Conflict => "Concurrent update conflict, please retry",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// A granted transition, carrying the record state to be committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    /// First successful check on an unbound license: binding created,
    /// activation count incremented.
    Bind(LicenseRecord),
    /// Already bound to the requesting identifier: only `last_used_at`
    /// moves forward.
    Refresh(LicenseRecord),
    /// Deactivation: binding cleared, activation count decremented.
    Release(LicenseRecord),
    /// Privileged force-rebind.
    Rebind(LicenseRecord),
}

impl Grant {
    /// The record state this grant wants committed.
    pub fn record(&self) -> &LicenseRecord {
        match self {
            Grant::Bind(r) | Grant::Refresh(r) | Grant::Release(r) | Grant::Rebind(r) => r,
        }
    }
}

/// Outcome of a decision: either a transition to commit or a denial.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Granted(Grant),
    Denied(DenyReason),
}

/// Decide an Activate or Verify request against a record.
///
/// Rule chain, first match wins:
/// 1. no record → `NotFound`
/// 2. inactive → `Inactive`
/// 3. expired (`expires_at <= now`) → `Expired`
/// 4. bound to someone else → `IdentifierMismatch`
/// 5. unbound, no slot left → `ActivationLimitReached`
/// 6. unbound → bind (Activate) / `NotBound` (Verify)
/// 7. bound to the requester → refresh `last_used_at`
pub fn decide(
    record: Option<&LicenseRecord>,
    requested_identifier: &str,
    now: NaiveDateTime,
    kind: CheckKind,
) -> Decision {
    let record = match record {
        Some(r) => r,
        None => return Decision::Denied(DenyReason::NotFound),
    };

    if !record.is_active {
        return Decision::Denied(DenyReason::Inactive);
    }
    if record.is_expired(now) {
        return Decision::Denied(DenyReason::Expired);
    }

    match record.bound_identifier.as_deref() {
        Some(bound) if bound != requested_identifier => {
            Decision::Denied(DenyReason::IdentifierMismatch)
        }
        Some(_) => {
            let mut next = record.clone();
            next.last_used_at = Some(now);
            Decision::Granted(Grant::Refresh(next))
        }
        None => {
            if record.current_activations >= record.max_activations {
                return Decision::Denied(DenyReason::ActivationLimitReached);
            }
            match kind {
                CheckKind::Activate => {
                    let mut next = record.clone();
                    next.bound_identifier = Some(requested_identifier.to_string());
                    next.current_activations += 1;
                    next.last_used_at = Some(now);
                    Decision::Granted(Grant::Bind(next))
                }
                // Verification proves an existing binding; it never
                // creates one.
                CheckKind::Verify => Decision::Denied(DenyReason::NotBound),
            }
        }
    }
}

/// Decide a Deactivate request.
///
/// Requires the record to be bound to the requesting identifier. On
/// success the binding is cleared and the activation count
/// decremented. A bound record whose count is already zero cannot be
/// decremented and is reported as corrupted state.
pub fn decide_release(
    record: Option<&LicenseRecord>,
    requested_identifier: &str,
) -> LicenseResult<Decision> {
    let record = match record {
        Some(r) => r,
        None => return Ok(Decision::Denied(DenyReason::NotFound)),
    };

    match record.bound_identifier.as_deref() {
        None => Ok(Decision::Denied(DenyReason::NotBound)),
        Some(bound) if bound != requested_identifier => {
            Ok(Decision::Denied(DenyReason::IdentifierMismatch))
        }
        Some(_) => {
            if record.current_activations <= 0 {
                return Err(LicenseError::CorruptedState(format!(
                    "license {} is bound but current_activations is {}",
                    record.license_key, record.current_activations
                )));
            }
            let mut next = record.clone();
            next.bound_identifier = None;
            next.current_activations -= 1;
            Ok(Decision::Granted(Grant::Release(next)))
        }
    }
}

/// Decide a privileged force-rebind.
///
/// Used for device resets: requires only that the record exists. The
/// active flag, expiry, and activation limit are deliberately not
/// consulted. If the record was unbound, the activation count is
/// raised to account for the new binding.
pub fn decide_rebind(record: Option<&LicenseRecord>, new_identifier: &str) -> Decision {
    let record = match record {
        Some(r) => r,
        None => return Decision::Denied(DenyReason::NotFound),
    };

    let mut next = record.clone();
    if !next.is_bound() {
        next.current_activations += 1;
    }
    next.bound_identifier = Some(new_identifier.to_string());
    Decision::Granted(Grant::Rebind(next))
}
