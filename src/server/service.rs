//! License service: orchestration around the decision engine.
//!
//! Each operation follows the same shape: fetch the record and its
//! revision, run the pure decision, conditionally commit the granted
//! state, append an audit entry, return the outcome. The conditional
//! commit is what makes concurrent activation safe: if another request
//! committed first, the revision no longer matches and the operation
//! re-fetches and re-decides exactly once before giving up with
//! `Denied(Conflict)`.
//!
//! Audit appends are best-effort. A failed append is logged and never
//! changes the client-visible result.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tracing::{error, info, warn};

use crate::audit::{AuditEntry, Operation};
use crate::engine::{self, CheckKind, Decision, DenyReason, Grant};
use crate::errors::{LicenseError, LicenseResult};
use crate::server::database::{CommitOutcome, Database};

/// Client-visible outcome of a service operation.
///
/// Denials are ordinary outcomes here, not errors; only storage and
/// invariant faults surface as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceOutcome {
    Granted { expires_at: Option<NaiveDateTime> },
    Denied(DenyReason),
}

/// Orchestrates the binding engine against the license store.
#[derive(Clone)]
pub struct LicenseService {
    db: Arc<Database>,
}

impl LicenseService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The underlying store (health probes, tests).
    pub fn store(&self) -> &Database {
        &self.db
    }

    /// Activate a license: bind on first use, refresh when already
    /// bound to the same identifier.
    pub async fn activate(
        &self,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
    ) -> LicenseResult<ServiceOutcome> {
        self.run_check(license_key, identifier, source_ip, CheckKind::Activate)
            .await
    }

    /// Verify a license: same rule chain as activate, but never
    /// creates a binding or touches the activation count.
    pub async fn verify(
        &self,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
    ) -> LicenseResult<ServiceOutcome> {
        self.run_check(license_key, identifier, source_ip, CheckKind::Verify)
            .await
    }

    /// Deactivate a license: clear the binding held by `identifier`.
    pub async fn deactivate(
        &self,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
    ) -> LicenseResult<ServiceOutcome> {
        let op = Operation::Deactivate;
        let mut retried = false;

        loop {
            let fetched = self.db.fetch_license(license_key).await?;
            let decision = engine::decide_release(fetched.as_ref().map(|(r, _)| r), identifier);

            let decision = match decision {
                Ok(d) => d,
                Err(fault @ LicenseError::CorruptedState(_)) => {
                    error!("deactivation of {license_key} hit corrupted state: {fault}");
                    self.append_audit(AuditEntry::new(
                        license_key,
                        identifier,
                        op.fault_tag(),
                        source_ip,
                    ))
                    .await;
                    return Err(fault);
                }
                Err(other) => return Err(other),
            };

            match decision {
                Decision::Denied(reason) => {
                    return self
                        .finish_denied(op, license_key, identifier, source_ip, reason)
                        .await;
                }
                Decision::Granted(grant) => {
                    // decide_release only grants when a record exists.
                    let revision = match &fetched {
                        Some((_, rev)) => *rev,
                        None => {
                            return Err(LicenseError::ServerError(
                                "release granted without a record".to_string(),
                            ))
                        }
                    };
                    match self.try_commit(&grant, revision).await? {
                        CommitOutcome::Committed => {
                            return self
                                .finish_granted(op, license_key, identifier, source_ip, &grant)
                                .await;
                        }
                        CommitOutcome::Conflict if !retried => {
                            retried = true;
                            continue;
                        }
                        CommitOutcome::Conflict => {
                            return self
                                .finish_denied(
                                    op,
                                    license_key,
                                    identifier,
                                    source_ip,
                                    DenyReason::Conflict,
                                )
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Privileged force-rebind, used for device resets.
    ///
    /// Requires only that the record exists; active flag, expiry and
    /// activation limit are not consulted.
    pub async fn register_binding(
        &self,
        license_key: &str,
        new_identifier: &str,
        source_ip: Option<String>,
    ) -> LicenseResult<ServiceOutcome> {
        let op = Operation::RegisterBinding;
        let mut retried = false;

        loop {
            let fetched = self.db.fetch_license(license_key).await?;
            let decision =
                engine::decide_rebind(fetched.as_ref().map(|(r, _)| r), new_identifier);

            match decision {
                Decision::Denied(reason) => {
                    return self
                        .finish_denied(op, license_key, new_identifier, source_ip, reason)
                        .await;
                }
                Decision::Granted(grant) => {
                    let revision = match &fetched {
                        Some((_, rev)) => *rev,
                        None => {
                            return Err(LicenseError::ServerError(
                                "rebind granted without a record".to_string(),
                            ))
                        }
                    };
                    match self.try_commit(&grant, revision).await? {
                        CommitOutcome::Committed => {
                            return self
                                .finish_granted(op, license_key, new_identifier, source_ip, &grant)
                                .await;
                        }
                        CommitOutcome::Conflict if !retried => {
                            retried = true;
                            continue;
                        }
                        CommitOutcome::Conflict => {
                            return self
                                .finish_denied(
                                    op,
                                    license_key,
                                    new_identifier,
                                    source_ip,
                                    DenyReason::Conflict,
                                )
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Shared fetch → decide → commit → audit loop for activate and
    /// verify.
    async fn run_check(
        &self,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
        kind: CheckKind,
    ) -> LicenseResult<ServiceOutcome> {
        let op = match kind {
            CheckKind::Activate => Operation::Activate,
            CheckKind::Verify => Operation::Verify,
        };
        let mut retried = false;

        loop {
            let fetched = self.db.fetch_license(license_key).await?;
            let now = Utc::now().naive_utc();
            let decision = engine::decide(fetched.as_ref().map(|(r, _)| r), identifier, now, kind);

            match decision {
                Decision::Denied(reason) => {
                    return self
                        .finish_denied(op, license_key, identifier, source_ip, reason)
                        .await;
                }
                Decision::Granted(grant) => {
                    let revision = match &fetched {
                        Some((_, rev)) => *rev,
                        None => {
                            return Err(LicenseError::ServerError(
                                "check granted without a record".to_string(),
                            ))
                        }
                    };
                    match self.try_commit(&grant, revision).await? {
                        CommitOutcome::Committed => {
                            return self
                                .finish_granted(op, license_key, identifier, source_ip, &grant)
                                .await;
                        }
                        CommitOutcome::Conflict if !retried => {
                            retried = true;
                            continue;
                        }
                        CommitOutcome::Conflict => {
                            warn!(
                                "conflict persisted after retry for license_key={license_key}"
                            );
                            return self
                                .finish_denied(
                                    op,
                                    license_key,
                                    identifier,
                                    source_ip,
                                    DenyReason::Conflict,
                                )
                                .await;
                        }
                    }
                }
            }
        }
    }

    async fn try_commit(&self, grant: &Grant, revision: i64) -> LicenseResult<CommitOutcome> {
        self.db.commit_license(revision, grant.record()).await
    }

    async fn finish_granted(
        &self,
        op: Operation,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
        grant: &Grant,
    ) -> LicenseResult<ServiceOutcome> {
        info!(
            action = %op.success_tag(),
            license_key = %license_key,
            identifier = %identifier,
            "license operation granted"
        );
        self.append_audit(AuditEntry::new(
            license_key,
            identifier,
            op.success_tag(),
            source_ip,
        ))
        .await;
        Ok(ServiceOutcome::Granted {
            expires_at: grant.record().expires_at,
        })
    }

    async fn finish_denied(
        &self,
        op: Operation,
        license_key: &str,
        identifier: &str,
        source_ip: Option<String>,
        reason: DenyReason,
    ) -> LicenseResult<ServiceOutcome> {
        warn!(
            action = %op.failure_tag(reason),
            license_key = %license_key,
            identifier = %identifier,
            "license operation denied"
        );
        self.append_audit(AuditEntry::new(
            license_key,
            identifier,
            op.failure_tag(reason),
            source_ip,
        ))
        .await;
        Ok(ServiceOutcome::Denied(reason))
    }

    /// Best-effort audit append: failures are logged, never surfaced.
    async fn append_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.db.append_audit(&entry).await {
            error!("failed to append audit entry for {}: {e}", entry.license_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LicenseRecord;
    use crate::server::database::MemoryStore;

    fn memory_service() -> (LicenseService, Arc<Database>) {
        let db = Arc::new(Database::Memory(MemoryStore::new()));
        let svc = LicenseService::new(db.clone());
        (svc, db)
    }

    #[tokio::test]
    async fn activate_then_verify_round_trip() {
        let (svc, db) = memory_service();
        db.upsert_license(LicenseRecord::new("LIC-SVC-1", 1))
            .await
            .unwrap();

        let out = svc.activate("LIC-SVC-1", "acct-1", None).await.unwrap();
        assert!(matches!(out, ServiceOutcome::Granted { .. }));

        let out = svc.verify("LIC-SVC-1", "acct-1", None).await.unwrap();
        assert!(matches!(out, ServiceOutcome::Granted { .. }));

        let (record, _) = db.fetch_license("LIC-SVC-1").await.unwrap().unwrap();
        assert_eq!(record.current_activations, 1);
    }

    #[tokio::test]
    async fn unknown_key_is_denied_not_found() {
        let db = Arc::new(Database::Memory(MemoryStore::new()));
        let svc = LicenseService::new(db.clone());

        let out = svc.activate("LIC-NONE", "acct-1", None).await.unwrap();
        assert_eq!(out, ServiceOutcome::Denied(DenyReason::NotFound));

        let trail = db.fetch_audit("LIC-NONE").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "ACTIVATION_FAILED_INVALID_KEY");
    }

    #[tokio::test]
    async fn deactivation_underflow_surfaces_as_corrupted_state() {
        let db = Arc::new(Database::Memory(MemoryStore::new()));
        let svc = LicenseService::new(db.clone());

        let mut record = LicenseRecord::new("LIC-BAD", 1);
        record.bound_identifier = Some("acct-1".to_string());
        record.current_activations = 0;
        db.upsert_license(record).await.unwrap();

        let err = svc.deactivate("LIC-BAD", "acct-1", None).await.unwrap_err();
        assert!(matches!(err, LicenseError::CorruptedState(_)));

        // Fault is audited, record untouched.
        let trail = db.fetch_audit("LIC-BAD").await.unwrap();
        assert_eq!(trail[0].action, "DEACTIVATION_FAILED_INTERNAL");
        let (stored, _) = db.fetch_license("LIC-BAD").await.unwrap().unwrap();
        assert_eq!(stored.current_activations, 0);
        assert!(stored.bound_identifier.is_some());
    }
}
