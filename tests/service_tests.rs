//! Service-level tests for the binding life cycle, run against the
//! in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};

use warden::engine::{DenyReason, LicenseRecord};
use warden::server::database::{Database, MemoryStore};
use warden::server::service::{LicenseService, ServiceOutcome};

fn memory_service() -> (LicenseService, Arc<Database>) {
    let db = Arc::new(Database::Memory(MemoryStore::new()));
    (LicenseService::new(db.clone()), db)
}

async fn seed(db: &Database, record: LicenseRecord) {
    db.upsert_license(record).await.expect("seed failed");
}

#[tokio::test]
async fn single_winner_under_concurrent_activation() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-RACE", 1)).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.activate("LIC-RACE", &format!("acct-{i}"), None).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if matches!(outcome, ServiceOutcome::Granted { .. }) {
            granted += 1;
        }
    }

    assert_eq!(granted, 1, "exactly one concurrent activation may win");

    let (record, _) = db.fetch_license("LIC-RACE").await.unwrap().unwrap();
    assert_eq!(record.current_activations, 1);
    assert!(record.bound_identifier.is_some());
}

#[tokio::test]
async fn verify_is_idempotent_for_the_bound_identifier() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-IDEM", 1)).await;

    let out = svc.activate("LIC-IDEM", "acct-1", None).await.unwrap();
    assert!(matches!(out, ServiceOutcome::Granted { .. }));

    for _ in 0..5 {
        let out = svc.verify("LIC-IDEM", "acct-1", None).await.unwrap();
        assert!(matches!(out, ServiceOutcome::Granted { .. }));

        let (record, _) = db.fetch_license("LIC-IDEM").await.unwrap().unwrap();
        assert_eq!(record.current_activations, 1);
        assert_eq!(record.bound_identifier.as_deref(), Some("acct-1"));
    }
}

#[tokio::test]
async fn verify_never_binds_an_unbound_license() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-VNB", 1)).await;

    let out = svc.verify("LIC-VNB", "acct-1", None).await.unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::NotBound));

    let (record, _) = db.fetch_license("LIC-VNB").await.unwrap().unwrap();
    assert_eq!(record.current_activations, 0);
    assert!(record.bound_identifier.is_none());
}

#[tokio::test]
async fn mismatch_leaves_the_record_unchanged() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-MM", 1)).await;

    svc.activate("LIC-MM", "acct-a", None).await.unwrap();
    let (before, rev_before) = db.fetch_license("LIC-MM").await.unwrap().unwrap();

    for _ in 0..3 {
        let out = svc.activate("LIC-MM", "acct-b", None).await.unwrap();
        assert_eq!(out, ServiceOutcome::Denied(DenyReason::IdentifierMismatch));
        let out = svc.verify("LIC-MM", "acct-b", None).await.unwrap();
        assert_eq!(out, ServiceOutcome::Denied(DenyReason::IdentifierMismatch));
    }

    let (after, rev_after) = db.fetch_license("LIC-MM").await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(rev_before, rev_after);
}

#[tokio::test]
async fn deactivate_then_reactivate_rebinds_cleanly() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-CYCLE", 1)).await;

    let out = svc.activate("LIC-CYCLE", "acct-a", None).await.unwrap();
    assert!(matches!(out, ServiceOutcome::Granted { .. }));

    let out = svc.deactivate("LIC-CYCLE", "acct-a", None).await.unwrap();
    assert!(matches!(out, ServiceOutcome::Granted { .. }));

    let (record, _) = db.fetch_license("LIC-CYCLE").await.unwrap().unwrap();
    assert_eq!(record.current_activations, 0);
    assert!(record.bound_identifier.is_none());

    let out = svc.activate("LIC-CYCLE", "acct-b", None).await.unwrap();
    assert!(matches!(out, ServiceOutcome::Granted { .. }));

    let (record, _) = db.fetch_license("LIC-CYCLE").await.unwrap().unwrap();
    assert_eq!(record.current_activations, 1);
    assert_eq!(record.bound_identifier.as_deref(), Some("acct-b"));
}

#[tokio::test]
async fn bound_license_reports_mismatch_not_limit() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-ORDER", 1)).await;

    svc.activate("LIC-ORDER", "acct-a", None).await.unwrap();

    // At the cap and bound to A: B's denial must be the mismatch, not
    // the exhausted limit.
    let out = svc.activate("LIC-ORDER", "acct-b", None).await.unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::IdentifierMismatch));
}

#[tokio::test]
async fn expired_license_is_denied_on_every_operation() {
    let (svc, db) = memory_service();
    let mut record = LicenseRecord::new("LIC-EXP", 1);
    record.expires_at = Some(Utc::now().naive_utc() - Duration::seconds(1));
    seed(&db, record).await;

    let out = svc.activate("LIC-EXP", "acct-1", None).await.unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::Expired));

    let out = svc.verify("LIC-EXP", "acct-1", None).await.unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::Expired));
}

#[tokio::test]
async fn inactive_license_is_denied_before_expiry_is_considered() {
    let (svc, db) = memory_service();
    let mut record = LicenseRecord::new("LIC-OFF", 1);
    record.is_active = false;
    record.expires_at = Some(Utc::now().naive_utc() - Duration::days(1));
    seed(&db, record).await;

    let out = svc.activate("LIC-OFF", "acct-1", None).await.unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::Inactive));
}

#[tokio::test]
async fn register_binding_overrides_without_prior_identifier() {
    let (svc, db) = memory_service();
    let mut record = LicenseRecord::new("LIC-REBIND", 1);
    record.is_active = false;
    record.bound_identifier = Some("stolen-device".to_string());
    record.current_activations = 1;
    seed(&db, record).await;

    let out = svc
        .register_binding("LIC-REBIND", "replacement-device", None)
        .await
        .unwrap();
    assert!(matches!(out, ServiceOutcome::Granted { .. }));

    let (record, _) = db.fetch_license("LIC-REBIND").await.unwrap().unwrap();
    assert_eq!(
        record.bound_identifier.as_deref(),
        Some("replacement-device")
    );
    assert_eq!(record.current_activations, 1);
}

#[tokio::test]
async fn register_binding_requires_an_existing_record() {
    let (svc, _db) = memory_service();
    let out = svc
        .register_binding("LIC-GHOST", "device", None)
        .await
        .unwrap();
    assert_eq!(out, ServiceOutcome::Denied(DenyReason::NotFound));
}

#[tokio::test]
async fn every_operation_produces_exactly_one_audit_entry() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-AUDIT", 1)).await;

    svc.activate("LIC-AUDIT", "acct-a", Some("203.0.113.5".to_string()))
        .await
        .unwrap();
    svc.verify("LIC-AUDIT", "acct-a", None).await.unwrap();
    svc.verify("LIC-AUDIT", "acct-b", None).await.unwrap();
    svc.deactivate("LIC-AUDIT", "acct-a", None).await.unwrap();
    svc.activate("LIC-MISSING", "acct-a", None).await.unwrap();

    let trail = db.fetch_audit("LIC-AUDIT").await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "ACTIVATION_SUCCESS",
            "VERIFICATION_SUCCESS",
            "VERIFICATION_FAILED_IDENTIFIER_MISMATCH",
            "DEACTIVATION_SUCCESS",
        ]
    );
    assert_eq!(trail[0].source_ip.as_deref(), Some("203.0.113.5"));

    let missing_trail = db.fetch_audit("LIC-MISSING").await.unwrap();
    assert_eq!(missing_trail.len(), 1);
    assert_eq!(missing_trail[0].action, "ACTIVATION_FAILED_INVALID_KEY");
}

#[tokio::test]
async fn activation_count_never_exceeds_max_across_churn() {
    let (svc, db) = memory_service();
    seed(&db, LicenseRecord::new("LIC-CHURN", 1)).await;

    for i in 0..10 {
        let id = format!("acct-{i}");
        let out = svc.activate("LIC-CHURN", &id, None).await.unwrap();
        assert!(matches!(out, ServiceOutcome::Granted { .. }));

        let (record, _) = db.fetch_license("LIC-CHURN").await.unwrap().unwrap();
        assert_eq!(record.current_activations, 1);

        let out = svc.deactivate("LIC-CHURN", &id, None).await.unwrap();
        assert!(matches!(out, ServiceOutcome::Granted { .. }));

        let (record, _) = db.fetch_license("LIC-CHURN").await.unwrap().unwrap();
        assert_eq!(record.current_activations, 0);
    }
}
