//! License storage for the Warden server.
//!
//! A single [`Database`] enum abstracts over the available backends:
//! an always-available in-memory store (tests, embedders) and
//! feature-gated SQLite/Postgres pools. The store owns two tables:
//! `licenses` (one row per key, with a `revision` counter) and
//! `license_audit` (append-only action log).
//!
//! Concurrency contract: `fetch_license` returns the record together
//! with its revision, and `commit_license` only writes when the stored
//! revision still matches. Two requests racing on the same key cannot
//! both commit; the loser sees [`CommitOutcome::Conflict`] and the
//! service layer re-decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use chrono::NaiveDateTime;
use tracing::error;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use sqlx::{query, query_as, FromRow};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::audit::AuditEntry;
use crate::config::get_config;
use crate::engine::LicenseRecord;
use crate::errors::{LicenseError, LicenseResult};

/// Result of a conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The revision matched; the new state is durable.
    Committed,
    /// Another request changed the record since it was fetched.
    Conflict,
}

/// Unified storage abstraction.
///
/// Available variants depend on enabled features:
/// - `Memory` is always available
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    Memory(MemoryStore),
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

/// In-memory store used by tests and embedding applications.
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    licenses: Mutex<HashMap<String, (LicenseRecord, i64)>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Row shape for the `licenses` table; the revision rides along with
/// the record fields.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
#[derive(Debug, FromRow)]
struct LicenseRow {
    license_key: String,
    is_active: bool,
    expires_at: Option<NaiveDateTime>,
    bound_identifier: Option<String>,
    max_activations: i64,
    current_activations: i64,
    last_used_at: Option<NaiveDateTime>,
    revision: i64,
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<LicenseRow> for (LicenseRecord, i64) {
    fn from(row: LicenseRow) -> Self {
        (
            LicenseRecord {
                license_key: row.license_key,
                is_active: row.is_active,
                expires_at: row.expires_at,
                bound_identifier: row.bound_identifier,
                max_activations: row.max_activations,
                current_activations: row.current_activations,
                last_used_at: row.last_used_at,
            },
            row.revision,
        )
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
#[derive(Debug, FromRow)]
struct AuditRow {
    license_key: String,
    binding_identifier: String,
    action: String,
    source_ip: Option<String>,
    created_at: NaiveDateTime,
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            license_key: row.license_key,
            binding_identifier: row.binding_identifier,
            action: row.action,
            source_ip: row.source_ip,
            created_at: row.created_at,
        }
    }
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> LicenseError {
    error!("{context}: {e}");
    LicenseError::StorageUnavailable(format!("{context}: {e}"))
}

fn lock_err(context: &str) -> LicenseError {
    error!("{context}: lock poisoned");
    LicenseError::ServerError(format!("{context}: lock poisoned"))
}

impl Database {
    /// Initialize storage based on the global configuration.
    pub async fn new() -> LicenseResult<Arc<Self>> {
        let config = get_config()?;
        let db_config = &config.database;

        match db_config.db_type.as_str() {
            "memory" => Ok(Arc::new(Database::Memory(MemoryStore::new()))),
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| storage_err("failed to connect to SQLite", e))?;
                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(LicenseError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| storage_err("failed to connect to PostgreSQL", e))?;
                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(LicenseError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(LicenseError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Create the `licenses` and `license_audit` tables if missing.
    ///
    /// No-op for the in-memory store.
    pub async fn ensure_schema(&self) -> LicenseResult<()> {
        match self {
            Database::Memory(_) => Ok(()),
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    CREATE TABLE IF NOT EXISTS licenses (
                        license_key         TEXT PRIMARY KEY,
                        is_active           BOOLEAN NOT NULL DEFAULT 1,
                        expires_at          TIMESTAMP,
                        bound_identifier    TEXT,
                        max_activations     INTEGER NOT NULL DEFAULT 1,
                        current_activations INTEGER NOT NULL DEFAULT 0,
                        last_used_at        TIMESTAMP,
                        revision            INTEGER NOT NULL DEFAULT 0
                    )
                    "#,
                )
                .execute(pool)
                .await
                .map_err(|e| storage_err("SQLite ensure_schema failed", e))?;

                query(
                    r#"
                    CREATE TABLE IF NOT EXISTS license_audit (
                        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                        license_key         TEXT NOT NULL,
                        binding_identifier  TEXT NOT NULL,
                        action              TEXT NOT NULL,
                        source_ip           TEXT,
                        created_at          TIMESTAMP NOT NULL
                    )
                    "#,
                )
                .execute(pool)
                .await
                .map_err(|e| storage_err("SQLite ensure_schema failed", e))?;

                Ok(())
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    CREATE TABLE IF NOT EXISTS licenses (
                        license_key         TEXT PRIMARY KEY,
                        is_active           BOOLEAN NOT NULL DEFAULT TRUE,
                        expires_at          TIMESTAMP,
                        bound_identifier    TEXT,
                        max_activations     BIGINT NOT NULL DEFAULT 1,
                        current_activations BIGINT NOT NULL DEFAULT 0,
                        last_used_at        TIMESTAMP,
                        revision            BIGINT NOT NULL DEFAULT 0
                    )
                    "#,
                )
                .execute(pool)
                .await
                .map_err(|e| storage_err("Postgres ensure_schema failed", e))?;

                query(
                    r#"
                    CREATE TABLE IF NOT EXISTS license_audit (
                        id                  BIGSERIAL PRIMARY KEY,
                        license_key         TEXT NOT NULL,
                        binding_identifier  TEXT NOT NULL,
                        action              TEXT NOT NULL,
                        source_ip           TEXT,
                        created_at          TIMESTAMP NOT NULL
                    )
                    "#,
                )
                .execute(pool)
                .await
                .map_err(|e| storage_err("Postgres ensure_schema failed", e))?;

                Ok(())
            }
        }
    }

    /// Cheap connectivity probe used by the health endpoint.
    pub async fn ping(&self) -> LicenseResult<()> {
        match self {
            Database::Memory(_) => Ok(()),
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| storage_err("SQLite ping failed", e))?;
                Ok(())
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| storage_err("Postgres ping failed", e))?;
                Ok(())
            }
        }
    }

    /// Backend name, surfaced by the health endpoint.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Database::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Insert a new license or overwrite an existing one.
    ///
    /// Used for provisioning and tests; an overwrite bumps the
    /// revision so in-flight conditional commits against the old state
    /// fail instead of clobbering the new one.
    pub async fn upsert_license(&self, record: LicenseRecord) -> LicenseResult<()> {
        match self {
            Database::Memory(store) => {
                let mut licenses = store
                    .inner
                    .licenses
                    .lock()
                    .map_err(|_| lock_err("memory upsert_license"))?;
                let revision = licenses
                    .get(&record.license_key)
                    .map(|(_, rev)| rev + 1)
                    .unwrap_or(0);
                licenses.insert(record.license_key.clone(), (record, revision));
                Ok(())
            }
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        license_key,
                        is_active,
                        expires_at,
                        bound_identifier,
                        max_activations,
                        current_activations,
                        last_used_at,
                        revision
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, 0)
                    ON CONFLICT(license_key) DO UPDATE SET
                        is_active           = excluded.is_active,
                        expires_at          = excluded.expires_at,
                        bound_identifier    = excluded.bound_identifier,
                        max_activations     = excluded.max_activations,
                        current_activations = excluded.current_activations,
                        last_used_at        = excluded.last_used_at,
                        revision            = revision + 1
                    "#,
                )
                .bind(&record.license_key)
                .bind(record.is_active)
                .bind(record.expires_at)
                .bind(&record.bound_identifier)
                .bind(record.max_activations)
                .bind(record.current_activations)
                .bind(record.last_used_at)
                .execute(pool)
                .await
                .map_err(|e| storage_err("SQLite upsert_license failed", e))?;
                Ok(())
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        license_key,
                        is_active,
                        expires_at,
                        bound_identifier,
                        max_activations,
                        current_activations,
                        last_used_at,
                        revision
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
                    ON CONFLICT (license_key) DO UPDATE SET
                        is_active           = EXCLUDED.is_active,
                        expires_at          = EXCLUDED.expires_at,
                        bound_identifier    = EXCLUDED.bound_identifier,
                        max_activations     = EXCLUDED.max_activations,
                        current_activations = EXCLUDED.current_activations,
                        last_used_at        = EXCLUDED.last_used_at,
                        revision            = revision + 1
                    "#,
                )
                .bind(&record.license_key)
                .bind(record.is_active)
                .bind(record.expires_at)
                .bind(&record.bound_identifier)
                .bind(record.max_activations)
                .bind(record.current_activations)
                .bind(record.last_used_at)
                .execute(pool)
                .await
                .map_err(|e| storage_err("Postgres upsert_license failed", e))?;
                Ok(())
            }
        }
    }

    /// Fetch a license together with its revision marker.
    ///
    /// Returns:
    /// - `Ok(Some((record, revision)))` if found
    /// - `Ok(None)` if not found
    /// - `Err(LicenseError::StorageUnavailable)` on backend failure
    pub async fn fetch_license(
        &self,
        license_key: &str,
    ) -> LicenseResult<Option<(LicenseRecord, i64)>> {
        match self {
            Database::Memory(store) => {
                let licenses = store
                    .inner
                    .licenses
                    .lock()
                    .map_err(|_| lock_err("memory fetch_license"))?;
                Ok(licenses.get(license_key).cloned())
            }
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let row = query_as::<_, LicenseRow>(
                    "SELECT license_key, is_active, expires_at, bound_identifier, \
                     max_activations, current_activations, last_used_at, revision \
                     FROM licenses WHERE license_key = ?",
                )
                .bind(license_key)
                .fetch_optional(pool)
                .await
                .map_err(|e| storage_err("SQLite fetch_license failed", e))?;
                Ok(row.map(Into::into))
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let row = query_as::<_, LicenseRow>(
                    "SELECT license_key, is_active, expires_at, bound_identifier, \
                     max_activations, current_activations, last_used_at, revision \
                     FROM licenses WHERE license_key = $1",
                )
                .bind(license_key)
                .fetch_optional(pool)
                .await
                .map_err(|e| storage_err("Postgres fetch_license failed", e))?;
                Ok(row.map(Into::into))
            }
        }
    }

    /// Conditionally write a new record state.
    ///
    /// The write only happens if the stored revision still equals
    /// `expected_revision`; otherwise another request committed in
    /// between and `Conflict` is returned. A committed write bumps the
    /// revision.
    pub async fn commit_license(
        &self,
        expected_revision: i64,
        record: &LicenseRecord,
    ) -> LicenseResult<CommitOutcome> {
        match self {
            Database::Memory(store) => {
                let mut licenses = store
                    .inner
                    .licenses
                    .lock()
                    .map_err(|_| lock_err("memory commit_license"))?;
                match licenses.get_mut(&record.license_key) {
                    Some((stored, revision)) if *revision == expected_revision => {
                        *stored = record.clone();
                        *revision += 1;
                        Ok(CommitOutcome::Committed)
                    }
                    _ => Ok(CommitOutcome::Conflict),
                }
            }
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let result = query(
                    "UPDATE licenses SET \
                         is_active           = ?, \
                         expires_at          = ?, \
                         bound_identifier    = ?, \
                         max_activations     = ?, \
                         current_activations = ?, \
                         last_used_at        = ?, \
                         revision            = revision + 1 \
                     WHERE license_key = ? AND revision = ?",
                )
                .bind(record.is_active)
                .bind(record.expires_at)
                .bind(&record.bound_identifier)
                .bind(record.max_activations)
                .bind(record.current_activations)
                .bind(record.last_used_at)
                .bind(&record.license_key)
                .bind(expected_revision)
                .execute(pool)
                .await
                .map_err(|e| storage_err("SQLite commit_license failed", e))?;

                if result.rows_affected() > 0 {
                    Ok(CommitOutcome::Committed)
                } else {
                    Ok(CommitOutcome::Conflict)
                }
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let result = query(
                    "UPDATE licenses SET \
                         is_active           = $1, \
                         expires_at          = $2, \
                         bound_identifier    = $3, \
                         max_activations     = $4, \
                         current_activations = $5, \
                         last_used_at        = $6, \
                         revision            = revision + 1 \
                     WHERE license_key = $7 AND revision = $8",
                )
                .bind(record.is_active)
                .bind(record.expires_at)
                .bind(&record.bound_identifier)
                .bind(record.max_activations)
                .bind(record.current_activations)
                .bind(record.last_used_at)
                .bind(&record.license_key)
                .bind(expected_revision)
                .execute(pool)
                .await
                .map_err(|e| storage_err("Postgres commit_license failed", e))?;

                if result.rows_affected() > 0 {
                    Ok(CommitOutcome::Committed)
                } else {
                    Ok(CommitOutcome::Conflict)
                }
            }
        }
    }

    /// Append one audit entry.
    ///
    /// Callers treat this as best-effort; see the service layer.
    pub async fn append_audit(&self, entry: &AuditEntry) -> LicenseResult<()> {
        match self {
            Database::Memory(store) => {
                let mut audit = store
                    .inner
                    .audit
                    .lock()
                    .map_err(|_| lock_err("memory append_audit"))?;
                audit.push(entry.clone());
                Ok(())
            }
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO license_audit \
                         (license_key, binding_identifier, action, source_ip, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&entry.license_key)
                .bind(&entry.binding_identifier)
                .bind(&entry.action)
                .bind(&entry.source_ip)
                .bind(entry.created_at)
                .execute(pool)
                .await
                .map_err(|e| storage_err("SQLite append_audit failed", e))?;
                Ok(())
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO license_audit \
                         (license_key, binding_identifier, action, source_ip, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&entry.license_key)
                .bind(&entry.binding_identifier)
                .bind(&entry.action)
                .bind(&entry.source_ip)
                .bind(entry.created_at)
                .execute(pool)
                .await
                .map_err(|e| storage_err("Postgres append_audit failed", e))?;
                Ok(())
            }
        }
    }

    /// Fetch the audit trail for a key, oldest first.
    pub async fn fetch_audit(&self, license_key: &str) -> LicenseResult<Vec<AuditEntry>> {
        match self {
            Database::Memory(store) => {
                let audit = store
                    .inner
                    .audit
                    .lock()
                    .map_err(|_| lock_err("memory fetch_audit"))?;
                Ok(audit
                    .iter()
                    .filter(|e| e.license_key == license_key)
                    .cloned()
                    .collect())
            }
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let rows = query_as::<_, AuditRow>(
                    "SELECT license_key, binding_identifier, action, source_ip, created_at \
                     FROM license_audit WHERE license_key = ? ORDER BY id",
                )
                .bind(license_key)
                .fetch_all(pool)
                .await
                .map_err(|e| storage_err("SQLite fetch_audit failed", e))?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let rows = query_as::<_, AuditRow>(
                    "SELECT license_key, binding_identifier, action, source_ip, created_at \
                     FROM license_audit WHERE license_key = $1 ORDER BY id",
                )
                .bind(license_key)
                .fetch_all(pool)
                .await
                .map_err(|e| storage_err("Postgres fetch_audit failed", e))?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }
}
