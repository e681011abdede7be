//! Server-side components for Warden.
//!
//! This module contains:
//! - `database`   → storage abstraction (memory/SQLite/Postgres) with
//!   versioned fetch and compare-and-swap commit
//! - `service`    → orchestration of fetch → decide → commit → audit
//! - `handlers`   → axum HTTP handlers for the license endpoints
//! - `routes`     → router builder
//! - `logging`    → request-id middleware and tracing setup
//! - `validation` → request field validation

pub mod database;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod service;
pub mod validation;

pub use database::{CommitOutcome, Database, MemoryStore};
pub use handlers::{
    activate_handler, deactivate_handler, health_handler, index_handler,
    register_binding_handler, verify_handler, ApiError, AppState, DeactivateResponse,
    HealthResponse, LicenseRequest, LicenseResponse, RegisterBindingRequest,
    RegisterBindingResponse,
};
pub use logging::{init_tracing, request_logging_middleware, REQUEST_ID_HEADER};
pub use routes::build_router;
pub use service::{LicenseService, ServiceOutcome};
pub use validation::{
    validate_identifier, validate_length, validate_license_key, validate_not_empty,
    ValidationError, ValidationResult,
};
