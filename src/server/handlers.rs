//! Axum HTTP handlers for the license endpoints.
//!
//! These are thin adapters: they validate the request fields, extract
//! the caller's address, invoke the [`LicenseService`], and translate
//! its outcome into the wire contract. All decision logic lives in the
//! engine; all persistence in the store.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::engine::DenyReason;
use crate::errors::LicenseError;
use crate::server::service::{LicenseService, ServiceOutcome};
use crate::server::validation::{validate_identifier, validate_license_key};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: LicenseService,
}

/// Error half of every handler result.
///
/// Denials carry their reason code; validation failures name the bad
/// field; internal faults are opaque by design.
#[derive(Debug)]
pub enum ApiError {
    Denied(DenyReason),
    Validation(String),
    Internal,
}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        // Fault detail stays server-side.
        error!("internal fault: {err}");
        ApiError::Internal
    }
}

/// Error response body shared by all endpoints.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Denied(DenyReason::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Denied(DenyReason::Conflict) => StatusCode::CONFLICT,
            ApiError::Denied(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ApiError::Denied(reason) => ErrorResponse {
                success: false,
                error: serde_json::to_value(reason)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "DENIED".to_string()),
                message: reason.message().to_string(),
            },
            ApiError::Validation(message) => ErrorResponse {
                success: false,
                error: "INVALID_REQUEST".to_string(),
                message,
            },
            ApiError::Internal => ErrorResponse {
                success: false,
                error: "INTERNAL_ERROR".to_string(),
                message: "Internal server error".to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Request body for activate/verify/deactivate.
#[derive(Debug, Deserialize, Serialize)]
pub struct LicenseRequest {
    pub license_key: String,
    pub binding_identifier: String,
}

/// Response body for activate/verify.
#[derive(Debug, Deserialize, Serialize)]
pub struct LicenseResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<NaiveDateTime>,
}

/// Response body for deactivate.
#[derive(Debug, Deserialize, Serialize)]
pub struct DeactivateResponse {
    pub success: bool,
    pub message: String,
}

/// Request body for the privileged force-rebind endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterBindingRequest {
    pub license_key: String,
    pub new_binding_identifier: String,
}

/// Response body for the privileged force-rebind endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterBindingResponse {
    pub status: String,
    pub message: String,
}

/// Health endpoint body.
#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub timestamp: NaiveDateTime,
}

/// Caller address: first `X-Forwarded-For` entry when present,
/// otherwise the socket peer.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }
    }
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn validate_request(license_key: &str, identifier: &str) -> Result<(), ApiError> {
    validate_license_key(license_key, "license_key")
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    validate_identifier(identifier, "binding_identifier")
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(())
}

/// `POST /api/license/activate`
pub async fn activate_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    validate_request(&req.license_key, &req.binding_identifier)?;
    let source_ip = client_ip(&headers, connect_info.as_ref());

    let outcome = state
        .service
        .activate(&req.license_key, &req.binding_identifier, source_ip)
        .await?;

    match outcome {
        ServiceOutcome::Granted { expires_at } => Ok(Json(LicenseResponse {
            success: true,
            message: "License activated successfully".to_string(),
            expires_at,
        })),
        ServiceOutcome::Denied(reason) => Err(ApiError::Denied(reason)),
    }
}

/// `POST /api/license/verify`
pub async fn verify_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    validate_request(&req.license_key, &req.binding_identifier)?;
    let source_ip = client_ip(&headers, connect_info.as_ref());

    let outcome = state
        .service
        .verify(&req.license_key, &req.binding_identifier, source_ip)
        .await?;

    match outcome {
        ServiceOutcome::Granted { expires_at } => Ok(Json(LicenseResponse {
            success: true,
            message: "License is valid".to_string(),
            expires_at,
        })),
        ServiceOutcome::Denied(reason) => Err(ApiError::Denied(reason)),
    }
}

/// `POST /api/license/deactivate`
pub async fn deactivate_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LicenseRequest>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    validate_request(&req.license_key, &req.binding_identifier)?;
    let source_ip = client_ip(&headers, connect_info.as_ref());

    let outcome = state
        .service
        .deactivate(&req.license_key, &req.binding_identifier, source_ip)
        .await?;

    match outcome {
        ServiceOutcome::Granted { .. } => Ok(Json(DeactivateResponse {
            success: true,
            message: "License deactivated successfully".to_string(),
        })),
        ServiceOutcome::Denied(reason) => Err(ApiError::Denied(reason)),
    }
}

/// `POST /api/license/register-binding` (privileged)
///
/// Force-rebinds a license to a new identifier without requiring the
/// old identifier to match. Intended for device resets; route this
/// behind whatever operator authentication the deployment uses.
pub async fn register_binding_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<RegisterBindingRequest>,
) -> Result<Json<RegisterBindingResponse>, ApiError> {
    validate_request(&req.license_key, &req.new_binding_identifier)?;
    let source_ip = client_ip(&headers, connect_info.as_ref());

    let outcome = state
        .service
        .register_binding(&req.license_key, &req.new_binding_identifier, source_ip)
        .await?;

    match outcome {
        ServiceOutcome::Granted { .. } => Ok(Json(RegisterBindingResponse {
            status: "ok".to_string(),
            message: "Binding registered".to_string(),
        })),
        ServiceOutcome::Denied(reason) => Err(ApiError::Denied(reason)),
    }
}

/// `GET /api/health`
///
/// Probes store reachability only; no decision logic.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let timestamp = Utc::now().naive_utc();
    match state.service.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: "connected".to_string(),
                timestamp,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("health probe failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: "disconnected".to_string(),
                    timestamp,
                }),
            )
                .into_response()
        }
    }
}

/// `GET /` - service information.
pub async fn index_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Warden License API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "endpoints": {
            "health": "/api/health [GET]",
            "activate": "/api/license/activate [POST]",
            "verify": "/api/license/verify [POST]",
            "deactivate": "/api/license/deactivate [POST]",
            "register_binding": "/api/license/register-binding [POST]"
        }
    }))
}
