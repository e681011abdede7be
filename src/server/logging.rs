//! Request logging middleware for the Warden server.
//!
//! Provides structured logging for all API requests:
//! - Unique request ID tracking
//! - Request timing
//! - Method, path, and status logging
//! - Request ID propagation in response headers

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::errors::{LicenseError, LicenseResult};

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Generate a new unique request ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Install the global tracing subscriber at the configured level.
pub fn init_tracing(level: &str) -> LicenseResult<()> {
    let filter = level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .map_err(|e| LicenseError::ConfigError(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .try_init()
        .map_err(|e| LicenseError::ServerError(format!("failed to init tracing: {e}")))
}

/// Logging middleware that tracks request timing and generates
/// request IDs.
///
/// 1. Generates a unique request ID for each incoming request
/// 2. Creates a tracing span with the request ID
/// 3. Logs the request method and path
/// 4. Measures and logs the response time
/// 5. Adds the request ID to the response headers
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = async move {
        info!("Started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    info!(
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}
