use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use crate::server::handlers::{
    activate_handler, deactivate_handler, health_handler, index_handler,
    register_binding_handler, verify_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

/// Build the main application router for the Warden server.
///
/// # Routes
///
/// - `GET  /` - Service information
/// - `GET  /api/health` - Store connectivity probe
/// - `POST /api/license/activate` - Activate (bind) a license
/// - `POST /api/license/verify` - Verify an existing binding
/// - `POST /api/license/deactivate` - Release a binding
/// - `POST /api/license/register-binding` - Privileged force-rebind
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/health", get(health_handler))
        .route("/api/license/activate", post(activate_handler))
        .route("/api/license/verify", post(verify_handler))
        .route("/api/license/deactivate", post(deactivate_handler))
        .route(
            "/api/license/register-binding",
            post(register_binding_handler),
        )
        .layer(ServiceBuilder::new().layer(middleware::from_fn(request_logging_middleware)))
        .with_state(state)
}
