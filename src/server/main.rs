use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use warden::config::init_config;
use warden::server::database::Database;
use warden::server::logging::init_tracing;
use warden::server::routes::build_router;
use warden::server::service::LicenseService;
use warden::server::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = init_config()?;
    init_tracing(&config.logging.level)?;

    let db = Database::new().await?;
    db.ensure_schema().await?;
    info!("storage backend: {}", db.backend_name());

    let state = AppState {
        service: LicenseService::new(db),
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
