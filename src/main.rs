use std::net::SocketAddr;

use anyhow::anyhow;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicebridge::{ServerConfig, handlers, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,voicebridge=debug".into()),
        )
        .init();

    // Load configuration; missing credentials abort startup with exit
    // code 1 via the error return.
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();
    info!(
        environment = %config.environment,
        public_url = %config.public_base_url(),
        "Starting voice bridge on {address}"
    );

    // Create application state (spawns prewarm and maintenance tasks)
    let app_state = AppState::new(config).await;

    // Public health check route
    let public_routes = Router::new().route("/", axum::routing::get(handlers::calls::health_check));

    // Combine all routes: public + API/TwiML + media-stream WebSockets
    let app = public_routes
        .merge(routes::api::create_api_router())
        .merge(routes::media::create_media_router())
        .with_state(app_state);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{socket_addr}");
    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
