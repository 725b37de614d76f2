//! toolbridge HTTP Server
//!
//! Axum-based server running the tool-calling orchestration loop against
//! caller-supplied model credentials and tool registry servers.

mod config;
mod handlers;
mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::handlers::{chat_handler, health_check};
use crate::state::AppState;

/// Build the application router
fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        max_turns = config.max_turns,
        tool_timeout = ?config.tool_timeout,
        registry_health_check = config.registry.health_check,
        "Configuration loaded"
    );

    let addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("toolbridge server running on http://{}", addr);
    tracing::info!("  GET  /health - Health check");
    tracing::info!("  POST /chat   - Run a tool-calling conversation");

    axum::serve(listener, app(state)).await?;

    Ok(())
}
