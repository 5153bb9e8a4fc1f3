//! HTTP server assembly: router, state, bind, graceful shutdown.

pub mod api;

pub use api::{AppState, SharedState};

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub port: u16,
    /// Dev mode binds all interfaces and relaxes CORS.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4870,
            dev_mode: false,
        }
    }
}

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Start the server and run until shutdown.
pub async fn start_server(state: AppState, config: ServerConfig) -> Result<()> {
    let mut app = build_router(Arc::new(state));

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "sprout listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
