//! HTTP server for the gateway
//!
//! Provides OpenAI-compatible REST API.

mod auth;
mod handlers;
mod routes;
mod streaming;

use std::sync::Arc;

use anyhow::Result;
use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

pub use auth::{check_token, require_bearer};
pub use handlers::{AppState, DependencyStatus, HealthResponse};
pub use routes::api_routes;
pub use streaming::create_chat_stream;

/// Build the application router with its middleware stack
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .merge(api_routes(Arc::clone(&state)))
        .layer(DefaultBodyLimit::max(config.max_body_bytes));

    if config.cors_enabled() {
        let origins = if config.cors_allows_any() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(config.cors_origins.iter().filter_map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| tracing::warn!("Ignoring invalid CORS origin '{}'", origin))
                    .ok()
            }))
        };
        let cors = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    if config.trace_requests {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

/// Serve `app` until Ctrl+C
pub async fn start(app: Router, config: &ServerConfig) -> Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /health - Health check");
    tracing::info!("  GET  /v1/models - List models");
    tracing::info!("  POST /v1/chat/completions - Chat completion");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
}
