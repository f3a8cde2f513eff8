//! Route definitions

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::auth::require_bearer;
use super::handlers::{chat_completions, health, list_models, AppState};

/// Create the API router with OpenAI-compatible endpoints
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // OpenAI-compatible endpoints, token required
    let protected = Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route_layer(middleware::from_fn_with_state(state, require_bearer));

    Router::new()
        // Health check
        .route("/health", get(health))
        .merge(protected)
}
