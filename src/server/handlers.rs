//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::streaming::create_chat_stream;
use crate::engine::CompletionOrchestrator;
use crate::error::GatewayError;
use crate::store::SharedStore;
use crate::types::{ChatCompletionRequest, ModelInfo, ModelsResponse};

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<CompletionOrchestrator>,
    pub store: Arc<dyn SharedStore>,
    /// Token expected in the `Authorization` header
    pub auth_token: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<CompletionOrchestrator>,
        store: Arc<dyn SharedStore>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            auth_token: auth_token.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub store: &'static str,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                dependencies: DependencyStatus { store: "ok" },
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    dependencies: DependencyStatus {
                        store: "unavailable",
                    },
                }),
            )
        }
    }
}

/// List configured models
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let data = state
        .orchestrator
        .registry()
        .list_ids()
        .into_iter()
        .map(|id| ModelInfo {
            id,
            object: "model".to_string(),
            owned_by: "user".to_string(),
        })
        .collect();

    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

/// Chat completion endpoint
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    request: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = request?;
    if request.stream {
        let events = state.orchestrator.stream(request).await?;
        Ok(create_chat_stream(events).into_response())
    } else {
        let completion = state.orchestrator.complete(request).await?;
        Ok((StatusCode::OK, Json(completion)).into_response())
    }
}
