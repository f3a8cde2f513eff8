//! Error types for the gateway

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::types::{ErrorDetail, ErrorResponse};

/// Result type alias using the gateway's error
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Request-level failures, each mapped to one HTTP status
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Model '{requested}' not found. Available models: {available:?}")]
    NotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error(
        "Model '{id}' is configured but failed to load. Reason: {reason}. \
         Please check server logs and ensure the model file is correctly placed."
    )]
    ConfiguredLoadFailure { id: String, reason: String },

    #[error(
        "Model '{0}' is configured but could not be retrieved. \
         This indicates a server-side inconsistency. Please check the logs."
    )]
    InternalInconsistency(String),

    /// No processing slot within the timeout, or the queue itself is unreachable
    #[error("{0}")]
    Busy(String),

    #[error("An error occurred during model generation: {0}")]
    GenerationFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authorization header is missing")]
    Unauthorized,

    #[error("Invalid or expired API Key")]
    Forbidden,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ConfiguredLoadFailure { .. }
            | Self::InternalInconsistency(_)
            | Self::GenerationFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// OpenAI-style error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::InvalidRequest(_) => "invalid_request_error",
            Self::Unauthorized | Self::Forbidden => "authentication_error",
            Self::Busy(_) => "service_unavailable",
            _ => "server_error",
        }
    }

    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            message: self.to_string(),
            r#type: self.error_type().to_string(),
        }
    }
}

/// Malformed or mistyped request bodies get the same error shape as
/// validation failures
impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_detail(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_models() {
        let err = GatewayError::NotFound {
            requested: "nonexistent-model".to_string(),
            available: vec!["qwen3-0.6b".to_string(), "phi-3".to_string()],
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let message = err.to_string();
        assert!(message.contains("nonexistent-model"));
        assert!(message.contains("qwen3-0.6b"));
        assert!(message.contains("phi-3"));
    }

    #[test]
    fn test_load_failure_carries_reason_and_hint() {
        let err = GatewayError::ConfiguredLoadFailure {
            id: "phi-3".to_string(),
            reason: "Model path '/models/phi.gguf' for 'phi-3' not found".to_string(),
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let message = err.to_string();
        assert!(message.contains("/models/phi.gguf"));
        assert!(message.contains("ensure the model file is correctly placed"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Busy("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::GenerationFailure("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::InvalidRequest("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
