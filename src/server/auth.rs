//! Bearer-token check for the `/v1` routes

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::handlers::AppState;
use crate::error::GatewayError;

/// Accepts either `Bearer <token>` or the bare token
pub fn check_token(headers: &HeaderMap, expected: &str) -> Result<(), GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(GatewayError::Unauthorized)?
        .to_str()
        .map_err(|_| GatewayError::Forbidden)?;
    if value.is_empty() {
        return Err(GatewayError::Unauthorized);
    }

    let token = value.strip_prefix("Bearer ").unwrap_or(value);
    if token == expected {
        Ok(())
    } else {
        Err(GatewayError::Forbidden)
    }
}

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    check_token(request.headers(), &state.auth_token)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[test]
    fn test_bearer_and_raw_tokens_accepted() {
        assert!(check_token(&headers(Some("Bearer s3cret")), "s3cret").is_ok());
        assert!(check_token(&headers(Some("s3cret")), "s3cret").is_ok());
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        assert!(matches!(
            check_token(&headers(None), "s3cret"),
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            check_token(&headers(Some("")), "s3cret"),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[test]
    fn test_wrong_token_is_forbidden() {
        assert!(matches!(
            check_token(&headers(Some("Bearer nope")), "s3cret"),
            Err(GatewayError::Forbidden)
        ));
        assert!(matches!(
            check_token(&headers(Some("bearer s3cret")), "s3cret"),
            Err(GatewayError::Forbidden)
        ));
    }
}
