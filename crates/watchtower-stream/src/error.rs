//! API error types and response formatting for the SSE surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
///
/// The auth variants carry the exact status/message contract browsers rely
/// on to distinguish "reauthenticate" from "retry" conditions.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No bearer token in the query string.
    #[error("bearer is required")]
    MissingBearer,

    /// Token signature verified but the token has expired.
    #[error("session expired")]
    TokenExpired,

    /// Token `nbf` lies in the future.
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// Token audience does not match this API.
    #[error("invalid audience")]
    InvalidAudience,

    /// Token issuer does not match the expected directory.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// Token signature could not be verified.
    #[error("invalid signature")]
    InvalidSignature,

    /// Token is valid but lacks the required scope.
    #[error("insufficient permissions")]
    InsufficientScope,

    /// Any other token problem (malformed, unknown key id, JWKS fetch
    /// failure). Deliberately generic.
    #[error("invalid token")]
    InvalidToken,

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingBearer => (StatusCode::UNAUTHORIZED, "bearer is required".to_string()),
            Self::TokenExpired => (
                StatusCode::FORBIDDEN,
                "Session expired - please reauthenticate".to_string(),
            ),
            Self::TokenNotYetValid => {
                (StatusCode::UNAUTHORIZED, "Token not yet valid".to_string())
            }
            Self::InvalidAudience => {
                (StatusCode::UNAUTHORIZED, "Invalid token audience".to_string())
            }
            Self::InvalidIssuer => (StatusCode::UNAUTHORIZED, "Invalid token issuer".to_string()),
            Self::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "Invalid token signature".to_string(),
            ),
            Self::InsufficientScope => (
                StatusCode::FORBIDDEN,
                "Insufficient permissions".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "Invalid authentication token".to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse { error: message };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_token_is_forbidden() {
        let response = ApiError::TokenExpired.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_missing_scope_is_forbidden() {
        let response = ApiError::InsufficientScope.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_signature_and_issuer_failures_are_unauthorized() {
        assert_eq!(
            ApiError::InvalidSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidIssuer.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidAudience.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
