//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use era_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Internal(detail) => {
                error!(%detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::Conflict(msg) => AppError::Conflict(msg),
            AuthError::CredentialError => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::Expired => AppError::Unauthorized("Token expired".into()),
            AuthError::NotFound => AppError::Unauthorized("Invalid or revoked token".into()),
            AuthError::Upstream(_) => {
                AppError::Unauthorized("Identity token verification failed".into())
            }
            AuthError::Store(e) => AppError::Internal(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: AuthError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        assert_eq!(
            status_of(AuthError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AuthError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(AuthError::CredentialError), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::NotFound), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::Upstream("jwks down".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AuthError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_detail_is_not_exposed() {
        let err = AppError::from(AuthError::Upstream("10.0.0.3 refused".into()));
        assert!(!err.to_string().contains("10.0.0.3"));
    }
}
