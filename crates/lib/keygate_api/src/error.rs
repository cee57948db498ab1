//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use keygate_core::auth::AuthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `INCORRECT_USERNAME_OR_PASSWORD`.
    pub error: String,
    pub message: String,
}

/// Application-level errors with HTTP status mapping. Each variant carries a
/// stable error code and a client-facing message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {1}")]
    Validation(&'static str, String),

    #[error("Not found: {1}")]
    NotFound(&'static str, String),

    #[error("Unauthorized: {1}")]
    Unauthorized(&'static str, String),

    #[error("Forbidden: {1}")]
    Forbidden(&'static str, String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Upstream delivery failed: {0}")]
    BadGateway(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(code, m) => (StatusCode::BAD_REQUEST, *code, m.as_str()),
            AppError::NotFound(code, m) => (StatusCode::NOT_FOUND, *code, m.as_str()),
            AppError::Unauthorized(code, m) => (StatusCode::UNAUTHORIZED, *code, m.as_str()),
            AppError::Forbidden(code, m) => (StatusCode::FORBIDDEN, *code, m.as_str()),
            AppError::NotImplemented(m) => {
                (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED", m.as_str())
            }
            AppError::BadGateway(detail) => {
                warn!(%detail, "notification delivery failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "DELIVERY_FAILED",
                    "Could not deliver the message",
                )
            }
            AppError::Internal(detail) => {
                warn!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
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
        let message = e.to_string();
        match e {
            AuthError::IncorrectCredentials => {
                AppError::NotFound("INCORRECT_USERNAME_OR_PASSWORD", message)
            }
            AuthError::RefreshTokenNotFound => AppError::NotFound("MISSING_REFRESH_TOKEN", message),
            AuthError::IncorrectPassword => AppError::Forbidden("INCORRECT_PASSWORD", message),
            AuthError::AccountNotVerified => AppError::Forbidden("ACCOUNT_NOT_VERIFIED", message),
            AuthError::FeatureDisabled(_) => AppError::NotImplemented(message),
            AuthError::InvalidEmail => AppError::Validation("INVALID_EMAIL", message),
            AuthError::InvalidTokenInput => AppError::Validation("INVALID_TOKEN", message),
            AuthError::InvalidPassword(_) => AppError::Validation("INVALID_PASSWORD", message),
            AuthError::InvalidOrExpiredToken => {
                AppError::Validation("INVALID_OR_EXPIRED_TOKEN", message)
            }
            // Expired and invalid session tokens share one response.
            AuthError::InvalidToken | AuthError::ExpiredToken => {
                AppError::Unauthorized("INVALID_SESSION", "Invalid or expired token".into())
            }
            AuthError::DeliveryFailed(_) => AppError::BadGateway(message),
            AuthError::TokenGenerationFailed(_)
            | AuthError::Store(_)
            | AuthError::Hasher(_)
            | AuthError::Internal(_) => AppError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use keygate_core::notify::NotifyError;

    use super::*;

    fn status_of(e: AuthError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn maps_auth_errors_to_statuses() {
        assert_eq!(status_of(AuthError::IncorrectCredentials), StatusCode::NOT_FOUND);
        assert_eq!(status_of(AuthError::RefreshTokenNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(AuthError::IncorrectPassword), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AuthError::AccountNotVerified), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(AuthError::FeatureDisabled("refresh tokens")),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(status_of(AuthError::InvalidOrExpiredToken), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AuthError::InvalidEmail), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AuthError::ExpiredToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::DeliveryFailed(NotifyError::Transport("down".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(AuthError::TokenGenerationFailed(3)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn session_failures_are_indistinguishable() {
        let expired = AppError::from(AuthError::ExpiredToken).to_string();
        let invalid = AppError::from(AuthError::InvalidToken).to_string();
        assert_eq!(expired, invalid);
    }
}
