//! Authentication request handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use keygate_core::auth::VerificationState;
use keygate_core::models::auth::{LoginResponse, RefreshResponse};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRefreshTokenRequest {
    pub username: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub old_password: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTokenRequest {
    pub email: String,
    pub reset_page_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub email: String,
    pub verify_page_url: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationStatusResponse {
    pub state: VerificationState,
}

/// `POST /auth/login`: authenticate with username + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let resp = state.core.login(&body.username, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /auth/token`: exchange a refresh token for a new session token.
pub async fn submit_refresh_token_handler(
    State(state): State<AppState>,
    Json(body): Json<SubmitRefreshTokenRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let resp = state
        .core
        .submit_refresh_token(&body.username, &body.refresh_token)
        .await?;
    Ok(Json(resp))
}

/// `POST /auth/token/reject`: revoke a refresh token.
pub async fn reject_refresh_token_handler(
    State(state): State<AppState>,
    Json(body): Json<RejectRefreshTokenRequest>,
) -> AppResult<StatusCode> {
    state.core.reject_refresh_token(&body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /auth/password`: change the caller's password. Requires authentication.
pub async fn update_password_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Json(body): Json<UpdatePasswordRequest>,
) -> AppResult<StatusCode> {
    let user_id = claims.user_id().ok_or_else(|| {
        AppError::Unauthorized("INVALID_SESSION", "Invalid or expired token".into())
    })?;
    state
        .core
        .update_password(user_id, &body.old_password, &body.password)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /auth/reset-token`: email a password reset link.
pub async fn reset_token_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetTokenRequest>,
) -> AppResult<StatusCode> {
    state
        .core
        .request_password_reset(&body.email, &body.reset_page_url)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /auth/reset-password/{token}`: set a new password with a reset token.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    state
        .core
        .redeem_password_reset(&token, &body.password)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /auth/verification`: email a verification link.
pub async fn request_verification_handler(
    State(state): State<AppState>,
    Json(body): Json<VerificationRequest>,
) -> AppResult<StatusCode> {
    state
        .core
        .request_verification(&body.email, &body.verify_page_url)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /auth/verify/{token}`: redeem a verification token. The password is
/// required when the deployment uses secure verification.
pub async fn verify_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<Json<VerifyRequest>>,
) -> AppResult<StatusCode> {
    let password = body.and_then(|Json(body)| body.password);
    state
        .core
        .redeem_verification(&token, password.as_deref())
        .await?;
    Ok(StatusCode::OK)
}

/// `GET /auth/verification-status`: verification state of the caller's email.
pub async fn verification_status_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<VerificationStatusResponse>> {
    let user_id = claims.user_id().ok_or_else(|| {
        AppError::Unauthorized("INVALID_SESSION", "Invalid or expired token".into())
    })?;
    let verification = state.core.verification_state(user_id).await?;
    Ok(Json(VerificationStatusResponse {
        state: verification,
    }))
}
