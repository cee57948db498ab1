//! # keygate_api
//!
//! HTTP API library for Keygate.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use keygate_core::auth::AuthCore;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::auth;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authentication core shared by every request.
    pub core: Arc<AuthCore>,
}

/// Run embedded database migrations.
///
/// Delegates to `keygate_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    keygate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_TOKEN, post(auth::submit_refresh_token_handler))
        .route(
            routes::POST_AUTH_TOKEN_REJECT,
            post(auth::reject_refresh_token_handler),
        )
        .route(routes::POST_AUTH_RESET_TOKEN, post(auth::reset_token_handler))
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        )
        .route(
            routes::POST_AUTH_VERIFICATION,
            post(auth::request_verification_handler),
        )
        .route(routes::POST_AUTH_VERIFY, post(auth::verify_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::POST_AUTH_PASSWORD, post(auth::update_password_handler))
        .route(
            routes::GET_AUTH_VERIFICATION_STATUS,
            get(auth::verification_status_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
