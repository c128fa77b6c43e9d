//! # era_api
//!
//! HTTP API library for EraCheck authentication.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use era_core::auth::session::SessionService;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, health};

/// Route paths.
pub mod routes {
    pub const GET_API_HEALTH: &str = "/api/health";
    pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
    pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
    pub const POST_AUTH_APPLE: &str = "/api/auth/apple";
    pub const POST_AUTH_REFRESH: &str = "/api/auth/refresh";
    pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
    pub const DELETE_AUTH_ACCOUNT: &str = "/api/auth/account";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_API_HEALTH, get(health::health))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_APPLE, post(auth::apple_sign_in_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(
            routes::DELETE_AUTH_ACCOUNT,
            delete(auth::delete_account_handler),
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
