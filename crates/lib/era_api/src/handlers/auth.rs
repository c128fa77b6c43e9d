//! Authentication request handlers.

use axum::extract::State;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AppleSignInRequest, AuthResponse, DeleteAccountRequest, LoginRequest, LogoutRequest,
    RefreshRequest, RegisterRequest, SuccessResponse,
};

/// `POST /api/auth/register`: create a password account.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    let resp = state.service.register(&body.email, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /api/auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let resp = state.service.login(&body.email, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /api/auth/apple`: sign in with an Apple identity token.
pub async fn apple_sign_in_handler(
    State(state): State<AppState>,
    Json(body): Json<AppleSignInRequest>,
) -> AppResult<Json<AuthResponse>> {
    let resp = state
        .service
        .federated_sign_in(
            &body.identity_token,
            &state.config.apple_bundle_id,
            body.email.as_deref(),
            body.full_name.as_deref(),
        )
        .await?;
    Ok(Json(resp))
}

/// `POST /api/auth/refresh`: exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let resp = state.service.refresh(&body.refresh_token).await?;
    Ok(Json(resp))
}

/// `POST /api/auth/logout`: revoke a refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<LogoutRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.service.logout(&body.refresh_token).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// `DELETE /api/auth/account`: delete the caller's account. Requires
/// authentication.
pub async fn delete_account_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    body: Option<Json<DeleteAccountRequest>>,
) -> AppResult<Json<SuccessResponse>> {
    let password = body.map(|Json(b)| b.password).unwrap_or_default();
    state
        .service
        .delete_account(caller.user_id()?, &password)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}
