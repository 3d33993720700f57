//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::models::{
    AccessTokenResponse, LoginRequest, RefreshTokenRequest, RegisterRequest, TokenResponse,
    UserResponse,
};
use crate::services::auth;

/// `POST /register`: create a new user account.
pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = auth::register(&state.access, &body).await?;
    Ok((StatusCode::CREATED, Json(UserResponse { user })))
}

/// `POST /login`: authenticate with username + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(&state.access, &body.username, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /refresh`: exchange a refresh token for a new access token.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshTokenRequest>,
) -> AppResult<Json<AccessTokenResponse>> {
    let resp = auth::refresh(&state.access, &body.refresh_token).await?;
    Ok(Json(resp))
}

/// `DELETE /logout`: revoke a refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshTokenRequest>,
) -> AppResult<StatusCode> {
    auth::logout(&state.access, &body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
