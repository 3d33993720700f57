//! Password reset handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::models::{ForgetPasswordRequest, MessageResponse, ResetPasswordRequest};
use crate::services::password;

/// `POST /password/forget`: issue a reset token for a registered email.
pub async fn forget_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(password::forget(&state.access, &body.email).await?))
}

/// `POST /password/reset`: set a new password with a reset token.
pub async fn reset_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    password::reset(&state.access, &body.token, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
