//! User handlers.

use axum::Json;
use axum::extract::{Path, State};

use crate::AppState;
use crate::error::AppResult;
use crate::models::UserResponse;
use crate::services::users;

/// `GET /users/{username}`
pub async fn show_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<UserResponse>> {
    Ok(Json(users::show(&state.access, &username).await?))
}
