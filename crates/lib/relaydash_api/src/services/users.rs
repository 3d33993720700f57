//! User profile reads.

use relaydash_core::AccessControl;

use crate::error::{AppError, AppResult};
use crate::models::UserResponse;

pub async fn show(access: &AccessControl, username: &str) -> AppResult<UserResponse> {
    let user = access
        .identities
        .user_by_username(username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {username} not found")))?;
    Ok(UserResponse {
        user: user.public(),
    })
}
