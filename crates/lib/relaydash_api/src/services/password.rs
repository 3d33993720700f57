//! Forgotten-password flow: issue a reset token, then redeem it.

use relaydash_core::AccessControl;

use crate::error::{AppError, AppResult};
use crate::models::MessageResponse;

/// Same reply whether or not the address is registered.
pub const RESET_REQUESTED_MESSAGE: &str =
    "Password reset token has been sent to you if you already registered";

pub async fn forget(access: &AccessControl, email: &str) -> AppResult<MessageResponse> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AppError::Validation("email must not be empty".into()));
    }
    access.resets.request(email).await?;
    Ok(MessageResponse {
        message: RESET_REQUESTED_MESSAGE.to_string(),
    })
}

pub async fn reset(access: &AccessControl, token: &str, password: &str) -> AppResult<()> {
    access.resets.redeem(token, password).await?;
    Ok(())
}
