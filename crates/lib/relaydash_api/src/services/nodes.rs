//! Node credential management.

use relaydash_core::AccessControl;

use crate::error::{AppError, AppResult};
use crate::models::NodeTokenResponse;

/// Replace node `id`'s bearer credential and return the new one.
pub async fn regenerate_token(access: &AccessControl, id: i64) -> AppResult<NodeTokenResponse> {
    let credential = access
        .nodes
        .regenerate(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("node {id} not found")))?;
    Ok(NodeTokenResponse {
        access_token: credential,
    })
}
