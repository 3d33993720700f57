//! Node handlers.

use axum::Json;
use axum::extract::{Path, State};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::NodeTokenResponse;
use crate::services::nodes;

/// `POST /nodes/{nid}/token`: regenerate the node's bearer credential.
pub async fn regenerate_token_handler(
    State(state): State<AppState>,
    Path(nid): Path<String>,
) -> AppResult<Json<NodeTokenResponse>> {
    let nid: i64 = nid
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid node id: {nid}")))?;
    Ok(Json(nodes::regenerate_token(&state.access, nid).await?))
}
