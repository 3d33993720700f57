//! Access middleware: classify the caller, then ask the policy engine.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Axum middleware gating every route. Resolves the `Authorization` header to
/// a [`relaydash_core::auth::Caller`], rejects with 403 when no grant allows
/// the method on the path, and otherwise injects the caller into request
/// extensions.
pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let caller = state.access.resolver.resolve(header.as_deref()).await?;

    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();
    if !state.access.engine.authorize(&caller, &path, &method).await? {
        debug!(role = caller.role(), %path, %method, "request denied");
        return Err(AppError::Forbidden("Permission denied".into()));
    }

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}
