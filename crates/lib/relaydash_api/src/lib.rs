//! # relaydash_api
//!
//! HTTP API library for Relaydash. Every route sits behind the access
//! middleware; what a caller may reach is decided by policy grants alone.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use axum::routing::{delete, get, post};
use relaydash_core::AccessControl;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, nodes, password, users};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Identity resolution, token issuance and policy enforcement.
    pub access: AccessControl,
}

/// Run embedded database migrations.
///
/// Delegates to `relaydash_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    relaydash_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(routes::POST_REGISTER, post(auth::register_handler))
        .route(routes::POST_LOGIN, post(auth::login_handler))
        .route(routes::DELETE_LOGOUT, delete(auth::logout_handler))
        .route(routes::POST_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_PASSWORD_FORGET, post(password::forget_handler))
        .route(routes::POST_PASSWORD_RESET, post(password::reset_handler))
        .route(routes::GET_USERS_USERNAME, get(users::show_handler))
        .route(
            routes::POST_NODES_NID_TOKEN,
            post(nodes::regenerate_token_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::authorize,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
