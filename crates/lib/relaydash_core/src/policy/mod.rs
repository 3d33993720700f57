//! Authorization: grant matching, enforcement, and keeping grants in step
//! with identity lifecycle changes.

pub mod engine;
pub mod matcher;
pub mod queries;
pub mod sync;

use thiserror::Error;

pub use engine::PolicyEngine;
pub use sync::PolicySync;

/// Policy errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}

impl From<sqlx::Error> for PolicyError {
    fn from(e: sqlx::Error) -> Self {
        PolicyError::StoreUnavailable(e.to_string())
    }
}
