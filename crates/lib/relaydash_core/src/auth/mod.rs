//! Authentication: token signing and verification, per-user signing keys,
//! the refresh token registry, node credentials, password resets and caller
//! classification.

pub mod jwt;
pub mod keys;
pub mod node_credentials;
pub mod password;
pub mod password_reset;
pub mod queries;
pub mod refresh;
pub mod resolver;

use thiserror::Error;

use crate::policy::PolicyError;
use crate::store::StoreError;

pub use jwt::{TokenClaims, TokenError, TokenKind, TokenSigner};
pub use keys::KeyCustodian;
pub use node_credentials::NodeCredentials;
pub use password_reset::{DiscardDelivery, PasswordResets, ResetDelivery};
pub use refresh::{RefreshTokenSet, RegistryError, TokenRegistry};
pub use resolver::{Caller, IdentityResolver};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Refresh token error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Password reset token not found")]
    ResetTokenNotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Internal error: {0}")]
    Internal(String),
}
