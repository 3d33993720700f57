//! Identity domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! types in `relaydash_api::models`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::refresh::RefreshTokenSet;

/// Longest accepted username.
pub const USERNAME_MAX_LEN: usize = 64;

/// Usernames are embedded verbatim in policy subjects and object patterns,
/// so only `[A-Za-z0-9_.-]` is accepted. This also rules out the subject
/// separator `::`, path separators and the `*` wildcard.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= USERNAME_MAX_LEN
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// A human account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    /// Per-account HMAC key. `None` until the first token is signed.
    pub signing_key: Option<Vec<u8>>,
    /// Live refresh tokens (token string -> expiry).
    pub refresh_tokens: RefreshTokenSet,
}

impl User {
    /// The public projection of this account.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

// Keys, hashes and tokens stay out of log output.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("has_signing_key", &self.signing_key.is_some())
            .field("refresh_tokens", &self.refresh_tokens.len())
            .finish_non_exhaustive()
    }
}

/// Fields required to insert a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
}

/// User as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

/// A relay node. The bearer credential itself is never held in memory after
/// issuance; only its digest is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
}
