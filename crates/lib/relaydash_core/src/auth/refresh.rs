//! Refresh token registry.
//!
//! Each account carries the set of refresh tokens it has live, mapped to a
//! sliding expiry. A refresh token is only honoured while its exact string is
//! present and unexpired here; logout removes it.
//!
//! The set is persisted as a single text column. Storage adapters call
//! [`RefreshTokenSet::from_column`] after loading a user and
//! [`RefreshTokenSet::to_column`] before writing the column back. Writes only
//! happen through [`IdentityStore::update_refresh_tokens`], which edits the
//! stored set rather than the caller's copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::AuthError;
use super::jwt::{REFRESH_TOKEN_EXPIRY_SECS, TokenKind, TokenSigner};
use crate::models::identity::User;
use crate::store::{IdentityStore, StoreError};

/// Refresh token registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("refresh token not found")]
    TokenNotFound,

    #[error("refresh token expired")]
    TokenExpired,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Sliding window granted on issuance and on every renewal.
pub fn refresh_window() -> Duration {
    Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS)
}

/// Live refresh tokens of one account: token string -> expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshTokenSet(BTreeMap<String, DateTime<Utc>>);

impl RefreshTokenSet {
    /// Decode the persisted column. An empty column is an empty set.
    pub fn from_column(column: &str) -> Result<Self, StoreError> {
        if column.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(column)
            .map_err(|e| StoreError::Codec(format!("refresh token column: {e}")))
    }

    /// Encode for the persisted column.
    pub fn to_column(&self) -> Result<String, StoreError> {
        serde_json::to_string(self)
            .map_err(|e| StoreError::Codec(format!("refresh token column: {e}")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains_key(token)
    }

    pub fn expiry(&self, token: &str) -> Option<DateTime<Utc>> {
        self.0.get(token).copied()
    }

    pub fn insert(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.0.insert(token, expires_at);
    }

    /// Push `token`'s expiry to `now + window`.
    pub fn renew(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let expires_at = self.0.get_mut(token).ok_or(RegistryError::TokenNotFound)?;
        if now > *expires_at {
            return Err(RegistryError::TokenExpired);
        }
        *expires_at = now + refresh_window();
        Ok(*expires_at)
    }

    pub fn revoke(&mut self, token: &str) -> Result<(), RegistryError> {
        self.0
            .remove(token)
            .map(|_| ())
            .ok_or(RegistryError::TokenNotFound)
    }

    /// Drop entries whose expiry is before `now`. Returns how many were dropped.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.0.len();
        self.0.retain(|_, expires_at| *expires_at >= now);
        before - self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Issues, renews and revokes registry-tracked refresh tokens.
#[derive(Clone)]
pub struct TokenRegistry {
    identities: Arc<dyn IdentityStore>,
    signer: TokenSigner,
}

impl TokenRegistry {
    pub fn new(identities: Arc<dyn IdentityStore>, signer: TokenSigner) -> Self {
        Self { identities, signer }
    }

    /// Sign a refresh token for `user` and register it for the refresh
    /// window. Entries that already expired are dropped on the way.
    pub async fn issue_refresh(&self, user: &mut User) -> Result<String, AuthError> {
        let now = Utc::now();
        let token = self
            .signer
            .sign_at(user, TokenKind::Refresh, refresh_window(), now)
            .await?;

        let expires_at = now + refresh_window();
        let tokens = self
            .identities
            .update_refresh_tokens(user.id, &|set| {
                set.prune_expired(now);
                set.insert(token.clone(), expires_at);
                Ok(())
            })
            .await?
            .ok_or_else(|| {
                AuthError::KeyUnavailable(format!("user {} no longer exists", user.id))
            })?;
        user.refresh_tokens = tokens;

        debug!(
            user_id = user.id,
            live = user.refresh_tokens.len(),
            "refresh token issued"
        );
        Ok(token)
    }

    /// Slide `token`'s expiry to now plus the refresh window.
    pub async fn renew(
        &self,
        user: &mut User,
        token: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let now = Utc::now();
        let tokens = self
            .identities
            .update_refresh_tokens(user.id, &|set| set.renew(token, now).map(|_| ()))
            .await?
            .ok_or(RegistryError::TokenNotFound)?;
        let expires_at = tokens.expiry(token).ok_or(RegistryError::TokenNotFound)?;
        user.refresh_tokens = tokens;
        Ok(expires_at)
    }

    /// Remove `token` from `user`'s live set.
    pub async fn revoke(&self, user: &mut User, token: &str) -> Result<(), RegistryError> {
        let tokens = self
            .identities
            .update_refresh_tokens(user.id, &|set| set.revoke(token))
            .await?
            .ok_or(RegistryError::TokenNotFound)?;
        user.refresh_tokens = tokens;
        info!(user_id = user.id, "refresh token revoked");
        Ok(())
    }
}
