//! Password reset tokens.
//!
//! A reset request for a registered email issues a random token, stores its
//! digest and hands the plaintext to a [`ResetDelivery`]. Redeeming the token
//! sets the new password and resets the signing key, so every token issued
//! under the old password stops working.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::AuthError;
use super::keys::KeyCustodian;
use super::node_credentials::credential_digest;
use super::password::hash_password;
use crate::models::identity::User;
use crate::store::IdentityStore;

/// Reset token lifetime.
pub const RESET_TOKEN_EXPIRY_SECS: i64 = 60 * 60;

/// Hands a freshly issued reset token to its owner.
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, user: &User, token: &str) -> Result<(), AuthError>;
}

/// Delivery used when no mailer is wired in. The token is dropped.
pub struct DiscardDelivery;

#[async_trait]
impl ResetDelivery for DiscardDelivery {
    async fn deliver(&self, user: &User, _token: &str) -> Result<(), AuthError> {
        warn!(user_id = user.id, "no reset delivery configured, token discarded");
        Ok(())
    }
}

/// Issues and redeems password reset tokens.
#[derive(Clone)]
pub struct PasswordResets {
    identities: Arc<dyn IdentityStore>,
    keys: KeyCustodian,
    delivery: Arc<dyn ResetDelivery>,
}

impl PasswordResets {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        keys: KeyCustodian,
        delivery: Arc<dyn ResetDelivery>,
    ) -> Self {
        Self {
            identities,
            keys,
            delivery,
        }
    }

    /// Issue a reset token for the account registered with `email`. Unknown
    /// addresses succeed silently so callers cannot probe for accounts.
    pub async fn request(&self, email: &str) -> Result<(), AuthError> {
        self.request_at(email, Utc::now()).await
    }

    pub async fn request_at(&self, email: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(user) = self.identities.user_by_email(email).await? else {
            info!("password reset requested for unknown email");
            return Ok(());
        };

        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::seconds(RESET_TOKEN_EXPIRY_SECS);
        self.identities
            .put_password_reset(user.id, &credential_digest(&token), expires_at)
            .await?;
        self.delivery.deliver(&user, &token).await?;

        info!(user_id = user.id, "password reset token issued");
        Ok(())
    }

    /// Consume `token` and set `new_password`. Unknown, used and expired
    /// tokens all fail with `ResetTokenNotFound`.
    pub async fn redeem(&self, token: &str, new_password: &str) -> Result<User, AuthError> {
        self.redeem_at(token, new_password, Utc::now()).await
    }

    pub async fn redeem_at(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::ValidationError("password must not be empty".into()));
        }

        let (user_id, expires_at) = self
            .identities
            .take_password_reset(&credential_digest(token))
            .await?
            .ok_or(AuthError::ResetTokenNotFound)?;
        if now > expires_at {
            return Err(AuthError::ResetTokenNotFound);
        }
        let mut user = self
            .identities
            .user_by_id(user_id)
            .await?
            .ok_or(AuthError::ResetTokenNotFound)?;

        user.password_hash = hash_password(new_password)?;
        self.identities.save_user(&user).await?;
        self.keys.reset(&mut user).await?;

        info!(user_id = user.id, "password reset");
        Ok(user)
    }
}
