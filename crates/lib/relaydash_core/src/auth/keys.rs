//! Per-user signing keys.
//!
//! Every account signs its tokens with its own 128-byte HMAC key, generated
//! on first use and kept for the lifetime of the account. Generation goes
//! through a conditional store write so concurrent first calls settle on a
//! single persisted key.

use std::sync::Arc;

use rand::{RngCore, rng};
use tracing::{debug, info, warn};

use super::AuthError;
use crate::models::identity::User;
use crate::store::IdentityStore;

/// Signing key length in bytes.
pub const SIGNING_KEY_LEN: usize = 128;

/// Generate a fresh random signing key.
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; SIGNING_KEY_LEN];
    rng().fill_bytes(&mut key);
    key
}

/// Owns the lifecycle of per-user signing keys.
#[derive(Clone)]
pub struct KeyCustodian {
    identities: Arc<dyn IdentityStore>,
}

impl KeyCustodian {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Return `user`'s signing key, generating and persisting one if the
    /// account has none yet. `user.signing_key` is updated to the persisted key.
    pub async fn get_or_create(&self, user: &mut User) -> Result<Vec<u8>, AuthError> {
        if let Some(key) = &user.signing_key {
            return Ok(key.clone());
        }

        let candidate = generate_key();
        let stored = self
            .identities
            .store_signing_key_if_absent(user.id, &candidate)
            .await
            .map_err(|e| {
                warn!(user_id = user.id, error = %e, "failed to persist signing key");
                AuthError::KeyUnavailable(e.to_string())
            })?
            .ok_or_else(|| AuthError::KeyUnavailable(format!("user {} not found", user.id)))?;

        if stored == candidate {
            info!(user_id = user.id, "generated signing key");
        } else {
            debug!(user_id = user.id, "signing key already generated concurrently");
        }

        user.signing_key = Some(stored.clone());
        Ok(stored)
    }

    /// Drop `user`'s signing key together with all live refresh tokens.
    /// Every token signed so far stops verifying; the next signature
    /// generates a new key.
    pub async fn reset(&self, user: &mut User) -> Result<(), AuthError> {
        if !self.identities.reset_signing_key(user.id).await? {
            return Err(AuthError::KeyUnavailable(format!(
                "user {} not found",
                user.id
            )));
        }
        user.signing_key = None;
        user.refresh_tokens.clear();
        info!(user_id = user.id, "signing key reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::NewUser;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, KeyCustodian, User) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(&NewUser {
                username: "alice".into(),
                email: None,
                password_hash: "hash".into(),
            })
            .await
            .unwrap();
        (store.clone(), KeyCustodian::new(store), user)
    }

    #[test]
    fn generated_keys_are_full_length_and_distinct() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), SIGNING_KEY_LEN);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let (store, custodian, mut user) = setup().await;
        let first = custodian.get_or_create(&mut user).await.unwrap();
        let second = custodian.get_or_create(&mut user).await.unwrap();
        assert_eq!(first, second);

        // A freshly loaded copy sees the persisted key too.
        let mut reloaded = store.user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.signing_key.as_deref(), Some(first.as_slice()));
        let third = custodian.get_or_create(&mut reloaded).await.unwrap();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn stale_copies_converge_on_one_key() {
        let (_store, custodian, user) = setup().await;
        // Two request handlers loaded the user before either generated a key.
        let mut a = user.clone();
        let mut b = user;
        let (ka, kb) = tokio::join!(
            custodian.get_or_create(&mut a),
            custodian.get_or_create(&mut b)
        );
        assert_eq!(ka.unwrap(), kb.unwrap());
        assert_eq!(a.signing_key, b.signing_key);
    }

    #[tokio::test]
    async fn missing_user_is_key_unavailable() {
        let (store, custodian, mut user) = setup().await;
        store.delete_user(user.id).await.unwrap();
        assert!(matches!(
            custodian.get_or_create(&mut user).await,
            Err(AuthError::KeyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn reset_forces_a_new_key() {
        let (store, custodian, mut user) = setup().await;
        let old = custodian.get_or_create(&mut user).await.unwrap();
        custodian.reset(&mut user).await.unwrap();
        assert!(user.signing_key.is_none());

        let persisted = store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(persisted.signing_key.is_none());

        let new = custodian.get_or_create(&mut user).await.unwrap();
        assert_ne!(old, new);
    }
}
