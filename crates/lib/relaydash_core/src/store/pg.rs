//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{IdentityStore, PolicyBatch, PolicyStore, StoreError, TokenSetEdit};
use crate::auth::queries;
use crate::auth::refresh::{RefreshTokenSet, RegistryError};
use crate::models::identity::{NewUser, Node, User};
use crate::models::policy::{Grant, Membership};
use crate::policy::{PolicyError, queries as policy_queries};

/// Identity and policy store over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn create_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        queries::create_user(&self.pool, new_user).await
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        queries::find_user_by_id(&self.pool, id).await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        queries::find_user_by_username(&self.pool, username).await
    }

    async fn user_by_identity(
        &self,
        id: i64,
        username: &str,
    ) -> Result<Option<User>, StoreError> {
        queries::find_user_by_identity(&self.pool, id, username).await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        queries::find_user_by_email(&self.pool, email).await
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        queries::update_user(&self.pool, user).await
    }

    async fn update_refresh_tokens(
        &self,
        id: i64,
        edit: TokenSetEdit<'_>,
    ) -> Result<Option<RefreshTokenSet>, RegistryError> {
        queries::update_refresh_tokens(&self.pool, id, edit).await
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        queries::delete_user(&self.pool, id).await
    }

    async fn store_signing_key_if_absent(
        &self,
        id: i64,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        queries::store_signing_key_if_absent(&self.pool, id, key).await
    }

    async fn reset_signing_key(&self, id: i64) -> Result<bool, StoreError> {
        queries::reset_signing_key(&self.pool, id).await
    }

    async fn put_password_reset(
        &self,
        id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        queries::upsert_password_reset(&self.pool, id, token_hash, expires_at).await
    }

    async fn take_password_reset(
        &self,
        token_hash: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>, StoreError> {
        queries::take_password_reset(&self.pool, token_hash).await
    }

    async fn create_node(&self, name: &str) -> Result<Node, StoreError> {
        queries::create_node(&self.pool, name).await
    }

    async fn node_by_credential_hash(
        &self,
        credential_hash: &str,
    ) -> Result<Option<Node>, StoreError> {
        queries::find_node_by_credential_hash(&self.pool, credential_hash).await
    }

    async fn set_node_credential_hash(
        &self,
        id: i64,
        credential_hash: &str,
    ) -> Result<bool, StoreError> {
        queries::set_node_credential_hash(&self.pool, id, credential_hash).await
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn add_grant(&self, grant: &Grant) -> Result<bool, PolicyError> {
        policy_queries::insert_grant(&self.pool, grant).await
    }

    async fn remove_grant(&self, grant: &Grant) -> Result<bool, PolicyError> {
        policy_queries::delete_grant(&self.pool, grant).await
    }

    async fn add_membership(&self, membership: &Membership) -> Result<bool, PolicyError> {
        policy_queries::insert_membership(&self.pool, membership).await
    }

    async fn remove_membership(&self, membership: &Membership) -> Result<bool, PolicyError> {
        policy_queries::delete_membership(&self.pool, membership).await
    }

    async fn apply(&self, batch: &PolicyBatch) -> Result<(), PolicyError> {
        if batch.is_empty() {
            return Ok(());
        }
        policy_queries::apply_batch(&self.pool, batch).await
    }

    async fn purge_subject(&self, subject: &str) -> Result<u64, PolicyError> {
        policy_queries::purge_subject(&self.pool, subject).await
    }

    async fn grants_for(&self, subjects: &[String]) -> Result<Vec<Grant>, PolicyError> {
        policy_queries::grants_for(&self.pool, subjects).await
    }

    async fn groups_of(&self, member: &str) -> Result<Vec<String>, PolicyError> {
        policy_queries::groups_of(&self.pool, member).await
    }

    async fn members_of(&self, group: &str) -> Result<Vec<String>, PolicyError> {
        policy_queries::members_of(&self.pool, group).await
    }

    async fn list_grants(&self) -> Result<Vec<Grant>, PolicyError> {
        policy_queries::list_grants(&self.pool).await
    }
}
