//! Storage seams for identities and policy grants.
//!
//! The auth and policy components only ever talk to these traits. `PgStore`
//! backs them with PostgreSQL; `MemoryStore` keeps everything in process for
//! tests and local development.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::refresh::{RefreshTokenSet, RegistryError};
use crate::models::identity::{NewUser, Node, User};
use crate::models::policy::{Grant, Membership};
use crate::policy::PolicyError;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Identity storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// In-place edit of one account's refresh token set. Returning an error
/// aborts the write.
pub type TokenSetEdit<'a> =
    &'a (dyn Fn(&mut RefreshTokenSet) -> Result<(), RegistryError> + Send + Sync);

/// Persistence for users and nodes.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a user. Fails with `Conflict` when the username is taken.
    async fn create_user(&self, new_user: &NewUser) -> Result<User, StoreError>;

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Fetch the user matching both `id` and `username`.
    async fn user_by_identity(
        &self,
        id: i64,
        username: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Persist username, email and password hash. The signing key and the
    /// refresh token set are only written through their own methods below.
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    /// Read, edit and write back the refresh token column of user `id` while
    /// holding the row, so concurrent edits never drop each other's entries.
    /// Returns the stored set, or `None` when the user does not exist.
    async fn update_refresh_tokens(
        &self,
        id: i64,
        edit: TokenSetEdit<'_>,
    ) -> Result<Option<RefreshTokenSet>, RegistryError>;

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;

    /// Store `key` unless the user already has one. Returns the key that is
    /// persisted afterwards, or `None` when the user does not exist.
    async fn store_signing_key_if_absent(
        &self,
        id: i64,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Clear the signing key and every live refresh token in one write.
    async fn reset_signing_key(&self, id: i64) -> Result<bool, StoreError>;

    /// Replace the password reset token digest of user `id`.
    async fn put_password_reset(
        &self,
        id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove the reset entry matching `token_hash`, returning its user id and
    /// expiry. A token can be taken only once.
    async fn take_password_reset(
        &self,
        token_hash: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>, StoreError>;

    async fn create_node(&self, name: &str) -> Result<Node, StoreError>;

    async fn node_by_credential_hash(
        &self,
        credential_hash: &str,
    ) -> Result<Option<Node>, StoreError>;

    async fn set_node_credential_hash(
        &self,
        id: i64,
        credential_hash: &str,
    ) -> Result<bool, StoreError>;
}

/// A set of grant and membership changes applied as one unit.
/// Removals are applied before additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyBatch {
    pub remove_grants: Vec<Grant>,
    pub add_grants: Vec<Grant>,
    pub remove_memberships: Vec<Membership>,
    pub add_memberships: Vec<Membership>,
}

impl PolicyBatch {
    pub fn is_empty(&self) -> bool {
        self.remove_grants.is_empty()
            && self.add_grants.is_empty()
            && self.remove_memberships.is_empty()
            && self.add_memberships.is_empty()
    }
}

/// Persistence for policy grants and group membership edges.
///
/// Additions are idempotent: adding an existing grant or edge is a no-op that
/// returns `false`.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn add_grant(&self, grant: &Grant) -> Result<bool, PolicyError>;

    async fn remove_grant(&self, grant: &Grant) -> Result<bool, PolicyError>;

    async fn add_membership(&self, membership: &Membership) -> Result<bool, PolicyError>;

    async fn remove_membership(&self, membership: &Membership) -> Result<bool, PolicyError>;

    /// Apply every change in `batch` atomically.
    async fn apply(&self, batch: &PolicyBatch) -> Result<(), PolicyError>;

    /// Remove all grants held by `subject` and every edge naming it as
    /// member or group. Returns the number of rows removed.
    async fn purge_subject(&self, subject: &str) -> Result<u64, PolicyError>;

    /// Grants whose subject is one of `subjects`.
    async fn grants_for(&self, subjects: &[String]) -> Result<Vec<Grant>, PolicyError>;

    /// Group subjects `member` belongs to.
    async fn groups_of(&self, member: &str) -> Result<Vec<String>, PolicyError>;

    /// Members of the group subject `group`.
    async fn members_of(&self, group: &str) -> Result<Vec<String>, PolicyError>;

    async fn list_grants(&self) -> Result<Vec<Grant>, PolicyError>;
}
