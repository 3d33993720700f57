//! In-process store for tests and `--in-memory` runs.
//!
//! Rows are kept the way the database keeps them: the refresh token set goes
//! through its column codec on every save and load.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{IdentityStore, PolicyBatch, PolicyStore, StoreError, TokenSetEdit};
use crate::auth::refresh::{RefreshTokenSet, RegistryError};
use crate::models::identity::{NewUser, Node, User};
use crate::models::policy::{Grant, Membership};
use crate::policy::PolicyError;

#[derive(Debug, Clone)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
    signing_key: Option<Vec<u8>>,
    refresh_tokens: String,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        Ok(User {
            refresh_tokens: RefreshTokenSet::from_column(&self.refresh_tokens)?,
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            signing_key: self.signing_key,
        })
    }
}

#[derive(Debug, Clone)]
struct NodeRow {
    name: String,
    credential_hash: Option<String>,
}

#[derive(Default)]
struct Identities {
    next_user_id: i64,
    next_node_id: i64,
    users: BTreeMap<i64, UserRow>,
    nodes: BTreeMap<i64, NodeRow>,
    /// token digest -> (user id, expiry)
    password_resets: BTreeMap<String, (i64, DateTime<Utc>)>,
}

#[derive(Default)]
struct Policies {
    grants: BTreeSet<Grant>,
    memberships: BTreeSet<Membership>,
}

impl Policies {
    fn apply(&mut self, batch: &PolicyBatch) {
        for grant in &batch.remove_grants {
            self.grants.remove(grant);
        }
        for membership in &batch.remove_memberships {
            self.memberships.remove(membership);
        }
        self.grants.extend(batch.add_grants.iter().cloned());
        self.memberships
            .extend(batch.add_memberships.iter().cloned());
    }
}

/// Identity and policy store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<Identities>,
    policies: RwLock<Policies>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_user(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let mut db = self.identities.write().await;
        if db.users.values().any(|u| u.username == new_user.username) {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                new_user.username
            )));
        }
        db.next_user_id += 1;
        let row = UserRow {
            id: db.next_user_id,
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash.clone(),
            signing_key: None,
            refresh_tokens: RefreshTokenSet::default().to_column()?,
        };
        db.users.insert(row.id, row.clone());
        row.into_user()
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let db = self.identities.read().await;
        db.users.get(&id).cloned().map(UserRow::into_user).transpose()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let db = self.identities.read().await;
        db.users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .map(UserRow::into_user)
            .transpose()
    }

    async fn user_by_identity(
        &self,
        id: i64,
        username: &str,
    ) -> Result<Option<User>, StoreError> {
        let db = self.identities.read().await;
        db.users
            .get(&id)
            .filter(|u| u.username == username)
            .cloned()
            .map(UserRow::into_user)
            .transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let db = self.identities.read().await;
        db.users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned()
            .map(UserRow::into_user)
            .transpose()
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut db = self.identities.write().await;
        if db
            .users
            .values()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }
        if let Some(row) = db.users.get_mut(&user.id) {
            row.username = user.username.clone();
            row.email = user.email.clone();
            row.password_hash = user.password_hash.clone();
        }
        Ok(())
    }

    async fn update_refresh_tokens(
        &self,
        id: i64,
        edit: TokenSetEdit<'_>,
    ) -> Result<Option<RefreshTokenSet>, RegistryError> {
        let mut db = self.identities.write().await;
        let Some(row) = db.users.get_mut(&id) else {
            return Ok(None);
        };
        let mut tokens = RefreshTokenSet::from_column(&row.refresh_tokens)?;
        edit(&mut tokens)?;
        row.refresh_tokens = tokens.to_column()?;
        Ok(Some(tokens))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let mut db = self.identities.write().await;
        db.password_resets.retain(|_, (user_id, _)| *user_id != id);
        Ok(db.users.remove(&id).is_some())
    }

    async fn store_signing_key_if_absent(
        &self,
        id: i64,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let mut db = self.identities.write().await;
        let Some(row) = db.users.get_mut(&id) else {
            return Ok(None);
        };
        Ok(Some(row.signing_key.get_or_insert_with(|| key.to_vec()).clone()))
    }

    async fn reset_signing_key(&self, id: i64) -> Result<bool, StoreError> {
        let empty = RefreshTokenSet::default().to_column()?;
        let mut db = self.identities.write().await;
        let Some(row) = db.users.get_mut(&id) else {
            return Ok(false);
        };
        row.signing_key = None;
        row.refresh_tokens = empty;
        Ok(true)
    }

    async fn put_password_reset(
        &self,
        id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut db = self.identities.write().await;
        if !db.users.contains_key(&id) {
            return Err(StoreError::Conflict(format!("user {id} does not exist")));
        }
        db.password_resets.retain(|_, (user_id, _)| *user_id != id);
        db.password_resets
            .insert(token_hash.to_string(), (id, expires_at));
        Ok(())
    }

    async fn take_password_reset(
        &self,
        token_hash: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>, StoreError> {
        Ok(self
            .identities
            .write()
            .await
            .password_resets
            .remove(token_hash))
    }

    async fn create_node(&self, name: &str) -> Result<Node, StoreError> {
        let mut db = self.identities.write().await;
        db.next_node_id += 1;
        let id = db.next_node_id;
        db.nodes.insert(
            id,
            NodeRow {
                name: name.to_string(),
                credential_hash: None,
            },
        );
        Ok(Node {
            id,
            name: name.to_string(),
        })
    }

    async fn node_by_credential_hash(
        &self,
        credential_hash: &str,
    ) -> Result<Option<Node>, StoreError> {
        let db = self.identities.read().await;
        Ok(db
            .nodes
            .iter()
            .find(|(_, n)| n.credential_hash.as_deref() == Some(credential_hash))
            .map(|(id, n)| Node {
                id: *id,
                name: n.name.clone(),
            }))
    }

    async fn set_node_credential_hash(
        &self,
        id: i64,
        credential_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut db = self.identities.write().await;
        if db
            .nodes
            .iter()
            .any(|(other, n)| *other != id && n.credential_hash.as_deref() == Some(credential_hash))
        {
            return Err(StoreError::Conflict("node credential collision".into()));
        }
        let Some(row) = db.nodes.get_mut(&id) else {
            return Ok(false);
        };
        row.credential_hash = Some(credential_hash.to_string());
        Ok(true)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn add_grant(&self, grant: &Grant) -> Result<bool, PolicyError> {
        Ok(self.policies.write().await.grants.insert(grant.clone()))
    }

    async fn remove_grant(&self, grant: &Grant) -> Result<bool, PolicyError> {
        Ok(self.policies.write().await.grants.remove(grant))
    }

    async fn add_membership(&self, membership: &Membership) -> Result<bool, PolicyError> {
        Ok(self
            .policies
            .write()
            .await
            .memberships
            .insert(membership.clone()))
    }

    async fn remove_membership(&self, membership: &Membership) -> Result<bool, PolicyError> {
        Ok(self.policies.write().await.memberships.remove(membership))
    }

    async fn apply(&self, batch: &PolicyBatch) -> Result<(), PolicyError> {
        self.policies.write().await.apply(batch);
        Ok(())
    }

    async fn purge_subject(&self, subject: &str) -> Result<u64, PolicyError> {
        let mut db = self.policies.write().await;
        let before = db.grants.len() + db.memberships.len();
        db.grants.retain(|g| g.subject != subject);
        db.memberships
            .retain(|m| m.member != subject && m.group != subject);
        Ok((before - db.grants.len() - db.memberships.len()) as u64)
    }

    async fn grants_for(&self, subjects: &[String]) -> Result<Vec<Grant>, PolicyError> {
        let db = self.policies.read().await;
        Ok(db
            .grants
            .iter()
            .filter(|g| subjects.contains(&g.subject))
            .cloned()
            .collect())
    }

    async fn groups_of(&self, member: &str) -> Result<Vec<String>, PolicyError> {
        let db = self.policies.read().await;
        Ok(db
            .memberships
            .iter()
            .filter(|m| m.member == member)
            .map(|m| m.group.clone())
            .collect())
    }

    async fn members_of(&self, group: &str) -> Result<Vec<String>, PolicyError> {
        let db = self.policies.read().await;
        Ok(db
            .memberships
            .iter()
            .filter(|m| m.group == group)
            .map(|m| m.member.clone())
            .collect())
    }

    async fn list_grants(&self) -> Result<Vec<Grant>, PolicyError> {
        Ok(self.policies.read().await.grants.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: Some(format!("{username}@example.com")),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_user(&new_user("alice")).await.unwrap();
        assert!(matches!(
            store.create_user(&new_user("alice")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn lookup_by_identity_requires_both_fields() {
        let store = MemoryStore::new();
        let alice = store.create_user(&new_user("alice")).await.unwrap();
        assert!(
            store
                .user_by_identity(alice.id, "alice")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .user_by_identity(alice.id, "bob")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .user_by_identity(alice.id + 1, "alice")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn save_does_not_touch_signing_key() {
        let store = MemoryStore::new();
        let mut alice = store.create_user(&new_user("alice")).await.unwrap();
        store
            .store_signing_key_if_absent(alice.id, &[7u8; 4])
            .await
            .unwrap();

        alice.signing_key = Some(vec![9u8; 4]);
        alice.email = None;
        store.save_user(&alice).await.unwrap();

        let loaded = store.user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(loaded.signing_key, Some(vec![7u8; 4]));
        assert_eq!(loaded.email, None);
    }

    #[tokio::test]
    async fn save_leaves_refresh_tokens_alone() {
        let store = MemoryStore::new();
        let stale = store.create_user(&new_user("alice")).await.unwrap();
        let expires_at = Utc::now();
        store
            .update_refresh_tokens(stale.id, &|set| {
                set.insert("t1".into(), expires_at);
                Ok(())
            })
            .await
            .unwrap();

        let mut edited = stale.clone();
        edited.email = Some("new@example.com".into());
        store.save_user(&edited).await.unwrap();

        let loaded = store.user_by_id(stale.id).await.unwrap().unwrap();
        assert!(loaded.refresh_tokens.contains("t1"));
        assert_eq!(loaded.email.as_deref(), Some("new@example.com"));
    }

    #[tokio::test]
    async fn failed_token_edit_writes_nothing() {
        let store = MemoryStore::new();
        let alice = store.create_user(&new_user("alice")).await.unwrap();
        let result = store
            .update_refresh_tokens(alice.id, &|set| {
                set.insert("t1".into(), Utc::now());
                Err(RegistryError::TokenNotFound)
            })
            .await;
        assert!(matches!(result, Err(RegistryError::TokenNotFound)));

        let loaded = store.user_by_id(alice.id).await.unwrap().unwrap();
        assert!(loaded.refresh_tokens.is_empty());
        assert!(
            store
                .update_refresh_tokens(99, &|_| Ok(()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn reset_tokens_are_single_use_and_replaced() {
        let store = MemoryStore::new();
        let alice = store.create_user(&new_user("alice")).await.unwrap();
        let expires_at = Utc::now();
        store.put_password_reset(alice.id, "h1", expires_at).await.unwrap();
        store.put_password_reset(alice.id, "h2", expires_at).await.unwrap();

        assert_eq!(store.take_password_reset("h1").await.unwrap(), None);
        assert_eq!(
            store.take_password_reset("h2").await.unwrap(),
            Some((alice.id, expires_at))
        );
        assert_eq!(store.take_password_reset("h2").await.unwrap(), None);
        assert_eq!(
            store
                .user_by_email("alice@example.com")
                .await
                .unwrap()
                .map(|u| u.id),
            Some(alice.id)
        );
    }

    #[tokio::test]
    async fn conditional_key_write_keeps_first_key() {
        let store = MemoryStore::new();
        let alice = store.create_user(&new_user("alice")).await.unwrap();
        let first = store
            .store_signing_key_if_absent(alice.id, &[1u8; 4])
            .await
            .unwrap();
        let second = store
            .store_signing_key_if_absent(alice.id, &[2u8; 4])
            .await
            .unwrap();
        assert_eq!(first, Some(vec![1u8; 4]));
        assert_eq!(second, Some(vec![1u8; 4]));
        assert_eq!(
            store.store_signing_key_if_absent(99, &[3u8; 4]).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn apply_removes_before_adding() {
        let store = MemoryStore::new();
        let grant = Grant::new("alice", "/users/alice*", "*");
        store.add_grant(&grant).await.unwrap();

        store
            .apply(&PolicyBatch {
                remove_grants: vec![grant.clone()],
                add_grants: vec![grant.clone()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.list_grants().await.unwrap(), vec![grant]);
    }

    #[tokio::test]
    async fn grant_additions_are_idempotent() {
        let store = MemoryStore::new();
        let grant = Grant::new("alice", "/x", "GET");
        assert!(store.add_grant(&grant).await.unwrap());
        assert!(!store.add_grant(&grant).await.unwrap());
        assert!(store.remove_grant(&grant).await.unwrap());
        assert!(!store.remove_grant(&grant).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_grants_and_edges_both_ways() {
        let store = MemoryStore::new();
        store
            .add_grant(&Grant::new("group::ops", "/groups/1*", "*"))
            .await
            .unwrap();
        store
            .add_grant(&Grant::new("alice", "/users/alice*", "*"))
            .await
            .unwrap();
        store
            .add_membership(&Membership::new("alice", "group::ops"))
            .await
            .unwrap();
        store
            .add_membership(&Membership::new("group::ops", "group::admin"))
            .await
            .unwrap();

        assert_eq!(store.purge_subject("group::ops").await.unwrap(), 3);
        assert_eq!(
            store.list_grants().await.unwrap(),
            vec![Grant::new("alice", "/users/alice*", "*")]
        );
        assert!(store.groups_of("alice").await.unwrap().is_empty());
    }
}
