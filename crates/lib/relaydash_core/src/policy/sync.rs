//! Keeps grants and membership edges in step with users, groups, nodes and
//! service assignments.
//!
//! Every hook here must run before the owning CRUD operation reports
//! success. Multi-row changes go through [`PolicyStore::apply`] so a rename
//! never leaves both or neither of the old and new grants visible.

use std::sync::Arc;

use tracing::info;

use super::PolicyError;
use crate::models::identity::is_valid_username;
use crate::models::policy::{
    ANONYMOUS_SUBJECT, Grant, Membership, WILDCARD, group_subject, node_subject,
};
use crate::store::{PolicyBatch, PolicyStore};

/// Routes reachable without credentials.
const ANONYMOUS_ROUTES: &[&str] = &[
    "/login",
    "/register",
    "/refresh",
    "/password/forget",
    "/password/reset",
];

fn ensure_username(username: &str) -> Result<(), PolicyError> {
    if is_valid_username(username) {
        Ok(())
    } else {
        Err(PolicyError::InvalidSubject(format!(
            "username {username:?} cannot appear in grants"
        )))
    }
}

/// Grants every new user receives.
pub fn default_user_grants(username: &str, owned_services: &[i64]) -> Vec<Grant> {
    let mut grants = vec![
        Grant::new(username, format!("/users/{username}*"), WILDCARD),
        Grant::new(username, "/logout", "DELETE"),
        Grant::new(username, format!("/users/{username}/groups"), "GET"),
        Grant::new(username, format!("/users/{username}/services"), "GET"),
        Grant::new(username, format!("/users/{username}/nodes"), "GET"),
        Grant::new(username, "/announcements*", "GET"),
    ];
    grants.extend(owned_services.iter().map(|sid| service_grant(username, *sid)));
    grants
}

/// Grants held by the anonymous role.
pub fn anonymous_grants() -> Vec<Grant> {
    ANONYMOUS_ROUTES
        .iter()
        .map(|route| Grant::new(ANONYMOUS_SUBJECT, *route, "POST"))
        .collect()
}

/// Grants seeded at startup.
pub fn bootstrap_grants() -> Vec<Grant> {
    let mut grants = vec![Grant::admin_bootstrap()];
    grants.extend(anonymous_grants());
    grants
}

pub fn group_grant(id: i64, name: &str) -> Grant {
    Grant::new(group_subject(name), format!("/groups/{id}*"), WILDCARD)
}

pub fn node_grant(id: i64) -> Grant {
    Grant::new(node_subject(id), format!("/nodes/{id}*"), WILDCARD)
}

pub fn service_grant(username: &str, service_id: i64) -> Grant {
    Grant::new(username, format!("/services/{service_id}*"), "GET")
}

/// Rewrite a `/users/{old}` object prefix to `/users/{new}`.
fn rename_user_object(object: &str, old: &str, new: &str) -> String {
    let old_prefix = format!("/users/{old}");
    match object.strip_prefix(&old_prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('*') => {
            format!("/users/{new}{rest}")
        }
        _ => object.to_string(),
    }
}

/// Policy mutations triggered by domain changes.
#[derive(Clone)]
pub struct PolicySync {
    policies: Arc<dyn PolicyStore>,
}

impl PolicySync {
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies }
    }

    /// Seed the admin grant and anonymous grants. Safe to call on every start.
    pub async fn seed_bootstrap(&self) -> Result<(), PolicyError> {
        let mut added = 0;
        for grant in bootstrap_grants() {
            if self.policies.add_grant(&grant).await? {
                added += 1;
            }
        }
        info!(added, "bootstrap grants seeded");
        Ok(())
    }

    pub async fn user_created(
        &self,
        username: &str,
        owned_services: &[i64],
    ) -> Result<(), PolicyError> {
        ensure_username(username)?;
        self.policies
            .apply(&PolicyBatch {
                add_grants: default_user_grants(username, owned_services),
                ..Default::default()
            })
            .await?;
        info!(username, "default user grants added");
        Ok(())
    }

    /// Move every grant and membership edge of `old` over to `new`, rewriting
    /// self-profile object patterns along the way.
    pub async fn user_renamed(&self, old: &str, new: &str) -> Result<(), PolicyError> {
        ensure_username(new)?;
        let grants = self.policies.grants_for(&[old.to_string()]).await?;
        let groups = self.policies.groups_of(old).await?;

        let batch = PolicyBatch {
            add_grants: grants
                .iter()
                .map(|g| Grant::new(new, rename_user_object(&g.object, old, new), &g.action))
                .collect(),
            remove_grants: grants,
            remove_memberships: groups.iter().map(|g| Membership::new(old, g)).collect(),
            add_memberships: groups.iter().map(|g| Membership::new(new, g)).collect(),
        };
        self.policies.apply(&batch).await?;
        info!(old, new, "user grants renamed");
        Ok(())
    }

    pub async fn user_deleted(&self, username: &str) -> Result<(), PolicyError> {
        let removed = self.policies.purge_subject(username).await?;
        info!(username, removed, "user grants purged");
        Ok(())
    }

    pub async fn service_assigned(&self, username: &str, service_id: i64) -> Result<(), PolicyError> {
        self.policies
            .add_grant(&service_grant(username, service_id))
            .await?;
        Ok(())
    }

    pub async fn service_unassigned(
        &self,
        username: &str,
        service_id: i64,
    ) -> Result<(), PolicyError> {
        self.policies
            .remove_grant(&service_grant(username, service_id))
            .await?;
        Ok(())
    }

    pub async fn group_created(&self, id: i64, name: &str) -> Result<(), PolicyError> {
        self.policies.add_grant(&group_grant(id, name)).await?;
        info!(group_id = id, name, "group grant added");
        Ok(())
    }

    /// Replace `group::{old}` with `group::{new}` in grants and edges as one
    /// batch.
    pub async fn group_renamed(&self, id: i64, old: &str, new: &str) -> Result<(), PolicyError> {
        let old_subject = group_subject(old);
        let new_subject = group_subject(new);
        let grants = self
            .policies
            .grants_for(std::slice::from_ref(&old_subject))
            .await?;
        let members = self.policies.members_of(&old_subject).await?;

        let mut add_grants: Vec<Grant> = grants
            .iter()
            .map(|g| Grant::new(&new_subject, &g.object, &g.action))
            .collect();
        let own = group_grant(id, new);
        if !add_grants.contains(&own) {
            add_grants.push(own);
        }

        let batch = PolicyBatch {
            remove_grants: grants,
            add_grants,
            remove_memberships: members
                .iter()
                .map(|m| Membership::new(m, &old_subject))
                .collect(),
            add_memberships: members
                .iter()
                .map(|m| Membership::new(m, &new_subject))
                .collect(),
        };
        self.policies.apply(&batch).await?;
        info!(group_id = id, old, new, "group grants renamed");
        Ok(())
    }

    pub async fn group_deleted(&self, name: &str) -> Result<(), PolicyError> {
        let removed = self.policies.purge_subject(&group_subject(name)).await?;
        info!(name, removed, "group grants purged");
        Ok(())
    }

    pub async fn node_created(&self, id: i64) -> Result<(), PolicyError> {
        self.policies.add_grant(&node_grant(id)).await?;
        info!(node_id = id, "node grant added");
        Ok(())
    }

    pub async fn node_deleted(&self, id: i64) -> Result<(), PolicyError> {
        let removed = self.policies.purge_subject(&node_subject(id)).await?;
        info!(node_id = id, removed, "node grants purged");
        Ok(())
    }

    pub async fn member_added(&self, username: &str, group: &str) -> Result<(), PolicyError> {
        self.policies
            .add_membership(&Membership::new(username, group_subject(group)))
            .await?;
        Ok(())
    }

    pub async fn member_removed(&self, username: &str, group: &str) -> Result<(), PolicyError> {
        self.policies
            .remove_membership(&Membership::new(username, group_subject(group)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::ADMIN_GROUP;
    use crate::policy::PolicyEngine;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, PolicySync, PolicyEngine) {
        let store = Arc::new(MemoryStore::new());
        (
            store.clone(),
            PolicySync::new(store.clone()),
            PolicyEngine::new(store),
        )
    }

    #[test]
    fn rename_rewrites_only_own_prefix() {
        assert_eq!(
            rename_user_object("/users/al*", "al", "bo"),
            "/users/bo*"
        );
        assert_eq!(
            rename_user_object("/users/al/nodes", "al", "bo"),
            "/users/bo/nodes"
        );
        assert_eq!(
            rename_user_object("/users/alice", "al", "bo"),
            "/users/alice"
        );
        assert_eq!(rename_user_object("/logout", "al", "bo"), "/logout");
    }

    #[tokio::test]
    async fn bootstrap_seed_is_idempotent() {
        let (store, sync, engine) = setup();
        sync.seed_bootstrap().await.unwrap();
        sync.seed_bootstrap().await.unwrap();

        let grants = store.list_grants().await.unwrap();
        let admin = grants
            .iter()
            .filter(|g| **g == Grant::admin_bootstrap())
            .count();
        assert_eq!(admin, 1);
        assert_eq!(grants.len(), bootstrap_grants().len());
        assert!(
            engine
                .enforce(ANONYMOUS_SUBJECT, "/login", "POST")
                .await
                .unwrap()
        );
        assert!(
            !engine
                .enforce(ANONYMOUS_SUBJECT, "/login", "GET")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn created_user_reaches_own_resources() {
        let (_store, sync, engine) = setup();
        sync.user_created("alice", &[5]).await.unwrap();

        for (object, action) in [
            ("/users/alice", "PATCH"),
            ("/users/alice/groups", "GET"),
            ("/users/alice/services", "GET"),
            ("/users/alice/nodes", "GET"),
            ("/logout", "DELETE"),
            ("/announcements", "GET"),
            ("/announcements/2", "GET"),
            ("/services/5", "GET"),
        ] {
            assert!(
                engine.enforce("alice", object, action).await.unwrap(),
                "{action} {object}"
            );
        }
        assert!(!engine.enforce("alice", "/services/6", "GET").await.unwrap());
        assert!(!engine.enforce("alice", "/announcements", "POST").await.unwrap());
        assert!(!engine.enforce("alice", "/users/bob", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn renamed_user_loses_old_paths_and_keeps_groups() {
        let (store, sync, engine) = setup();
        store.add_grant(&Grant::admin_bootstrap()).await.unwrap();
        sync.user_created("alice", &[]).await.unwrap();
        sync.member_added("alice", ADMIN_GROUP).await.unwrap();
        sync.member_removed("alice", ADMIN_GROUP).await.unwrap();
        sync.group_created(3, "ops").await.unwrap();
        sync.member_added("alice", "ops").await.unwrap();

        sync.user_renamed("alice", "alicia").await.unwrap();

        assert!(store.grants_for(&["alice".into()]).await.unwrap().is_empty());
        assert!(
            engine
                .enforce("alicia", "/users/alicia/nodes", "GET")
                .await
                .unwrap()
        );
        assert!(engine.enforce("alicia", "/groups/3", "GET").await.unwrap());
        assert!(!engine.enforce("alice", "/groups/3", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn deleted_user_is_purged() {
        let (store, sync, engine) = setup();
        sync.user_created("alice", &[1]).await.unwrap();
        sync.member_added("alice", "ops").await.unwrap();
        sync.user_deleted("alice").await.unwrap();

        assert!(store.list_grants().await.unwrap().is_empty());
        assert!(store.members_of("group::ops").await.unwrap().is_empty());
        assert!(!engine.enforce("alice", "/users/alice", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn group_rename_moves_grant_and_members() {
        let (store, sync, engine) = setup();
        sync.group_created(7, "ops").await.unwrap();
        sync.member_added("alice", "ops").await.unwrap();
        sync.group_renamed(7, "ops", "sre").await.unwrap();

        let grants = store.list_grants().await.unwrap();
        assert_eq!(grants, vec![group_grant(7, "sre")]);
        assert_eq!(
            store.groups_of("alice").await.unwrap(),
            vec!["group::sre".to_string()]
        );
        assert!(engine.enforce("alice", "/groups/7/users", "POST").await.unwrap());
    }

    #[tokio::test]
    async fn group_delete_drops_grant_and_edges() {
        let (store, sync, engine) = setup();
        sync.group_created(7, "ops").await.unwrap();
        sync.member_added("alice", "ops").await.unwrap();
        sync.group_deleted("ops").await.unwrap();

        assert!(store.list_grants().await.unwrap().is_empty());
        assert!(store.groups_of("alice").await.unwrap().is_empty());
        assert!(!engine.enforce("alice", "/groups/7", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn node_lifecycle() {
        let (_store, sync, engine) = setup();
        sync.node_created(4).await.unwrap();
        assert!(engine.enforce("node::4", "/nodes/4/users", "GET").await.unwrap());
        assert!(!engine.enforce("node::4", "/nodes/40", "GET").await.unwrap());
        sync.node_deleted(4).await.unwrap();
        assert!(!engine.enforce("node::4", "/nodes/4", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn service_assignment_toggles_detail_access() {
        let (_store, sync, engine) = setup();
        sync.service_assigned("bob", 12).await.unwrap();
        assert!(engine.enforce("bob", "/services/12", "GET").await.unwrap());
        sync.service_unassigned("bob", 12).await.unwrap();
        assert!(!engine.enforce("bob", "/services/12", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn path_like_usernames_never_get_grants() {
        let (store, sync, engine) = setup();
        sync.user_created("bob", &[]).await.unwrap();

        for name in ["bob/", "bob/groups", "bob*"] {
            assert!(matches!(
                sync.user_created(name, &[]).await,
                Err(PolicyError::InvalidSubject(_))
            ));
            assert!(!engine.enforce(name, "/users/bob/services", "GET").await.unwrap());
        }
        assert!(matches!(
            sync.user_renamed("bob", "bob/").await,
            Err(PolicyError::InvalidSubject(_))
        ));
        assert_eq!(
            store.list_grants().await.unwrap().len(),
            default_user_grants("bob", &[]).len()
        );
    }
}
