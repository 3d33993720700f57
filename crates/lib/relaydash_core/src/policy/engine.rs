//! Policy enforcement.

use std::sync::Arc;

use tracing::{debug, warn};

use super::PolicyError;
use super::matcher::{action_matches, object_matches};
use crate::auth::resolver::Caller;
use crate::models::policy::ANONYMOUS_SUBJECT;
use crate::store::PolicyStore;

/// Decides whether a subject may perform an action on an object.
///
/// A request is allowed when some grant held by the subject, or by a group
/// the subject is a direct member of, matches both the object and the action.
/// There are no deny grants.
#[derive(Clone)]
pub struct PolicyEngine {
    policies: Arc<dyn PolicyStore>,
}

impl PolicyEngine {
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies }
    }

    /// `Ok(false)` means no grant matched; errors only come from the store.
    pub async fn enforce(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyError> {
        let mut subjects = vec![subject.to_string()];
        subjects.extend(self.policies.groups_of(subject).await?);

        let grants = self.policies.grants_for(&subjects).await?;
        let allowed = grants.iter().any(|grant| {
            // Anonymous-role grants never reach identified callers, even via an edge.
            if grant.subject == ANONYMOUS_SUBJECT && subject != ANONYMOUS_SUBJECT {
                return false;
            }
            object_matches(&grant.object, object) && action_matches(&grant.action, action)
        });
        Ok(allowed)
    }

    /// Enforce for a resolved caller.
    pub async fn authorize(
        &self,
        caller: &Caller,
        path: &str,
        method: &str,
    ) -> Result<bool, PolicyError> {
        let subject = caller.subject();
        match self.enforce(&subject, path, method).await {
            Ok(allowed) => {
                debug!(
                    role = caller.role(),
                    subject = %subject,
                    path,
                    method,
                    allowed,
                    "policy decision"
                );
                Ok(allowed)
            }
            Err(e) => {
                warn!(subject = %subject, path, method, error = %e, "policy store unreadable");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::{Grant, Membership};
    use crate::store::{MemoryStore, PolicyBatch};
    use async_trait::async_trait;

    /// Grant table that cannot be read.
    struct Unreadable;

    fn down() -> PolicyError {
        PolicyError::StoreUnavailable("connection refused".into())
    }

    #[async_trait]
    impl PolicyStore for Unreadable {
        async fn add_grant(&self, _: &Grant) -> Result<bool, PolicyError> {
            Err(down())
        }
        async fn remove_grant(&self, _: &Grant) -> Result<bool, PolicyError> {
            Err(down())
        }
        async fn add_membership(&self, _: &Membership) -> Result<bool, PolicyError> {
            Err(down())
        }
        async fn remove_membership(&self, _: &Membership) -> Result<bool, PolicyError> {
            Err(down())
        }
        async fn apply(&self, _: &PolicyBatch) -> Result<(), PolicyError> {
            Err(down())
        }
        async fn purge_subject(&self, _: &str) -> Result<u64, PolicyError> {
            Err(down())
        }
        async fn grants_for(&self, _: &[String]) -> Result<Vec<Grant>, PolicyError> {
            Err(down())
        }
        async fn groups_of(&self, _: &str) -> Result<Vec<String>, PolicyError> {
            Err(down())
        }
        async fn members_of(&self, _: &str) -> Result<Vec<String>, PolicyError> {
            Err(down())
        }
        async fn list_grants(&self) -> Result<Vec<Grant>, PolicyError> {
            Err(down())
        }
    }

    async fn engine_with(grants: &[Grant], memberships: &[Membership]) -> PolicyEngine {
        let store = Arc::new(MemoryStore::new());
        for grant in grants {
            store.add_grant(grant).await.unwrap();
        }
        for membership in memberships {
            store.add_membership(membership).await.unwrap();
        }
        PolicyEngine::new(store)
    }

    #[tokio::test]
    async fn direct_grant_matches_own_prefix_only() {
        let engine = engine_with(&[Grant::new("alice", "/users/alice*", "*")], &[]).await;
        assert!(
            engine
                .enforce("alice", "/users/alice/services", "GET")
                .await
                .unwrap()
        );
        assert!(!engine.enforce("alice", "/users/bob", "GET").await.unwrap());
        assert!(!engine.enforce("bob", "/users/alice", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn admin_group_allows_everything() {
        let engine = engine_with(
            &[Grant::admin_bootstrap()],
            &[Membership::new("alice", "group::admin")],
        )
        .await;
        assert!(engine.enforce("alice", "/nodes/9", "DELETE").await.unwrap());
        assert!(engine.enforce("alice", "/", "PATCH").await.unwrap());
        assert!(!engine.enforce("bob", "/nodes/9", "DELETE").await.unwrap());
    }

    #[tokio::test]
    async fn action_must_match() {
        let engine = engine_with(&[Grant::new("alice", "/logout", "DELETE")], &[]).await;
        assert!(engine.enforce("alice", "/logout", "DELETE").await.unwrap());
        assert!(!engine.enforce("alice", "/logout", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn anonymous_grants_only_reach_anonymous_callers() {
        let engine = engine_with(
            &[Grant::new(ANONYMOUS_SUBJECT, "/login", "POST")],
            &[Membership::new("alice", ANONYMOUS_SUBJECT)],
        )
        .await;
        assert!(
            engine
                .enforce(ANONYMOUS_SUBJECT, "/login", "POST")
                .await
                .unwrap()
        );
        assert!(!engine.enforce("alice", "/login", "POST").await.unwrap());
    }

    #[tokio::test]
    async fn anonymous_caller_denied_elsewhere() {
        let engine = engine_with(&[Grant::new(ANONYMOUS_SUBJECT, "/login", "POST")], &[]).await;
        let allowed = engine
            .authorize(&Caller::Anonymous, "/users/bob", "GET")
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn node_subject_uses_node_grant() {
        let engine = engine_with(&[Grant::new("node::4", "/nodes/4*", "*")], &[]).await;
        let node = Caller::Node { id: 4 };
        assert!(engine.authorize(&node, "/nodes/4/traffic", "POST").await.unwrap());
        assert!(!engine.authorize(&node, "/nodes/5", "GET").await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_store_is_an_error_not_a_denial() {
        let engine = PolicyEngine::new(Arc::new(Unreadable));
        assert!(matches!(
            engine.enforce("alice", "/users/alice", "GET").await,
            Err(PolicyError::StoreUnavailable(_))
        ));
        assert!(
            engine
                .authorize(&Caller::Anonymous, "/login", "POST")
                .await
                .is_err()
        );
    }
}
