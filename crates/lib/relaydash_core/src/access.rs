//! The assembled access control service.
//!
//! Built once at startup around two injected stores and handed to request
//! handlers by clone; every component shares the same stores.

use std::sync::Arc;

use tracing::info;

use crate::auth::password::hash_password;
use crate::auth::{
    AuthError, DiscardDelivery, IdentityResolver, KeyCustodian, NodeCredentials, PasswordResets,
    ResetDelivery, TokenRegistry, TokenSigner,
};
use crate::models::identity::NewUser;
use crate::models::policy::ADMIN_GROUP;
use crate::policy::{PolicyEngine, PolicySync};
use crate::store::{IdentityStore, MemoryStore, PgStore, PolicyStore};

/// Username of the bootstrap administrator.
pub const ADMIN_USERNAME: &str = "admin";

#[derive(Clone)]
pub struct AccessControl {
    pub identities: Arc<dyn IdentityStore>,
    pub keys: KeyCustodian,
    pub signer: TokenSigner,
    pub registry: TokenRegistry,
    pub resolver: IdentityResolver,
    pub nodes: NodeCredentials,
    pub resets: PasswordResets,
    pub engine: PolicyEngine,
    pub sync: PolicySync,
}

impl AccessControl {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        policies: Arc<dyn PolicyStore>,
        issuer: &str,
    ) -> Self {
        let keys = KeyCustodian::new(identities.clone());
        let signer = TokenSigner::new(keys.clone(), issuer);
        let nodes = NodeCredentials::new(identities.clone());
        let resets = PasswordResets::new(
            identities.clone(),
            keys.clone(),
            Arc::new(DiscardDelivery),
        );
        Self {
            registry: TokenRegistry::new(identities.clone(), signer.clone()),
            resolver: IdentityResolver::new(identities.clone(), keys.clone(), nodes.clone()),
            engine: PolicyEngine::new(policies.clone()),
            sync: PolicySync::new(policies),
            identities,
            keys,
            signer,
            nodes,
            resets,
        }
    }

    /// Replace how password reset tokens reach their owners.
    pub fn with_reset_delivery(mut self, delivery: Arc<dyn ResetDelivery>) -> Self {
        self.resets = PasswordResets::new(self.identities.clone(), self.keys.clone(), delivery);
        self
    }

    /// Backed by PostgreSQL.
    pub fn postgres(store: PgStore, issuer: &str) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store, issuer)
    }

    /// Backed by a fresh in-memory store.
    pub fn in_memory(issuer: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, issuer)
    }

    /// Seed bootstrap grants and, when `admin_password` is given and no admin
    /// account exists yet, create one in the admin group.
    pub async fn bootstrap(&self, admin_password: Option<&str>) -> Result<(), AuthError> {
        self.sync.seed_bootstrap().await?;

        let Some(password) = admin_password.filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        if self
            .identities
            .user_by_username(ADMIN_USERNAME)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let admin = self
            .identities
            .create_user(&NewUser {
                username: ADMIN_USERNAME.to_string(),
                email: None,
                password_hash: hash_password(password)?,
            })
            .await?;
        self.sync.user_created(&admin.username, &[]).await?;
        self.sync.member_added(&admin.username, ADMIN_GROUP).await?;
        info!(user_id = admin.id, "bootstrap admin account created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Caller;

    #[tokio::test]
    async fn bootstrap_admin_is_seeded_once() {
        let access = AccessControl::in_memory("relaydash");
        access.bootstrap(Some("changeme")).await.unwrap();
        access.bootstrap(Some("other")).await.unwrap();

        let admin = access
            .identities
            .user_by_username(ADMIN_USERNAME)
            .await
            .unwrap()
            .unwrap();
        assert!(crate::auth::password::verify_password(
            "changeme",
            &admin.password_hash
        ));

        let caller = Caller::User {
            uid: admin.id,
            username: admin.username,
        };
        assert!(
            access
                .engine
                .authorize(&caller, "/nodes/1", "DELETE")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn bootstrap_without_password_only_seeds_grants() {
        let access = AccessControl::in_memory("relaydash");
        access.bootstrap(None).await.unwrap();
        assert!(
            access
                .identities
                .user_by_username(ADMIN_USERNAME)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            access
                .engine
                .authorize(&Caller::Anonymous, "/login", "POST")
                .await
                .unwrap()
        );
    }
}
