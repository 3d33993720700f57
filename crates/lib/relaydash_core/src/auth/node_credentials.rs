//! Relay node bearer credentials.
//!
//! A node authenticates with `Authorization: Bearer node.<credential>`. The
//! credential is an opaque random string without expiry; only its SHA-256
//! digest is stored, so it is shown once when (re)generated.

use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::models::identity::Node;
use crate::store::{IdentityStore, StoreError};

/// Literal first segment of a node bearer value.
pub const NODE_BEARER_PREFIX: &str = "node";

/// Length of a generated credential.
pub const NODE_CREDENTIAL_LEN: usize = 64;

/// Generate a random credential (64 alphanumeric chars).
pub fn generate_credential() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(NODE_CREDENTIAL_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a credential, as stored.
pub fn credential_digest(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bearer header value for a credential.
pub fn bearer_value(credential: &str) -> String {
    format!("{NODE_BEARER_PREFIX}.{credential}")
}

/// Issues and looks up node credentials.
#[derive(Clone)]
pub struct NodeCredentials {
    identities: Arc<dyn IdentityStore>,
}

impl NodeCredentials {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Replace node `id`'s credential with a fresh one and return it.
    /// Returns `None` when the node does not exist.
    pub async fn regenerate(&self, id: i64) -> Result<Option<String>, StoreError> {
        let credential = generate_credential();
        let updated = self
            .identities
            .set_node_credential_hash(id, &credential_digest(&credential))
            .await?;
        if !updated {
            return Ok(None);
        }
        info!(node_id = id, "node credential regenerated");
        Ok(Some(credential))
    }

    /// The node holding `credential`, if any.
    pub async fn lookup(&self, credential: &str) -> Result<Option<Node>, StoreError> {
        self.identities
            .node_by_credential_hash(&credential_digest(credential))
            .await
    }
}
