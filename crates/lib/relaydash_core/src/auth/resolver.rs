//! Caller classification.
//!
//! Turns the `Authorization` header of a request into a [`Caller`]. Anything
//! that does not check out (missing or malformed header, unknown node, bad
//! signature, expired token, a refresh token used as an access token)
//! resolves to [`Caller::Anonymous`]; the policy engine then decides what an
//! anonymous caller may do. Only storage failures surface as errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::jwt::{TokenKind, peek_identity, verify_at};
use super::keys::KeyCustodian;
use super::node_credentials::{NODE_BEARER_PREFIX, NodeCredentials};
use crate::models::policy::{ANONYMOUS_SUBJECT, node_subject};
use crate::store::{IdentityStore, StoreError};

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User { uid: i64, username: String },
    Node { id: i64 },
}

impl Caller {
    /// Subject evaluated by the policy engine.
    pub fn subject(&self) -> String {
        match self {
            Caller::Anonymous => ANONYMOUS_SUBJECT.to_string(),
            Caller::User { username, .. } => username.clone(),
            Caller::Node { id } => node_subject(*id),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Caller::Anonymous => "anonymous",
            Caller::User { .. } => "user",
            Caller::Node { .. } => "node",
        }
    }
}

/// Shape of a bearer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerCredential<'a> {
    /// `node.<credential>`
    Node(&'a str),
    /// `header.payload.signature`
    Signed(&'a str),
}

/// Parse `Bearer <value>` into a credential shape. Returns `None` for any
/// other scheme or segment layout.
pub fn parse_authorization(header: &str) -> Option<BearerCredential<'_>> {
    let mut parts = header.split(' ');
    let (Some("Bearer"), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };

    let segments: Vec<&str> = value.split('.').collect();
    match segments.as_slice() {
        [prefix, credential] if *prefix == NODE_BEARER_PREFIX && !credential.is_empty() => {
            Some(BearerCredential::Node(credential))
        }
        [_, _, _] => Some(BearerCredential::Signed(value)),
        _ => None,
    }
}

/// Classifies requests by their bearer credential.
#[derive(Clone)]
pub struct IdentityResolver {
    identities: Arc<dyn IdentityStore>,
    custodian: KeyCustodian,
    nodes: NodeCredentials,
}

impl IdentityResolver {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        custodian: KeyCustodian,
        nodes: NodeCredentials,
    ) -> Self {
        Self {
            identities,
            custodian,
            nodes,
        }
    }

    /// Classify a request from its `Authorization` header value.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Caller, StoreError> {
        self.resolve_at(authorization, Utc::now()).await
    }

    /// As [`IdentityResolver::resolve`], verifying token lifetimes at `now`.
    pub async fn resolve_at(
        &self,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Caller, StoreError> {
        let Some(header) = authorization else {
            debug!("no authorization header");
            return Ok(Caller::Anonymous);
        };

        match parse_authorization(header) {
            Some(BearerCredential::Node(credential)) => self.resolve_node(credential).await,
            Some(BearerCredential::Signed(token)) => self.resolve_signed(token, now).await,
            None => {
                debug!("malformed authorization header");
                Ok(Caller::Anonymous)
            }
        }
    }

    async fn resolve_node(&self, credential: &str) -> Result<Caller, StoreError> {
        match self.nodes.lookup(credential).await? {
            Some(node) => {
                debug!(node_id = node.id, "node credential matched");
                Ok(Caller::Node { id: node.id })
            }
            None => {
                debug!("node credential matches no node");
                Ok(Caller::Anonymous)
            }
        }
    }

    async fn resolve_signed(&self, token: &str, now: DateTime<Utc>) -> Result<Caller, StoreError> {
        let Some(claimed) = peek_identity(token) else {
            debug!("undecodable token payload");
            return Ok(Caller::Anonymous);
        };

        let Some(mut user) = self
            .identities
            .user_by_identity(claimed.uid, &claimed.username)
            .await?
        else {
            debug!(uid = claimed.uid, "token names no existing user");
            return Ok(Caller::Anonymous);
        };

        let key = match self.custodian.get_or_create(&mut user).await {
            Ok(key) => key,
            Err(e) => {
                debug!(user_id = user.id, error = %e, "signing key unavailable");
                return Ok(Caller::Anonymous);
            }
        };

        let claims = match verify_at(token, &key, now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(user_id = user.id, error = %e, "token verification failed");
                return Ok(Caller::Anonymous);
            }
        };

        if claims.sub != TokenKind::Access {
            debug!(
                user_id = user.id,
                kind = claims.sub.as_str(),
                "token is not an access token"
            );
            return Ok(Caller::Anonymous);
        }

        debug!(user_id = user.id, exp = claims.exp, "access token verified");
        Ok(Caller::User {
            uid: user.id,
            username: user.username,
        })
    }
}
