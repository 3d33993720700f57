//! Signed token generation and verification.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url) signed
//! with HS512 under the owning user's own key. Temporal claims are checked
//! against an explicit `now` so callers and tests control the clock.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::AuthError;
use super::keys::KeyCustodian;
use crate::models::identity::User;

/// Signing algorithm for every issued token.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS512;

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "relaydash";

/// Access token lifetime: 5 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 5 * 60;

/// Refresh token lifetime: 24 hours.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 24 * 60 * 60;

/// Token verification errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("signature does not verify")]
    SignatureInvalid,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token encoding failed: {0}")]
    Encode(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// What a token may be used for, carried in the `sub` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "AccessToken")]
    Access,
    #[serde(rename = "RefreshToken")]
    Refresh,
}

impl TokenKind {
    /// Lifetime applied at issuance.
    pub fn default_ttl(self) -> Duration {
        match self {
            TokenKind::Access => Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS),
            TokenKind::Refresh => Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "AccessToken",
            TokenKind::Refresh => "RefreshToken",
        }
    }
}

/// Claim set embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Token kind.
    pub sub: TokenKind,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Not before (unix timestamp).
    pub nbf: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Unique token id.
    pub jti: String,
    /// Owning user id.
    pub uid: i64,
    /// Owning username.
    pub username: String,
}

impl TokenClaims {
    /// Claims for `user`, valid from `now` until `now + ttl`.
    pub fn new(
        issuer: &str,
        user: &User,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: kind,
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            uid: user.id,
            username: user.username.clone(),
        }
    }
}

/// Identity fields read from a token payload before any verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimedIdentity {
    pub uid: i64,
    pub username: String,
}

/// Sign `claims` with `key`.
pub fn encode_claims(claims: &TokenClaims, key: &[u8]) -> Result<String, TokenError> {
    encode(
        &Header::new(TOKEN_ALGORITHM),
        claims,
        &EncodingKey::from_secret(key),
    )
    .map_err(|e| TokenError::Encode(e.to_string()))
}

/// Verify a token against `key` at the current time.
pub fn verify(token: &str, key: &[u8]) -> Result<TokenClaims, TokenError> {
    verify_at(token, key, Utc::now())
}

/// Verify a token against `key` as of `now`.
///
/// A token is accepted on `[nbf, exp]` at second resolution.
pub fn verify_at(
    token: &str,
    key: &[u8],
    now: DateTime<Utc>,
) -> Result<TokenClaims, TokenError> {
    let mut validation = Validation::new(TOKEN_ALGORITHM);
    // Temporal claims are checked below against `now`.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = ["exp", "nbf", "iat"]
        .into_iter()
        .map(String::from)
        .collect();

    let claims =
        decode::<TokenClaims>(token, &DecodingKey::from_secret(key), &validation)?.claims;

    let now = now.timestamp();
    if now < claims.nbf {
        return Err(TokenError::NotYetValid);
    }
    if now > claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

/// Read `uid` and `username` from the payload segment without checking the
/// signature. Returns `None` unless the token has exactly three segments and
/// a decodable payload.
pub fn peek_identity(token: &str) -> Option<ClaimedIdentity> {
    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Issues tokens signed with each user's own key.
#[derive(Clone)]
pub struct TokenSigner {
    custodian: KeyCustodian,
    issuer: String,
}

impl TokenSigner {
    pub fn new(custodian: KeyCustodian, issuer: impl Into<String>) -> Self {
        Self {
            custodian,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a `kind` token for `user` expiring `ttl` from now. Generates the
    /// user's key on first use.
    pub async fn sign(
        &self,
        user: &mut User,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        self.sign_at(user, kind, ttl, Utc::now()).await
    }

    /// As [`TokenSigner::sign`] with an explicit issuance instant.
    pub async fn sign_at(
        &self,
        user: &mut User,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let key = self.custodian.get_or_create(user).await?;
        let claims = TokenClaims::new(&self.issuer, user, kind, ttl, now);
        Ok(encode_claims(&claims, &key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh::RefreshTokenSet;

    fn user() -> User {
        User {
            id: 42,
            username: "alice".into(),
            email: None,
            password_hash: String::new(),
            signing_key: None,
            refresh_tokens: RefreshTokenSet::default(),
        }
    }

    fn key() -> Vec<u8> {
        vec![7u8; 128]
    }

    fn issued(kind: TokenKind, now: DateTime<Utc>) -> (TokenClaims, String) {
        let claims = TokenClaims::new(DEFAULT_ISSUER, &user(), kind, kind.default_ttl(), now);
        let token = encode_claims(&claims, &key()).unwrap();
        (claims, token)
    }

    #[test]
    fn verify_returns_signed_claims() {
        let now = Utc::now();
        let (claims, token) = issued(TokenKind::Access, now);
        let verified = verify_at(&token, &key(), now).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.uid, 42);
        assert_eq!(verified.username, "alice");
        assert_eq!(verified.exp - verified.iat, ACCESS_TOKEN_EXPIRY_SECS);
    }

    #[test]
    fn token_has_three_base64url_segments() {
        let (_, token) = issued(TokenKind::Refresh, Utc::now());
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "HS512");

        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[1]).unwrap()).unwrap();
        assert_eq!(payload["sub"], "RefreshToken");
        assert_eq!(payload["iss"], DEFAULT_ISSUER);
        assert_eq!(payload["uid"], 42);
        assert_eq!(payload["username"], "alice");
        for claim in ["exp", "nbf", "iat", "jti"] {
            assert!(payload.get(claim).is_some(), "missing {claim}");
        }
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let (claims, token) = issued(TokenKind::Access, now);
        let exp = DateTime::from_timestamp(claims.exp, 0).unwrap();

        assert!(verify_at(&token, &key(), exp - Duration::seconds(1)).is_ok());
        assert_eq!(
            verify_at(&token, &key(), exp + Duration::seconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn not_yet_valid_before_nbf() {
        let now = Utc::now();
        let (_, token) = issued(TokenKind::Access, now);
        assert_eq!(
            verify_at(&token, &key(), now - Duration::seconds(5)),
            Err(TokenError::NotYetValid)
        );
    }

    #[test]
    fn wrong_key_is_signature_invalid() {
        let (_, token) = issued(TokenKind::Access, Utc::now());
        assert_eq!(
            verify(&token, &[9u8; 128]),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (_, token) = issued(TokenKind::Access, Utc::now());
        let segments: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "iss": DEFAULT_ISSUER, "sub": "AccessToken", "exp": i64::MAX, "nbf": 0,
                "iat": 0, "jti": "x", "uid": 1, "username": "admin"
            })
            .to_string(),
        );
        let token = format!("{}.{}.{}", segments[0], forged, segments[2]);
        assert_eq!(verify(&token, &key()), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            verify("not.a.token", &key()),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn token_ids_are_unique() {
        let now = Utc::now();
        let (a, _) = issued(TokenKind::Access, now);
        let (b, _) = issued(TokenKind::Access, now);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn peek_identity_reads_unverified_payload() {
        let (_, token) = issued(TokenKind::Access, Utc::now());
        let claimed = peek_identity(&token).unwrap();
        assert_eq!(claimed.uid, 42);
        assert_eq!(claimed.username, "alice");
    }

    #[test]
    fn peek_identity_rejects_wrong_shapes() {
        assert!(peek_identity("a.b").is_none());
        assert!(peek_identity("a.b.c.d").is_none());
        assert!(peek_identity("a.!!!.c").is_none());
        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(peek_identity(&format!("a.{not_json}.c")).is_none());
    }
}
