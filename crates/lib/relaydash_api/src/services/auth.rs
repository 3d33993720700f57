//! Authentication service: registration, login, refresh and logout flows
//! delegating to `relaydash_core`.

use relaydash_core::AccessControl;
use relaydash_core::auth::jwt::{ACCESS_TOKEN_EXPIRY_SECS, TokenKind, peek_identity};
use relaydash_core::auth::password::{hash_password, verify_password};
use relaydash_core::auth::{AuthError, jwt};
use relaydash_core::models::identity::{
    NewUser, PublicUser, USERNAME_MAX_LEN, User, is_valid_username,
};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AccessTokenResponse, RegisterRequest, TokenResponse};

const TOKEN_TYPE: &str = "Bearer";

/// Generic rejection for refresh tokens that do not check out.
fn invalid_refresh_token() -> AppError {
    AppError::Forbidden("Invalid refresh token".into())
}

/// Load the account a token claims to belong to, without verifying it.
async fn claimed_user(access: &AccessControl, token: &str) -> AppResult<Option<User>> {
    let Some(claimed) = peek_identity(token) else {
        return Ok(None);
    };
    Ok(access
        .identities
        .user_by_identity(claimed.uid, &claimed.username)
        .await?)
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AuthError> {
    if req.username.trim().is_empty() {
        return Err(AuthError::ValidationError("username must not be empty".into()));
    }
    if !is_valid_username(&req.username) {
        return Err(AuthError::ValidationError(format!(
            "username may only contain letters, digits, '_', '.' and '-' \
             (at most {USERNAME_MAX_LEN} characters)"
        )));
    }
    if req.password.is_empty() {
        return Err(AuthError::ValidationError("password must not be empty".into()));
    }
    Ok(())
}

/// Create an account together with its default grants. When the grants
/// cannot be written the account is removed again.
pub async fn register(access: &AccessControl, req: &RegisterRequest) -> AppResult<PublicUser> {
    validate_registration(req)?;

    let user = access
        .identities
        .create_user(&NewUser {
            username: req.username.clone(),
            email: req.email.clone().filter(|e| !e.is_empty()),
            password_hash: hash_password(&req.password)?,
        })
        .await?;

    if let Err(e) = access.sync.user_created(&user.username, &[]).await {
        warn!(user_id = user.id, error = %e, "default grants failed, removing account");
        access.identities.delete_user(user.id).await?;
        return Err(e.into());
    }

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user.public())
}

/// Check username and password; issue an access token and a registered
/// refresh token.
pub async fn login(
    access: &AccessControl,
    username: &str,
    password: &str,
) -> AppResult<TokenResponse> {
    let mut user = access
        .identities
        .user_by_username(username)
        .await?
        .ok_or(AuthError::CredentialError)?;

    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::CredentialError.into());
    }

    let access_token = access
        .signer
        .sign(&mut user, TokenKind::Access, TokenKind::Access.default_ttl())
        .await?;
    let refresh_token = access.registry.issue_refresh(&mut user).await?;

    info!(user_id = user.id, "user logged in");
    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: ACCESS_TOKEN_EXPIRY_SECS,
    })
}

/// Exchange a registered refresh token for a new access token, sliding the
/// refresh token's expiry.
pub async fn refresh(access: &AccessControl, refresh_token: &str) -> AppResult<AccessTokenResponse> {
    let mut user = claimed_user(access, refresh_token)
        .await?
        .ok_or_else(invalid_refresh_token)?;

    let key = access.keys.get_or_create(&mut user).await?;
    let claims = jwt::verify(refresh_token, &key)?;
    if claims.sub != TokenKind::Refresh {
        return Err(invalid_refresh_token());
    }

    access.registry.renew(&mut user, refresh_token).await?;

    let access_token = access
        .signer
        .sign(&mut user, TokenKind::Access, TokenKind::Access.default_ttl())
        .await?;
    Ok(AccessTokenResponse {
        access_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: ACCESS_TOKEN_EXPIRY_SECS,
    })
}

/// Revoke a refresh token. Unknown tokens are a 404.
pub async fn logout(access: &AccessControl, refresh_token: &str) -> AppResult<()> {
    let mut user = claimed_user(access, refresh_token)
        .await?
        .ok_or_else(|| AppError::NotFound("Refresh token not found".into()))?;

    access.registry.revoke(&mut user, refresh_token).await?;
    info!(user_id = user.id, "user logged out");
    Ok(())
}
