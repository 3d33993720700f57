//! User and node database queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::auth::refresh::{RefreshTokenSet, RegistryError};
use crate::models::identity::{NewUser, Node, User};
use crate::store::{StoreError, TokenSetEdit};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, signing_key, refresh_tokens";

type UserRow = (
    i64,
    String,
    Option<String>,
    String,
    Option<Vec<u8>>,
    String,
);

/// Decode a row, deserializing the refresh token column.
fn into_user(row: UserRow) -> Result<User, StoreError> {
    let (id, username, email, password_hash, signing_key, refresh_tokens) = row;
    Ok(User {
        id,
        username,
        email,
        password_hash,
        signing_key,
        refresh_tokens: RefreshTokenSet::from_column(&refresh_tokens)?,
    })
}

fn conflict_on_unique(e: sqlx::Error, what: &str) -> StoreError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        e => StoreError::Db(e),
    }
}

/// Insert a user. A taken username is a `Conflict`.
pub async fn create_user(pool: &PgPool, new_user: &NewUser) -> Result<User, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&new_user.username)
    .bind(&new_user.email)
    .bind(&new_user.password_hash)
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, &format!("username {}", new_user.username)))?;
    into_user(row)
}

pub async fn find_user_by_id(pool: &PgPool, id: i64) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(into_user).transpose()
}

pub async fn find_user_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;
    row.map(into_user).transpose()
}

/// Fetch the user matching both `id` and `username`.
pub async fn find_user_by_identity(
    pool: &PgPool,
    id: i64,
    username: &str,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND username = $2"
    ))
    .bind(id)
    .bind(username)
    .fetch_optional(pool)
    .await?;
    row.map(into_user).transpose()
}

/// First account registered with `email`.
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1 ORDER BY id LIMIT 1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    row.map(into_user).transpose()
}

/// Write back the profile columns. Signing key and refresh tokens have their
/// own writers.
pub async fn update_user(pool: &PgPool, user: &User) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE users SET username = $2, email = $3, password_hash = $4, \
         updated_at = now() WHERE id = $1",
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, &format!("username {}", user.username)))?;
    Ok(())
}

/// Lock the user row, decode its refresh token column, apply `edit` and
/// write only that column back. An `edit` error rolls the transaction back.
pub async fn update_refresh_tokens(
    pool: &PgPool,
    id: i64,
    edit: TokenSetEdit<'_>,
) -> Result<Option<RefreshTokenSet>, RegistryError> {
    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    let column = sqlx::query_scalar::<_, String>(
        "SELECT refresh_tokens FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(StoreError::from)?;
    let Some(column) = column else {
        return Ok(None);
    };

    let mut tokens = RefreshTokenSet::from_column(&column)?;
    edit(&mut tokens)?;

    sqlx::query("UPDATE users SET refresh_tokens = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(tokens.to_column()?)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;
    tx.commit().await.map_err(StoreError::from)?;
    Ok(Some(tokens))
}

pub async fn delete_user(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Set the signing key only while it is still NULL, then read back whichever
/// key is persisted.
pub async fn store_signing_key_if_absent(
    pool: &PgPool,
    id: i64,
    key: &[u8],
) -> Result<Option<Vec<u8>>, StoreError> {
    sqlx::query(
        "UPDATE users SET signing_key = $2, updated_at = now() \
         WHERE id = $1 AND signing_key IS NULL",
    )
    .bind(id)
    .bind(key)
    .execute(pool)
    .await?;

    let stored =
        sqlx::query_scalar::<_, Option<Vec<u8>>>("SELECT signing_key FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(stored.flatten())
}

/// Clear the signing key and all refresh tokens.
pub async fn reset_signing_key(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET signing_key = NULL, refresh_tokens = '{}', updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// One outstanding reset token per user; a new request replaces the old one.
pub async fn upsert_password_reset(
    pool: &PgPool,
    user_id: i64,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO password_resets (user_id, token_hash, expires_at) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id) DO UPDATE \
         SET token_hash = EXCLUDED.token_hash, expires_at = EXCLUDED.expires_at, \
             created_at = now()",
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn take_password_reset(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<(i64, DateTime<Utc>)>, StoreError> {
    let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        "DELETE FROM password_resets WHERE token_hash = $1 RETURNING user_id, expires_at",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn create_node(pool: &PgPool, name: &str) -> Result<Node, StoreError> {
    let (id, name) = sqlx::query_as::<_, (i64, String)>(
        "INSERT INTO nodes (name) VALUES ($1) RETURNING id, name",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(Node { id, name })
}

pub async fn find_node_by_credential_hash(
    pool: &PgPool,
    credential_hash: &str,
) -> Result<Option<Node>, StoreError> {
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, name FROM nodes WHERE credential_hash = $1",
    )
    .bind(credential_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id, name)| Node { id, name }))
}

pub async fn set_node_credential_hash(
    pool: &PgPool,
    id: i64,
    credential_hash: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE nodes SET credential_hash = $2, updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(credential_hash)
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "node credential"))?;
    Ok(result.rows_affected() > 0)
}
