//! Policy grant and membership database queries.

use sqlx::PgPool;

use super::PolicyError;
use crate::models::policy::{Grant, Membership};
use crate::store::PolicyBatch;

type GrantRow = (String, String, String);

fn into_grant((subject, object, action): GrantRow) -> Grant {
    Grant {
        subject,
        object,
        action,
    }
}

/// Insert a grant unless it already exists. Returns whether a row was added.
pub async fn insert_grant(pool: &PgPool, grant: &Grant) -> Result<bool, PolicyError> {
    let result = sqlx::query(
        "INSERT INTO policy_grants (subject, object, action) VALUES ($1, $2, $3) \
         ON CONFLICT (subject, object, action) DO NOTHING",
    )
    .bind(&grant.subject)
    .bind(&grant.object)
    .bind(&grant.action)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_grant(pool: &PgPool, grant: &Grant) -> Result<bool, PolicyError> {
    let result = sqlx::query(
        "DELETE FROM policy_grants WHERE subject = $1 AND object = $2 AND action = $3",
    )
    .bind(&grant.subject)
    .bind(&grant.object)
    .bind(&grant.action)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert a membership edge unless it already exists.
pub async fn insert_membership(
    pool: &PgPool,
    membership: &Membership,
) -> Result<bool, PolicyError> {
    let result = sqlx::query(
        "INSERT INTO policy_memberships (member, group_subject) VALUES ($1, $2) \
         ON CONFLICT (member, group_subject) DO NOTHING",
    )
    .bind(&membership.member)
    .bind(&membership.group)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_membership(
    pool: &PgPool,
    membership: &Membership,
) -> Result<bool, PolicyError> {
    let result =
        sqlx::query("DELETE FROM policy_memberships WHERE member = $1 AND group_subject = $2")
            .bind(&membership.member)
            .bind(&membership.group)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Apply a batch inside one transaction, removals first.
pub async fn apply_batch(pool: &PgPool, batch: &PolicyBatch) -> Result<(), PolicyError> {
    let mut tx = pool.begin().await?;

    for grant in &batch.remove_grants {
        sqlx::query(
            "DELETE FROM policy_grants WHERE subject = $1 AND object = $2 AND action = $3",
        )
        .bind(&grant.subject)
        .bind(&grant.object)
        .bind(&grant.action)
        .execute(&mut *tx)
        .await?;
    }
    for membership in &batch.remove_memberships {
        sqlx::query("DELETE FROM policy_memberships WHERE member = $1 AND group_subject = $2")
            .bind(&membership.member)
            .bind(&membership.group)
            .execute(&mut *tx)
            .await?;
    }
    for grant in &batch.add_grants {
        sqlx::query(
            "INSERT INTO policy_grants (subject, object, action) VALUES ($1, $2, $3) \
             ON CONFLICT (subject, object, action) DO NOTHING",
        )
        .bind(&grant.subject)
        .bind(&grant.object)
        .bind(&grant.action)
        .execute(&mut *tx)
        .await?;
    }
    for membership in &batch.add_memberships {
        sqlx::query(
            "INSERT INTO policy_memberships (member, group_subject) VALUES ($1, $2) \
             ON CONFLICT (member, group_subject) DO NOTHING",
        )
        .bind(&membership.member)
        .bind(&membership.group)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Delete every grant of `subject` and every edge naming it.
pub async fn purge_subject(pool: &PgPool, subject: &str) -> Result<u64, PolicyError> {
    let mut tx = pool.begin().await?;
    let grants = sqlx::query("DELETE FROM policy_grants WHERE subject = $1")
        .bind(subject)
        .execute(&mut *tx)
        .await?;
    let edges =
        sqlx::query("DELETE FROM policy_memberships WHERE member = $1 OR group_subject = $1")
            .bind(subject)
            .execute(&mut *tx)
            .await?;
    tx.commit().await?;
    Ok(grants.rows_affected() + edges.rows_affected())
}

/// Grants held by any of `subjects`.
pub async fn grants_for(pool: &PgPool, subjects: &[String]) -> Result<Vec<Grant>, PolicyError> {
    let rows = sqlx::query_as::<_, GrantRow>(
        "SELECT subject, object, action FROM policy_grants WHERE subject = ANY($1)",
    )
    .bind(subjects)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(into_grant).collect())
}

pub async fn groups_of(pool: &PgPool, member: &str) -> Result<Vec<String>, PolicyError> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT group_subject FROM policy_memberships WHERE member = $1 ORDER BY group_subject",
    )
    .bind(member)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn members_of(pool: &PgPool, group: &str) -> Result<Vec<String>, PolicyError> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT member FROM policy_memberships WHERE group_subject = $1 ORDER BY member",
    )
    .bind(group)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_grants(pool: &PgPool) -> Result<Vec<Grant>, PolicyError> {
    let rows = sqlx::query_as::<_, GrantRow>(
        "SELECT subject, object, action FROM policy_grants ORDER BY subject, object, action",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(into_grant).collect())
}
