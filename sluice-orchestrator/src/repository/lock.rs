//! Singleton Lock Repository
//!
//! A key is held by one owner until released or until it expires.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Take `key` for `owner` unless someone else holds an unexpired lock
pub async fn acquire(
    pool: &PgPool,
    key: &str,
    owner: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();

    let taken = sqlx::query(
        r#"
        INSERT INTO singleton_locks (key, owner, acquired_at, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (key) DO UPDATE SET
            owner = EXCLUDED.owner,
            acquired_at = EXCLUDED.acquired_at,
            expires_at = EXCLUDED.expires_at
        WHERE singleton_locks.expires_at <= $3 OR singleton_locks.owner = EXCLUDED.owner
        "#,
    )
    .bind(key)
    .bind(owner)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(taken.rows_affected() > 0)
}

/// Release `key` if `owner` holds it
pub async fn release(pool: &PgPool, key: &str, owner: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM singleton_locks WHERE key = $1 AND owner = $2")
        .bind(key)
        .bind(owner)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Drop every lock `owner` holds
pub async fn release_owned(pool: &PgPool, owner: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM singleton_locks WHERE owner = $1")
        .bind(owner)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn is_locked(pool: &PgPool, key: &str) -> Result<bool, sqlx::Error> {
    let held: Option<String> = sqlx::query_scalar(
        "SELECT owner FROM singleton_locks WHERE key = $1 AND expires_at > $2",
    )
    .bind(key)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(held.is_some())
}

/// Drop expired locks
pub async fn delete_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM singleton_locks WHERE expires_at <= $1")
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
