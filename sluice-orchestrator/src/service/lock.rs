//! Lock Service
//!
//! Singleton locks shared by every worker.

use sluice_core::dto::lock::{AcquireLock, LockStatus, ReleaseLock};
use sqlx::PgPool;

use crate::repository::lock_repository;

/// Service error type
#[derive(Debug)]
pub enum LockServiceError {
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for LockServiceError {
    fn from(err: sqlx::Error) -> Self {
        LockServiceError::DatabaseError(err)
    }
}

pub async fn acquire(pool: &PgPool, req: AcquireLock) -> Result<LockStatus, LockServiceError> {
    if req.key.is_empty() || req.owner.is_empty() {
        return Err(LockServiceError::ValidationError(
            "key and owner are required".to_string(),
        ));
    }
    if req.ttl_seconds == 0 {
        return Err(LockServiceError::ValidationError(
            "ttl_seconds must be greater than 0".to_string(),
        ));
    }

    let expires_at = i64::try_from(req.ttl_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| LockServiceError::ValidationError("ttl_seconds is out of range".to_string()))?;
    let acquired = lock_repository::acquire(pool, &req.key, &req.owner, expires_at).await?;

    if acquired {
        tracing::debug!("Lock {} taken by {}", req.key, req.owner);
    } else {
        tracing::debug!("Lock {} refused for {}", req.key, req.owner);
    }
    Ok(LockStatus { acquired })
}

pub async fn release(pool: &PgPool, req: ReleaseLock) -> Result<(), LockServiceError> {
    if lock_repository::release(pool, &req.key, &req.owner).await? {
        tracing::debug!("Lock {} released by {}", req.key, req.owner);
    }
    Ok(())
}

/// `acquired` reports whether anyone currently holds the key
pub async fn status(pool: &PgPool, key: &str) -> Result<LockStatus, LockServiceError> {
    Ok(LockStatus {
        acquired: lock_repository::is_locked(pool, key).await?,
    })
}
