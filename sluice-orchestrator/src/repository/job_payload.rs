//! Job Payload Repository
//!
//! Execution requests waiting for a worker. A payload is claimable when it is
//! released (not held for approval) and nobody claimed it yet.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_jobs::engine::TaskMessage;
use sqlx::PgPool;
use uuid::Uuid;

/// Store a task message, replacing an earlier one for the same result
pub async fn upsert(pool: &PgPool, message: &TaskMessage, held: bool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_payloads (job_result_id, task, queue, payload, held)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (job_result_id) DO UPDATE SET
            task = EXCLUDED.task,
            queue = EXCLUDED.queue,
            payload = EXCLUDED.payload,
            held = EXCLUDED.held
        "#,
    )
    .bind(message.job_result_id)
    .bind(&message.task)
    .bind(&message.queue)
    .bind(&message.payload)
    .bind(held)
    .execute(pool)
    .await?;

    Ok(())
}

/// Payload kept back while the result awaits approval
pub async fn find_held(pool: &PgPool, id: Uuid) -> Result<Option<Value>, sqlx::Error> {
    sqlx::query_scalar("SELECT payload FROM job_payloads WHERE job_result_id = $1 AND held")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Hand a released payload to `worker_id`
///
/// Returns `None` when the payload is missing, held or already claimed. The
/// result row records the worker so that only it may save the result.
pub async fn claim(pool: &PgPool, id: Uuid, worker_id: &str) -> Result<Option<Value>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let payload: Option<Value> = sqlx::query_scalar(
        r#"
        UPDATE job_payloads
        SET claimed_by = $1, claimed_at = now()
        WHERE job_result_id = $2 AND NOT held AND claimed_by IS NULL
        RETURNING payload
        "#,
    )
    .bind(worker_id)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if payload.is_some() {
        sqlx::query("UPDATE job_results SET worker_id = $1 WHERE id = $2 AND status = 'pending'")
            .bind(worker_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(payload)
}

/// Give pending results claimed by silent workers back to the queue
pub async fn release_stale_claims(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let released: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE job_payloads p
        SET claimed_by = NULL, claimed_at = NULL
        FROM job_results r
        WHERE r.id = p.job_result_id
          AND r.status = 'pending'
          AND p.claimed_by IS NOT NULL
          AND NOT EXISTS (
              SELECT 1 FROM workers w
              WHERE w.id = p.claimed_by AND w.last_heartbeat_at >= $1
          )
        RETURNING p.job_result_id
        "#,
    )
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("UPDATE job_results SET worker_id = NULL WHERE id = ANY($1)")
        .bind(&released)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(released.len() as u64)
}
