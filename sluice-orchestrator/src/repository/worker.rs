//! Worker Repository
//!
//! Handles all database operations related to workers.

use chrono::{DateTime, Utc};
use sluice_core::domain::worker::{Worker, WorkerStatus};
use sluice_core::dto::worker::RegisterWorker;
use sqlx::PgPool;

/// Create or update a worker registration in the database
pub async fn register(pool: &PgPool, req: RegisterWorker) -> Result<Worker, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkerRow>(
        r#"
        INSERT INTO workers (id, queues, registered_at, last_heartbeat_at, status)
        VALUES ($1, $2, $3, $3, $4)
        ON CONFLICT (id) DO UPDATE SET
            queues = EXCLUDED.queues,
            last_heartbeat_at = EXCLUDED.last_heartbeat_at,
            status = EXCLUDED.status
        RETURNING id, queues, registered_at, last_heartbeat_at, status
        "#,
    )
    .bind(&req.worker_id)
    .bind(&req.queues)
    .bind(now)
    .bind(WorkerStatus::Online.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Update the last heartbeat time for a worker
pub async fn update_heartbeat(pool: &PgPool, worker_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workers
        SET last_heartbeat_at = $1, status = $2
        WHERE id = $3
        "#,
    )
    .bind(Utc::now())
    .bind(WorkerStatus::Online.as_str())
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List all workers
pub async fn list_all(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
    let rows = sqlx::query_as::<_, WorkerRow>(
        r#"
        SELECT id, queues, registered_at, last_heartbeat_at, status
        FROM workers
        ORDER BY registered_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Mark workers silent since `cutoff` as offline
pub async fn mark_stale_offline(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workers
        SET status = $1
        WHERE last_heartbeat_at < $2 AND status <> $1
        "#,
    )
    .bind(WorkerStatus::Offline.as_str())
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: String,
    queues: Vec<String>,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    status: String,
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Worker {
            id: row.id,
            queues: row.queues,
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
            status: WorkerStatus::parse(&row.status).unwrap_or(WorkerStatus::Offline),
        }
    }
}
