//! Log Repository
//!
//! Handles all database operations related to job logs.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_core::domain::log::{LogEntry, LogLevel, ObjectRef};
use sqlx::PgPool;
use uuid::Uuid;

/// Append log entries for a result in one transaction
pub async fn add_entries(
    pool: &PgPool,
    job_result_id: Uuid,
    entries: &[LogEntry],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        let object = entry
            .object
            .as_ref()
            .and_then(|o| serde_json::to_value(o).ok());

        sqlx::query(
            r#"
            INSERT INTO job_logs (job_result_id, seq, timestamp, level, grouping, object, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job_result_id)
        .bind(entry.seq as i64)
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.grouping)
        .bind(object)
        .bind(&entry.message)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Get all log entries for a result in emission order
pub async fn find_by_result(pool: &PgPool, job_result_id: Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT seq, timestamp, level, grouping, object, message
        FROM job_logs
        WHERE job_result_id = $1
        ORDER BY seq ASC, id ASC
        "#,
    )
    .bind(job_result_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Highest sequence number written for a result, 0 when it has no entries
pub async fn last_seq(pool: &PgPool, job_result_id: Uuid) -> Result<u64, sqlx::Error> {
    let seq: Option<i64> =
        sqlx::query_scalar("SELECT MAX(seq) FROM job_logs WHERE job_result_id = $1")
            .bind(job_result_id)
            .fetch_one(pool)
            .await?;

    Ok(seq.unwrap_or(0).max(0) as u64)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    seq: i64,
    timestamp: DateTime<Utc>,
    level: String,
    grouping: String,
    object: Option<Value>,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            seq: row.seq.max(0) as u64,
            timestamp: row.timestamp,
            level: LogLevel::parse(&row.level).unwrap_or(LogLevel::Info),
            grouping: row.grouping,
            object: row
                .object
                .and_then(|o| serde_json::from_value::<ObjectRef>(o).ok()),
            message: row.message,
        }
    }
}
