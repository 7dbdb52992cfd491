//! Job Result Repository
//!
//! Handles all database operations related to job results.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_core::domain::job::ClassPath;
use sluice_core::domain::job_result::{JobError, JobResult, JobStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Approval progress of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    /// The job needs no approval
    None,
    Awaiting,
    Approved,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::None => "none",
            ApprovalState::Awaiting => "awaiting",
            ApprovalState::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<ApprovalState> {
        match s {
            "none" => Some(ApprovalState::None),
            "awaiting" => Some(ApprovalState::Awaiting),
            "approved" => Some(ApprovalState::Approved),
            _ => None,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT r.id, r.class_path, r.job_name, r.username, r.status, r.task_queue, r.dryrun,
           r.task_kwargs, r.created_at, r.started_at, r.completed_at, r.worker_id,
           r.return_value, r.error
    FROM job_results r
"#;

/// Insert a new result
pub async fn create(pool: &PgPool, result: &JobResult) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_results (
            id, class_path, job_name, username, status, task_queue, dryrun,
            task_kwargs, created_at, started_at, completed_at, worker_id,
            return_value, error
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(result.id)
    .bind(result.class_path.to_string())
    .bind(&result.job_name)
    .bind(&result.user)
    .bind(result.status.as_str())
    .bind(&result.task_queue)
    .bind(result.dryrun)
    .bind(&result.task_kwargs)
    .bind(result.created_at)
    .bind(result.started_at)
    .bind(result.completed_at)
    .bind(&result.worker_id)
    .bind(&result.return_value)
    .bind(encode_error(result.error.as_ref()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a result by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobResult>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobResultRow>(&format!("{} WHERE r.id = $1", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(JobResult::try_from).transpose()
}

/// Most recent results first
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<JobResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobResultRow>(&format!(
        "{} ORDER BY r.created_at DESC LIMIT $1",
        SELECT_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobResult::try_from).collect()
}

/// Pending results with a released, unclaimed payload on one of `queues`
pub async fn find_claimable(pool: &PgPool, queues: &[String]) -> Result<Vec<JobResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobResultRow>(&format!(
        r#"{}
        JOIN job_payloads p ON p.job_result_id = r.id
        WHERE r.status = 'pending'
          AND NOT p.held
          AND p.claimed_by IS NULL
          AND p.queue = ANY($1)
        ORDER BY r.created_at ASC
        "#,
        SELECT_COLUMNS
    ))
    .bind(queues)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobResult::try_from).collect()
}

/// Running results whose worker is unknown or silent since `cutoff`
pub async fn find_orphaned(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<JobResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobResultRow>(&format!(
        r#"{}
        LEFT JOIN workers w ON w.id = r.worker_id
        WHERE r.status = 'running'
          AND (w.id IS NULL OR w.last_heartbeat_at < $1)
        "#,
        SELECT_COLUMNS
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobResult::try_from).collect()
}

/// Write every mutable column of a result
pub async fn update(pool: &PgPool, result: &JobResult) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        r#"
        UPDATE job_results
        SET status = $1, started_at = $2, completed_at = $3, worker_id = $4,
            return_value = $5, error = $6, task_kwargs = $7
        WHERE id = $8
        "#,
    )
    .bind(result.status.as_str())
    .bind(result.started_at)
    .bind(result.completed_at)
    .bind(&result.worker_id)
    .bind(&result.return_value)
    .bind(encode_error(result.error.as_ref()))
    .bind(&result.task_kwargs)
    .bind(result.id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub async fn approval_state(pool: &PgPool, id: Uuid) -> Result<Option<ApprovalState>, sqlx::Error> {
    let state: Option<String> =
        sqlx::query_scalar("SELECT approval_state FROM job_results WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(state.as_deref().and_then(ApprovalState::parse))
}

pub async fn set_approval_state(
    pool: &PgPool,
    id: Uuid,
    state: ApprovalState,
    approver: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE job_results SET approval_state = $1, approved_by = $2 WHERE id = $3")
        .bind(state.as_str())
        .bind(approver)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn encode_error(error: Option<&JobError>) -> Option<Value> {
    error.and_then(|e| serde_json::to_value(e).ok())
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobResultRow {
    id: Uuid,
    class_path: String,
    job_name: String,
    username: Option<String>,
    status: String,
    task_queue: String,
    dryrun: bool,
    task_kwargs: Option<Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    return_value: Option<Value>,
    error: Option<Value>,
}

impl TryFrom<JobResultRow> for JobResult {
    type Error = sqlx::Error;

    fn try_from(row: JobResultRow) -> Result<Self, Self::Error> {
        let class_path = ClassPath::parse(&row.class_path)
            .map_err(|e| decode_error(format!("job_results.class_path: {}", e)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| decode_error(format!("unknown job status '{}'", row.status)))?;
        let error = row
            .error
            .map(serde_json::from_value::<JobError>)
            .transpose()
            .map_err(|e| decode_error(format!("job_results.error: {}", e)))?;

        Ok(JobResult {
            id: row.id,
            class_path,
            job_name: row.job_name,
            user: row.username,
            status,
            task_queue: row.task_queue,
            dryrun: row.dryrun,
            task_kwargs: row.task_kwargs,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            worker_id: row.worker_id,
            return_value: row.return_value,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> JobResultRow {
        JobResultRow {
            id: Uuid::new_v4(),
            class_path: "plugins/example_app/TestPass".to_string(),
            job_name: "TestPass".to_string(),
            username: Some("admin".to_string()),
            status: "errored".to_string(),
            task_queue: "default".to_string(),
            dryrun: false,
            task_kwargs: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            return_value: None,
            error: Some(serde_json::json!({
                "category": "runtime_failure",
                "exc_type": "RuntimeError",
                "message": "boom"
            })),
        }
    }

    #[test]
    fn test_row_decodes() {
        let result = JobResult::try_from(row()).unwrap();
        assert_eq!(result.status, JobStatus::Errored);
        assert_eq!(result.class_path.class_name, "TestPass");
        assert_eq!(result.error.unwrap().message, "boom");
    }

    #[test]
    fn test_bad_rows_are_decode_errors() {
        let mut bad = row();
        bad.status = "exploded".to_string();
        assert!(matches!(JobResult::try_from(bad), Err(sqlx::Error::Decode(_))));

        let mut bad = row();
        bad.class_path = "nope".to_string();
        assert!(JobResult::try_from(bad).is_err());
    }

    #[test]
    fn test_approval_state_names() {
        for state in [ApprovalState::None, ApprovalState::Awaiting, ApprovalState::Approved] {
            assert_eq!(ApprovalState::parse(state.as_str()), Some(state));
        }
    }
}
