//! Job Service
//!
//! Listing and introspection of registered job classes, and enqueueing runs.

use serde_json::{Map, Value};
use sluice_core::domain::job::{ClassPath, JobDescriptor};
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::user::RequestUser;
use sluice_core::domain::variable::ValidationErrors;
use sluice_core::dto::job::{EnqueueJob, JobSummary};
use sluice_jobs::Registry;
use sluice_jobs::engine::{
    DispatchError, Dispatched, ExecutionRequest, RUN_JOB_TASK, StoreError, TaskMessage,
};
use sqlx::PgPool;

use crate::repository::job_result::ApprovalState;
use crate::repository::{payload_repository, result_repository};
use crate::state::AppState;

/// Service error type shared by the job, result, log and hook services
#[derive(Debug)]
pub enum JobError {
    NotFound(String),
    Validation(ValidationErrors),
    /// Already running, already claimed, or a refused state change
    Conflict(String),
    BadRequest(String),
    Forbidden(String),
    DatabaseError(sqlx::Error),
    Internal(String),
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::DatabaseError(err)
    }
}

impl From<DispatchError> for JobError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(path) => JobError::NotFound(format!("Job class {} not found", path)),
            DispatchError::Validation(errors) => JobError::Validation(errors),
            DispatchError::AlreadyRunning(_) | DispatchError::NotAwaitingApproval(_) => {
                JobError::Conflict(err.to_string())
            }
            DispatchError::InvalidQueue { .. }
            | DispatchError::WrongKind { .. }
            | DispatchError::ButtonNotApplicable { .. } => JobError::BadRequest(err.to_string()),
            DispatchError::Store(StoreError::NotFound(id)) => {
                JobError::NotFound(format!("Job result {} not found", id))
            }
            other => JobError::Internal(other.to_string()),
        }
    }
}

/// List registered job classes
pub fn list_jobs(registry: &Registry, include_hidden: bool) -> Vec<JobSummary> {
    registry
        .list(include_hidden)
        .iter()
        .map(JobSummary::from)
        .collect()
}

/// Full descriptor of one job class
pub fn get_job(registry: &Registry, path: &ClassPath) -> Result<JobDescriptor, JobError> {
    registry
        .resolve(path)
        .map(|class| class.descriptor().clone())
        .map_err(|_| JobError::NotFound(format!("Job class {} not found", path)))
}

/// Validate and enqueue one run of a job
pub async fn run_job(
    state: &AppState,
    path: &ClassPath,
    request: EnqueueJob,
) -> Result<JobResult, JobError> {
    let data = request.data.clone();
    let user = request.user.clone();

    let dispatched = state.dispatcher.enqueue(path, request).await?;
    record_dispatch(&state.pool, dispatched, data, user).await
}

/// Persist what the dispatcher left to the caller
///
/// A result held for approval keeps its execution request in a held payload
/// until someone approves it.
pub async fn record_dispatch(
    pool: &PgPool,
    dispatched: Dispatched,
    data: Map<String, Value>,
    user: Option<RequestUser>,
) -> Result<JobResult, JobError> {
    match dispatched {
        Dispatched::Queued { result, .. } => {
            tracing::info!("Job result {} queued for {}", result.id, result.class_path);
            Ok(result)
        }
        Dispatched::AwaitingApproval(result) => {
            let request = ExecutionRequest {
                job_result_id: result.id,
                data,
                user,
            };
            let payload = serde_json::to_value(&request)
                .map_err(|e| JobError::Internal(format!("Cannot encode job payload: {}", e)))?;
            let message = TaskMessage {
                task: RUN_JOB_TASK.to_string(),
                queue: result.task_queue.clone(),
                job_result_id: result.id,
                payload,
            };
            payload_repository::upsert(pool, &message, true).await?;
            result_repository::set_approval_state(pool, result.id, ApprovalState::Awaiting, None)
                .await?;
            Ok(result)
        }
    }
}
