//! Job Result Service
//!
//! Claiming, saving and approving job results.

use serde_json::Value;
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::user::RequestUser;
use sluice_core::dto::job::ClaimedJob;
use sluice_jobs::engine::store::check_save;
use sluice_jobs::engine::{ExecutionRequest, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::JobError;
use crate::repository::job_result::ApprovalState;
use crate::repository::{payload_repository, result_repository};
use crate::state::AppState;

const LIST_LIMIT: i64 = 500;

pub async fn list_results(pool: &PgPool) -> Result<Vec<JobResult>, JobError> {
    Ok(result_repository::list_recent(pool, LIST_LIMIT).await?)
}

pub async fn get_result(pool: &PgPool, id: Uuid) -> Result<JobResult, JobError> {
    result_repository::find_by_id(pool, id)
        .await?
        .ok_or_else(|| JobError::NotFound(format!("Job result {} not found", id)))
}

/// Results a worker serving `queues` may claim, oldest first
pub async fn pending_results(pool: &PgPool, queues: &[String]) -> Result<Vec<JobResult>, JobError> {
    if queues.is_empty() {
        return Err(JobError::BadRequest("at least one queue is required".to_string()));
    }
    Ok(result_repository::find_claimable(pool, queues).await?)
}

/// Hand a pending result and its execution request to a worker
pub async fn claim_result(pool: &PgPool, id: Uuid, worker_id: &str) -> Result<ClaimedJob, JobError> {
    let Some(payload) = payload_repository::claim(pool, id, worker_id).await? else {
        // Tell "no such result" apart from "not claimable"
        get_result(pool, id).await?;
        return Err(JobError::Conflict(format!(
            "Job result {} is not claimable",
            id
        )));
    };

    let request: ExecutionRequest = serde_json::from_value(payload)
        .map_err(|e| JobError::Internal(format!("Corrupt payload for {}: {}", id, e)))?;
    let job_result = get_result(pool, id).await?;

    tracing::info!("Job result {} claimed by {}", id, worker_id);

    Ok(ClaimedJob {
        job_result,
        data: request.data,
        user: request.user,
    })
}

/// Persist a result sent by its worker
///
/// Status changes must follow the allowed transitions and only the worker
/// that claimed the result may save it.
pub async fn save_result(pool: &PgPool, id: Uuid, result: JobResult) -> Result<(), JobError> {
    if result.id != id {
        return Err(JobError::BadRequest(format!(
            "Result id {} does not match the path ({})",
            result.id, id
        )));
    }

    let stored = get_result(pool, id).await?;
    check_save(&stored, &result).map_err(|e| match e {
        StoreError::Transition(_) | StoreError::NotOwner(_) => JobError::Conflict(e.to_string()),
        other => JobError::Internal(other.to_string()),
    })?;

    result_repository::update(pool, &result).await?;

    if stored.status != result.status {
        tracing::info!("Job result {}: {} -> {}", id, stored.status, result.status);
    }
    Ok(())
}

/// Approve a held result and release it to the workers
pub async fn approve_result(state: &AppState, id: Uuid, approver: &str) -> Result<JobResult, JobError> {
    let pool = &state.pool;
    let result = get_result(pool, id).await?;

    match result_repository::approval_state(pool, id).await? {
        Some(ApprovalState::Awaiting) => {}
        _ => {
            return Err(JobError::Conflict(format!(
                "Job result {} is not awaiting approval",
                id
            )));
        }
    }
    check_approver(&result, approver)?;

    let (data, user) = match payload_repository::find_held(pool, id).await? {
        Some(payload) => {
            let request: ExecutionRequest = serde_json::from_value(payload)
                .map_err(|e| JobError::Internal(format!("Corrupt payload for {}: {}", id, e)))?;
            (request.data, request.user)
        }
        None => fallback_request(&result),
    };

    state.dispatcher.release_approved(id, data, user).await?;
    result_repository::set_approval_state(pool, id, ApprovalState::Approved, Some(approver)).await?;

    tracing::info!("Job result {} approved by {}", id, approver);
    get_result(pool, id).await
}

fn check_approver(result: &JobResult, approver: &str) -> Result<(), JobError> {
    if approver.is_empty() {
        return Err(JobError::BadRequest("approver is required".to_string()));
    }
    if result.user.as_deref() == Some(approver) {
        return Err(JobError::Forbidden(
            "A job cannot be approved by the user who requested it".to_string(),
        ));
    }
    Ok(())
}

/// Rebuild an execution request from the stored inputs
///
/// Jobs that need approval never have sensitive variables, so their inputs
/// are always kept on the result.
fn fallback_request(result: &JobResult) -> (serde_json::Map<String, Value>, Option<RequestUser>) {
    let data = match &result.task_kwargs {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    (data, result.user.clone().map(RequestUser::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::domain::job::ClassPath;

    fn result_by(user: &str) -> JobResult {
        let mut result = JobResult::new(ClassPath::local("maintenance", "Reboot"), "Reboot");
        result.user = Some(user.to_string());
        result
    }

    #[test]
    fn test_requester_cannot_approve() {
        let result = result_by("alice");
        assert!(matches!(check_approver(&result, "alice"), Err(JobError::Forbidden(_))));
        assert!(matches!(check_approver(&result, ""), Err(JobError::BadRequest(_))));
        assert!(check_approver(&result, "bob").is_ok());
    }

    #[test]
    fn test_fallback_request_uses_stored_inputs() {
        let mut result = result_by("alice");
        result.task_kwargs = Some(json!({"device": "edge-01"}));

        let (data, user) = fallback_request(&result);
        assert_eq!(data["device"], "edge-01");
        assert_eq!(user.unwrap().username, "alice");

        result.task_kwargs = None;
        assert!(fallback_request(&result).0.is_empty());
    }
}
