//! Hook Service
//!
//! Job hook and job button registrations, object change intake and button
//! presses.

use sluice_core::domain::change::ObjectChange;
use sluice_core::domain::hook::{JobButton, JobHook};
use sluice_core::domain::job::{ClassPath, JobKind};
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::user::RequestUser;
use sluice_core::dto::hook::{CreateJobButton, CreateJobHook, RunJobButton};
use sluice_jobs::Registry;
use sluice_jobs::receivers::{HookDispatcher, OBJECT_CHANGE_VAR, OBJECT_VAR};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{JobError, record_dispatch};
use crate::repository::hook_repository;
use crate::state::AppState;

/// The class must exist and be of the receiver kind the registration needs
fn check_receiver(registry: &Registry, path: &ClassPath, kind: JobKind) -> Result<(), JobError> {
    let class = registry
        .resolve(path)
        .map_err(|_| JobError::BadRequest(format!("Job class {} not found", path)))?;
    let actual = class.descriptor().kind;
    if actual != kind {
        return Err(JobError::BadRequest(format!(
            "Job class {} is a {} job, expected {}",
            path,
            actual.as_str(),
            kind.as_str()
        )));
    }
    Ok(())
}

fn unique_name(err: sqlx::Error, name: &str) -> JobError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            JobError::Conflict(format!("'{}' already exists", name))
        }
        _ => JobError::DatabaseError(err),
    }
}

// =============================================================================
// Job Hooks
// =============================================================================

pub async fn create_hook(state: &AppState, req: CreateJobHook) -> Result<JobHook, JobError> {
    check_receiver(state.registry(), &req.class_path, JobKind::JobHookReceiver)?;
    if req.content_types.is_empty() || req.actions.is_empty() {
        return Err(JobError::BadRequest(
            "A job hook needs at least one content type and one action".to_string(),
        ));
    }

    let hook = JobHook {
        id: Uuid::new_v4(),
        name: req.name,
        class_path: req.class_path,
        content_types: req.content_types,
        actions: req.actions,
        enabled: req.enabled,
    };
    hook_repository::create_hook(&state.pool, &hook)
        .await
        .map_err(|e| unique_name(e, &hook.name))?;

    tracing::info!("Job hook created: {} -> {}", hook.name, hook.class_path);
    Ok(hook)
}

pub async fn list_hooks(pool: &PgPool) -> Result<Vec<JobHook>, JobError> {
    Ok(hook_repository::list_hooks(pool).await?)
}

/// Enqueue every hook receiver matching an object change
///
/// Returns the results that were created; hooks that fail to enqueue are
/// logged and skipped.
pub async fn receive_object_change(
    state: &AppState,
    change: ObjectChange,
) -> Result<Vec<JobResult>, JobError> {
    let hooks = hook_repository::hooks_for_content_type(&state.pool, &change.changed_object_type)
        .await?;

    // Same input the dispatcher hands each receiver
    let payload = serde_json::to_value(&change)
        .map_err(|e| JobError::Internal(format!("Cannot encode object change: {}", e)))?;
    let mut data = serde_json::Map::new();
    data.insert(OBJECT_CHANGE_VAR.to_string(), payload);
    let user = change.user.clone().map(RequestUser::new);

    let outcomes = HookDispatcher::new(&state.dispatcher)
        .dispatch(&hooks, &change)
        .await;

    let mut results = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(dispatched) => {
                let result =
                    record_dispatch(&state.pool, dispatched, data.clone(), user.clone()).await?;
                results.push(result);
            }
            Err(e) => tracing::warn!("Job hook {} skipped: {}", name, e),
        }
    }
    Ok(results)
}

// =============================================================================
// Job Buttons
// =============================================================================

pub async fn create_button(state: &AppState, req: CreateJobButton) -> Result<JobButton, JobError> {
    check_receiver(state.registry(), &req.class_path, JobKind::JobButtonReceiver)?;
    if req.content_types.is_empty() {
        return Err(JobError::BadRequest(
            "A job button needs at least one content type".to_string(),
        ));
    }

    let button = JobButton {
        id: Uuid::new_v4(),
        name: req.name,
        class_path: req.class_path,
        content_types: req.content_types,
        enabled: req.enabled,
    };
    hook_repository::create_button(&state.pool, &button)
        .await
        .map_err(|e| unique_name(e, &button.name))?;

    tracing::info!("Job button created: {} -> {}", button.name, button.class_path);
    Ok(button)
}

pub async fn list_buttons(pool: &PgPool) -> Result<Vec<JobButton>, JobError> {
    Ok(hook_repository::list_buttons(pool).await?)
}

/// Run the receiver behind a button against one object
pub async fn press_button(state: &AppState, id: Uuid, req: RunJobButton) -> Result<JobResult, JobError> {
    let button = hook_repository::find_button(&state.pool, id)
        .await?
        .ok_or_else(|| JobError::NotFound(format!("Job button {} not found", id)))?;

    let object = serde_json::to_value(&req.object)
        .map_err(|e| JobError::Internal(format!("Cannot encode object: {}", e)))?;
    let mut data = serde_json::Map::new();
    data.insert(OBJECT_VAR.to_string(), object);

    let dispatched = HookDispatcher::new(&state.dispatcher)
        .press(&button, &req.object, req.user.clone())
        .await?;
    record_dispatch(&state.pool, dispatched, data, req.user).await
}
