//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod git;
pub mod health;
pub mod hook;
pub mod job;
pub mod job_result;
pub mod lock;
pub mod worker;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        // Job classes
        .route("/api/jobs", get(job::list_jobs))
        .route("/api/jobs/{grouping}/{module}/{class}", get(job::get_job))
        .route("/api/jobs/{grouping}/{module}/{class}/run", post(job::run_job))
        // Job results
        .route("/api/job-results", get(job_result::list_results))
        .route("/api/job-results/pending", get(job_result::pending_results))
        .route(
            "/api/job-results/{id}",
            get(job_result::get_result).put(job_result::save_result),
        )
        .route("/api/job-results/{id}/claim", post(job_result::claim_result))
        .route("/api/job-results/{id}/approve", post(job_result::approve_result))
        .route(
            "/api/job-results/{id}/logs",
            get(job_result::get_logs).post(job_result::add_logs),
        )
        // Workers
        .route("/api/workers", get(worker::list_workers))
        .route("/api/workers/register", post(worker::register_worker))
        .route("/api/workers/{id}/heartbeat", post(worker::heartbeat))
        // Singleton locks
        .route("/api/locks", get(lock::lock_status))
        .route("/api/locks/acquire", post(lock::acquire_lock))
        .route("/api/locks/release", post(lock::release_lock))
        // Hooks and buttons
        .route("/api/job-hooks", get(hook::list_hooks).post(hook::create_hook))
        .route("/api/object-changes", post(hook::object_change))
        .route(
            "/api/job-buttons",
            get(hook::list_buttons).post(hook::create_button),
        )
        .route("/api/job-buttons/{id}/run", post(hook::run_button))
        // Git sources
        .route("/api/git/{slug}/sync", post(git::sync_repository))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
