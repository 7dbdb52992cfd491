//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sluice_core::domain::variable::ValidationErrors;

use crate::service::git::GitError;
use crate::service::job::JobError;
use crate::service::lock::LockServiceError;
use crate::service::worker::WorkerError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Rejected job input, reported per field
    Validation(ValidationErrors),
    Conflict(String),
    Forbidden(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "invalid job data".to_string(),
                Some(errors.0),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = match fields {
            Some(fields) => serde_json::json!({ "error": message, "fields": fields }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(msg) => ApiError::NotFound(msg),
            JobError::Validation(errors) => ApiError::Validation(errors),
            JobError::Conflict(msg) => ApiError::Conflict(msg),
            JobError::BadRequest(msg) => ApiError::BadRequest(msg),
            JobError::Forbidden(msg) => ApiError::Forbidden(msg),
            JobError::DatabaseError(err) => ApiError::DatabaseError(err),
            JobError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound(msg) => ApiError::NotFound(msg),
            WorkerError::ValidationError(msg) => ApiError::BadRequest(msg),
            WorkerError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<LockServiceError> for ApiError {
    fn from(err: LockServiceError) -> Self {
        match err {
            LockServiceError::ValidationError(msg) => ApiError::BadRequest(msg),
            LockServiceError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<GitError> for ApiError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::UnknownRepository(slug) => {
                ApiError::NotFound(format!("Git repository {} is not configured", slug))
            }
            GitError::SyncFailed(msg) => ApiError::InternalError(format!("Git sync failed: {}", msg)),
            GitError::ReloadFailed(msg) => {
                ApiError::InternalError(format!("Reloading jobs failed: {}", msg))
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_errors_carry_fields() {
        let mut errors = ValidationErrors::default();
        errors.add("count", "Enter a whole number.");

        let (status, body) = body_of(ApiError::Validation(errors)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"]["count"][0], "Enter a whole number.");
    }

    #[tokio::test]
    async fn test_service_errors_map_to_status() {
        let (status, _) = body_of(JobError::Conflict("running".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = body_of(JobError::Forbidden("self approval".into()).into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = body_of(GitError::UnknownRepository("netops".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.get("fields").is_none());
    }
}
