//! Job result domain types
//!
//! A `JobResult` is the persistent record of one job execution request.
//! It is created `Pending` by the dispatcher and moved through its states by
//! the engine that claimed it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::ClassPath;
use crate::error::FailureCategory;

/// Execution status of a job result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Errored,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Errored
        )
    }

    /// Transitions are monotonic; a result never leaves a terminal state
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            // Rejected before ever starting (singleton conflict, unknown class)
            (JobStatus::Pending, JobStatus::Failed | JobStatus::Errored) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "errored" => Some(JobStatus::Errored),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Structured failure details recorded on a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub category: FailureCategory,
    /// Error type name, e.g. `RuntimeError` or `SoftTimeLimitExceeded`
    pub exc_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl JobError {
    pub fn new(
        category: FailureCategory,
        exc_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            exc_type: exc_type.into(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

/// Persistent record of one job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: Uuid,
    pub class_path: ClassPath,
    pub job_name: String,
    pub user: Option<String>,
    pub status: JobStatus,
    pub task_queue: String,
    pub dryrun: bool,
    /// Submitted input, withheld when the job has sensitive variables
    pub task_kwargs: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub return_value: Option<Value>,
    pub error: Option<JobError>,
}

impl JobResult {
    pub fn new(class_path: ClassPath, job_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_path,
            job_name: job_name.into(),
            user: None,
            status: JobStatus::Pending,
            task_queue: crate::domain::job::DEFAULT_TASK_QUEUE.to_string(),
            dryrun: false,
            task_kwargs: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            return_value: None,
            error: None,
        }
    }

    /// Move to `next`, stamping `started_at` / `completed_at`
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Terminate with failure details attached
    pub fn fail_with(&mut self, status: JobStatus, error: JobError) -> Result<(), TransitionError> {
        self.transition(status)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
