//! Failure taxonomy shared by every service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a job did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Input rejected before enqueueing, or on re-validation by the worker
    ValidationFailed,
    /// A singleton job with the same key is already executing
    AlreadyRunning,
    /// The class path does not resolve to a registered job
    NotFound,
    /// The job body raised
    RuntimeFailure,
    /// The job called `fail` without raising
    ExplicitFailure,
    /// The hard time limit elapsed
    TimeLimitExceeded,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ValidationFailed => "validation_failed",
            FailureCategory::AlreadyRunning => "already_running",
            FailureCategory::NotFound => "not_found",
            FailureCategory::RuntimeFailure => "runtime_failure",
            FailureCategory::ExplicitFailure => "explicit_failure",
            FailureCategory::TimeLimitExceeded => "time_limit_exceeded",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
