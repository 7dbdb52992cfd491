//! Worker domain model
//!
//! Represents a worker process that executes job results from the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker that can execute jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,

    /// Task queues this worker consumes
    pub queues: Vec<String>,

    pub registered_at: DateTime<Utc>,

    /// Last time this worker sent a heartbeat
    pub last_heartbeat_at: DateTime<Utc>,

    pub status: WorkerStatus,
}

/// Status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Online and ready to accept jobs
    Online,

    /// Hasn't sent a heartbeat recently
    Offline,

    /// Currently executing at least one job
    Busy,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<WorkerStatus> {
        match s {
            "online" => Some(WorkerStatus::Online),
            "offline" => Some(WorkerStatus::Offline),
            "busy" => Some(WorkerStatus::Busy),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
