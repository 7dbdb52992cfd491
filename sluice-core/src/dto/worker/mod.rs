//! Worker DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::worker::{Worker, WorkerStatus};

/// Request to register a worker with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub worker_id: String,

    /// Task queues the worker consumes
    pub queues: Vec<String>,
}

/// Summary information about a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    pub queue_count: usize,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: WorkerStatus,
}

impl From<Worker> for WorkerSummary {
    fn from(worker: Worker) -> Self {
        WorkerSummary {
            id: worker.id,
            queue_count: worker.queues.len(),
            registered_at: worker.registered_at,
            last_heartbeat_at: worker.last_heartbeat_at,
            status: worker.status,
        }
    }
}
