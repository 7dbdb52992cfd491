//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::job::{ClassPath, JobKind};
use crate::domain::job::JobDescriptor;
use crate::domain::job_result::JobResult;
use crate::domain::user::RequestUser;

/// Request to run a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueJob {
    /// Raw variable values keyed by variable name
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Falls back to the job's `dryrun_default`
    #[serde(default)]
    pub dryrun: Option<bool>,
    #[serde(default)]
    pub user: Option<RequestUser>,
    /// Falls back to the job's first declared queue
    #[serde(default)]
    pub task_queue: Option<String>,
}

impl EnqueueJob {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: RequestUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = Some(dryrun);
        self
    }
}

/// Worker request to take ownership of a pending result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimJob {
    pub worker_id: String,
}

/// Everything a worker needs to execute a claimed result
///
/// `data` is delivered here even when the result withholds `task_kwargs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job_result: JobResult,
    pub data: Map<String, Value>,
    pub user: Option<RequestUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveJob {
    pub approver: String,
}

/// Query for claimable results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQuery {
    /// Comma separated queue names
    pub queues: Option<String>,
}

impl PendingQuery {
    pub fn queue_list(&self) -> Vec<String> {
        self.queues
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// Listing entry for a job class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub class_path: ClassPath,
    pub name: String,
    pub description: Option<String>,
    pub kind: JobKind,
    pub hidden: bool,
    pub variable_count: usize,
}

impl From<&JobDescriptor> for JobSummary {
    fn from(d: &JobDescriptor) -> Self {
        JobSummary {
            class_path: d.class_path.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            kind: d.kind,
            hidden: d.meta.hidden,
            variable_count: d.variables.len(),
        }
    }
}
