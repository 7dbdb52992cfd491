//! Enqueueing side of the engine
//!
//! Validation and not-found are reported to the caller synchronously and
//! never create a result. Everything that passes gets a `Pending` result
//! and a task message on its queue.

use sluice_core::domain::job::{ClassPath, JobDescriptor, JobKind};
use sluice_core::domain::job_result::{JobResult, JobStatus};
use sluice_core::domain::user::RequestUser;
use sluice_core::domain::variable::ValidationErrors;
use sluice_core::dto::job::EnqueueJob;
use sluice_core::error::FailureCategory;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::ExecutionRequest;
use super::queue::{QueueError, RUN_JOB_TASK, TaskHandle, TaskMessage, TaskQueue};
use super::singleton::{LockError, SingletonLocks};
use super::store::{ResultStore, StoreError};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job class not found: {0}")]
    NotFound(String),

    #[error("invalid job data: {0}")]
    Validation(ValidationErrors),

    #[error("singleton job is already running ({0})")]
    AlreadyRunning(String),

    #[error("job {path} does not run on queue '{queue}'")]
    InvalidQueue { path: ClassPath, queue: String },

    #[error("job {path} is a {actual} job, expected {expected}")]
    WrongKind {
        path: ClassPath,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("button '{button}' does not apply to {model}")]
    ButtonNotApplicable { button: String, model: String },

    #[error("result {0} is not awaiting approval")]
    NotAwaitingApproval(Uuid),

    #[error("cannot encode job payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DispatchError {
    /// Failure category for errors that map onto the taxonomy
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            DispatchError::NotFound(_) => Some(FailureCategory::NotFound),
            DispatchError::Validation(_) | DispatchError::InvalidQueue { .. } => {
                Some(FailureCategory::ValidationFailed)
            }
            DispatchError::AlreadyRunning(_) => Some(FailureCategory::AlreadyRunning),
            _ => None,
        }
    }
}

/// Outcome of a successful enqueue
#[derive(Debug)]
pub enum Dispatched {
    Queued { result: JobResult, handle: TaskHandle },
    /// Stored but held back until someone approves it
    AwaitingApproval(JobResult),
}

impl Dispatched {
    pub fn result(&self) -> &JobResult {
        match self {
            Dispatched::Queued { result, .. } => result,
            Dispatched::AwaitingApproval(result) => result,
        }
    }

    pub fn into_result(self) -> JobResult {
        match self {
            Dispatched::Queued { result, .. } => result,
            Dispatched::AwaitingApproval(result) => result,
        }
    }
}

/// A result that passed every enqueue check, not yet stored
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub result: JobResult,
    /// Raw input, delivered to the worker even when `task_kwargs` is withheld
    pub data: Map<String, Value>,
    pub user: Option<RequestUser>,
    pub approval_required: bool,
    pub singleton_key: Option<String>,
}

/// Run every enqueue check without side effects
///
/// Shared by the in-process dispatcher and the orchestrator's HTTP service.
pub fn prepare(descriptor: &JobDescriptor, request: EnqueueJob) -> Result<PreparedJob, DispatchError> {
    let data = descriptor
        .validate_data(&request.data)
        .map_err(DispatchError::Validation)?;
    let meta = &descriptor.meta;

    let queue = request
        .task_queue
        .clone()
        .unwrap_or_else(|| meta.default_queue().to_string());
    if !meta.accepts_queue(&queue) {
        return Err(DispatchError::InvalidQueue {
            path: descriptor.class_path.clone(),
            queue,
        });
    }

    let mut result = JobResult::new(descriptor.class_path.clone(), descriptor.name.clone());
    result.user = request.user.as_ref().map(|u| u.username.clone());
    result.task_queue = queue;
    result.dryrun = request.dryrun.unwrap_or(meta.dryrun_default);
    if !meta.has_sensitive_variables {
        result.task_kwargs = Some(data.to_json());
    }

    Ok(PreparedJob {
        result,
        data: request.data,
        user: request.user,
        approval_required: meta.approval_required,
        singleton_key: descriptor.singleton_key(&data),
    })
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    store: Arc<dyn ResultStore>,
    locks: Arc<dyn SingletonLocks>,
    queue: Arc<dyn TaskQueue>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ResultStore>,
        locks: Arc<dyn SingletonLocks>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
            queue,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validate, store and queue one run of a job
    pub async fn enqueue(&self, path: &ClassPath, request: EnqueueJob) -> Result<Dispatched, DispatchError> {
        let class = self
            .registry
            .resolve(path)
            .map_err(|_| DispatchError::NotFound(path.to_string()))?;
        let prepared = prepare(class.descriptor(), request)?;

        // Early refusal only; the engine takes the lock at execution time
        if let Some(key) = &prepared.singleton_key {
            if self.locks.is_locked(key).await? {
                return Err(DispatchError::AlreadyRunning(key.clone()));
            }
        }

        self.store.create(&prepared.result).await?;
        if prepared.approval_required {
            info!(
                "Job result {} for {} awaits approval",
                prepared.result.id, prepared.result.class_path
            );
            return Ok(Dispatched::AwaitingApproval(prepared.result));
        }

        let result = prepared.result;
        let handle = self.send(&result, prepared.data, prepared.user).await?;
        Ok(Dispatched::Queued { result, handle })
    }

    /// Enqueue a receiver job, refusing classes of another kind
    pub async fn enqueue_kind(
        &self,
        path: &ClassPath,
        request: EnqueueJob,
        kind: JobKind,
    ) -> Result<Dispatched, DispatchError> {
        let class = self
            .registry
            .resolve(path)
            .map_err(|_| DispatchError::NotFound(path.to_string()))?;
        let actual = class.descriptor().kind;
        if actual != kind {
            return Err(DispatchError::WrongKind {
                path: path.clone(),
                expected: kind.as_str(),
                actual: actual.as_str(),
            });
        }
        self.enqueue(path, request).await
    }

    /// Queue a result that was held for approval
    ///
    /// The caller supplies the input again, since a result may not keep it.
    pub async fn release_approved(
        &self,
        result_id: Uuid,
        data: Map<String, Value>,
        user: Option<RequestUser>,
    ) -> Result<TaskHandle, DispatchError> {
        let result = self.store.get(result_id).await?;
        if result.status != JobStatus::Pending {
            return Err(DispatchError::NotAwaitingApproval(result_id));
        }
        self.send(&result, data, user).await
    }

    async fn send(
        &self,
        result: &JobResult,
        data: Map<String, Value>,
        user: Option<RequestUser>,
    ) -> Result<TaskHandle, DispatchError> {
        let request = ExecutionRequest {
            job_result_id: result.id,
            data,
            user,
        };
        let payload =
            serde_json::to_value(&request).map_err(|e| DispatchError::Payload(e.to_string()))?;

        debug!("Queueing {} on '{}'", result.id, result.task_queue);
        let handle = self
            .queue
            .enqueue(TaskMessage {
                task: RUN_JOB_TASK.to_string(),
                queue: result.task_queue.clone(),
                job_result_id: result.id,
                payload,
            })
            .await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::queue::{LocalTaskQueue, TaskHandler};
    use crate::engine::singleton::MemoryLocks;
    use crate::engine::store::MemoryResultStore;
    use crate::context::JobContext;
    use crate::job::{Job, JobClass, JobFailure, NativeJobClass};
    use async_trait::async_trait;
    use serde_json::json;
    use sluice_core::domain::job::JobMeta;
    use sluice_core::domain::variable::{JobData, VariableDefinition};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TaskMessage>>);

    #[async_trait]
    impl TaskHandler for Collect {
        async fn handle(&self, message: TaskMessage) -> Result<(), String> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        store: Arc<MemoryResultStore>,
        locks: Arc<MemoryLocks>,
    }

    fn fixture(classes: Vec<Arc<dyn JobClass>>) -> Fixture {
        let registry = Arc::new(Registry::default());
        for class in classes {
            registry.register(class).unwrap();
        }
        let store = Arc::new(MemoryResultStore::new());
        let locks = Arc::new(MemoryLocks::new());
        let queue = Arc::new(LocalTaskQueue::new(vec!["default".into(), "bulk".into()]));
        queue.register_task(RUN_JOB_TASK, Arc::new(Collect::default()));
        let dispatcher = Dispatcher::new(registry, store.clone(), locks.clone(), queue);
        Fixture {
            dispatcher,
            store,
            locks,
        }
    }

    fn with_meta(path: ClassPath, meta: JobMeta) -> Arc<dyn JobClass> {
        let name = path.class_name.clone();
        let descriptor = JobDescriptor::new(path, name)
            .with_variable("hostname", VariableDefinition::string().optional())
            .with_meta(meta);
        NativeJobClass::new(descriptor, || NoopJob).into_arc()
    }

    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        async fn run(&mut self, _ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
            Ok(None)
        }
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_stores_pending_result() {
        let path = ClassPath::local("m", "Job");
        let meta = JobMeta {
            has_sensitive_variables: false,
            ..JobMeta::default()
        };
        let f = fixture(vec![with_meta(path.clone(), meta)]);

        let request = EnqueueJob::new(data(json!({"hostname": "edge-01"})))
            .with_user(RequestUser::new("alice"));
        let dispatched = f.dispatcher.enqueue(&path, request).await.unwrap();
        assert!(matches!(dispatched, Dispatched::Queued { .. }));

        let stored = f.store.get(dispatched.result().id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.user.as_deref(), Some("alice"));
        assert_eq!(stored.task_queue, "default");
        assert_eq!(stored.task_kwargs, Some(json!({"hostname": "edge-01"})));
    }

    #[tokio::test]
    async fn test_sensitive_inputs_are_not_stored() {
        let path = ClassPath::local("m", "Job");
        let f = fixture(vec![with_meta(path.clone(), JobMeta::default())]);

        let dispatched = f
            .dispatcher
            .enqueue(&path, EnqueueJob::new(data(json!({"hostname": "x"}))))
            .await
            .unwrap();
        assert!(dispatched.result().task_kwargs.is_none());
    }

    #[tokio::test]
    async fn test_rejections_never_create_results() {
        let path = ClassPath::local("m", "Job");
        let f = fixture(vec![with_meta(path.clone(), JobMeta::default())]);

        let err = f
            .dispatcher
            .enqueue(&ClassPath::local("m", "Missing"), EnqueueJob::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), Some(FailureCategory::NotFound));

        let err = f
            .dispatcher
            .enqueue(&path, EnqueueJob::new(data(json!({"bogus": 1}))))
            .await
            .unwrap_err();
        assert_eq!(err.category(), Some(FailureCategory::ValidationFailed));

        let mut request = EnqueueJob::default();
        request.task_queue = Some("bulk".into());
        let err = f.dispatcher.enqueue(&path, request).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidQueue { .. }));

        assert!(f.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_singleton_precheck() {
        let path = ClassPath::local("m", "Single");
        let meta = JobMeta {
            is_singleton: true,
            ..JobMeta::default()
        };
        let f = fixture(vec![with_meta(path.clone(), meta)]);
        let key = format!("sluice:singleton:{}", path);
        assert!(f.locks.acquire(&key, "other", Duration::from_secs(60)).await.unwrap());

        let err = f.dispatcher.enqueue(&path, EnqueueJob::default()).await.unwrap_err();
        assert_eq!(err.category(), Some(FailureCategory::AlreadyRunning));
        assert!(f.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_approval_holds_back_and_release_queues() {
        let path = ClassPath::local("m", "Approve");
        let meta = JobMeta {
            approval_required: true,
            has_sensitive_variables: false,
            ..JobMeta::default()
        };
        let f = fixture(vec![with_meta(path.clone(), meta)]);

        let dispatched = f.dispatcher.enqueue(&path, EnqueueJob::default()).await.unwrap();
        let Dispatched::AwaitingApproval(result) = dispatched else {
            panic!("expected approval hold");
        };

        let handle = f
            .dispatcher
            .release_approved(result.id, Map::new(), None)
            .await
            .unwrap();
        assert_eq!(handle.job_result_id, result.id);
    }

    #[tokio::test]
    async fn test_enqueue_kind_checks_receiver_kind() {
        let path = ClassPath::local("m", "Job");
        let f = fixture(vec![with_meta(path.clone(), JobMeta::default())]);
        let err = f
            .dispatcher
            .enqueue_kind(&path, EnqueueJob::default(), JobKind::JobHookReceiver)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WrongKind { .. }));
    }
}
