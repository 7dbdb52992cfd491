//! Job execution engine
//!
//! `Engine::execute` takes one pending result through the whole job
//! lifecycle:
//!
//! ```text
//! resolve -> validate -> singleton lock -> Running
//!   before_start
//!   [transaction] run, checks... [commit | rollback]
//!   on_success | on_failure
//!   after_return
//! -> Completed | Failed | Errored, lock released, logs flushed
//! ```
//!
//! The singleton lock is renewed for as long as the job runs. Error messages
//! and tracebacks go through the same redactor as log entries before they are
//! recorded on the result.
//!
//! The soft time limit only raises a signal the job can observe; the hard
//! limit drops the body future.

pub mod dispatcher;
pub mod queue;
pub mod singleton;
pub mod store;
pub mod transaction;

pub use dispatcher::{DispatchError, Dispatched, Dispatcher, PreparedJob, prepare};
pub use queue::{LocalTaskQueue, QueueError, RUN_JOB_TASK, TaskHandle, TaskHandler, TaskMessage, TaskQueue};
pub use singleton::{LockError, LockKeeper, MemoryLocks, SingletonLocks, lock_owner, lock_ttl};
pub use store::{MemoryResultStore, ResultStore, StoreError};
pub use transaction::{
    DataHandle, DataStore, DataTransaction, MemoryDataStore, ScopeExit, TransactionScope,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_core::domain::job_result::{JobError, JobResult, JobStatus};
use sluice_core::domain::log::LogLevel;
use sluice_core::domain::user::RequestUser;
use sluice_core::domain::variable::{JobData, ValidationErrors};
use sluice_core::error::FailureCategory;
use sluice_lua::sandbox::TIME_LIMIT_EXCEEDED;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::job::{Completion, Job, JobClass, JobFailure, LifecycleState};
use crate::logging::{JobLogger, LogBuffer, Redactor};
use crate::registry::Registry;

/// Grouping of entries written before the job's own code runs
pub const INITIALIZATION_GROUPING: &str = "initialization";

/// Payload of a `sluice.run_job` task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_result_id: Uuid,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub user: Option<RequestUser>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recorded on every result this engine runs
    pub worker_id: String,
    /// How often buffered log entries are sent while a job runs
    pub flush_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: "local".to_string(),
            flush_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job result {id} is {status}, not pending")]
    NotPending { id: Uuid, status: JobStatus },

    #[error("job class not found: {0}")]
    NotFound(String),

    #[error("invalid job data: {0}")]
    Validation(ValidationErrors),

    #[error("singleton job is already running ({0})")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn ResultStore>,
    data: Arc<dyn DataStore>,
    locks: Arc<dyn SingletonLocks>,
    redactor: Arc<Redactor>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ResultStore>,
        data: Arc<dyn DataStore>,
        locks: Arc<dyn SingletonLocks>,
        redactor: Arc<Redactor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            data,
            locks,
            redactor,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run one pending result to a terminal state
    ///
    /// Failures of the job itself are recorded on the returned result. An
    /// `Err` means the job never started: unknown class, invalid data, a
    /// held singleton lock, or a store failure.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<JobResult, EngineError> {
        let mut result = self.store.get(request.job_result_id).await?;
        if result.status != JobStatus::Pending {
            return Err(EngineError::NotPending {
                id: result.id,
                status: result.status,
            });
        }

        let buffer = LogBuffer::new();
        let logger = JobLogger::new(result.id, buffer.clone(), self.redactor.clone());
        logger.set_grouping(INITIALIZATION_GROUPING);

        let class = match self.registry.resolve(&result.class_path) {
            Ok(class) => class,
            Err(e) => {
                let path = result.class_path.to_string();
                logger.failure(format!("Job class {} is not registered", path));
                let error = JobError::new(FailureCategory::NotFound, "JobNotFound", e.to_string());
                self.reject(&mut result, &buffer, JobStatus::Errored, error).await?;
                return Err(EngineError::NotFound(path));
            }
        };
        let descriptor = class.descriptor();

        let data = match descriptor.validate_data(&request.data) {
            Ok(data) => data,
            Err(errors) => {
                logger.failure(format!("Job data failed validation: {}", errors));
                let error = JobError::new(
                    FailureCategory::ValidationFailed,
                    "ValidationError",
                    errors.to_string(),
                );
                self.reject(&mut result, &buffer, JobStatus::Errored, error).await?;
                return Err(EngineError::Validation(errors));
            }
        };

        let owner = lock_owner(result.id);
        let lock = match descriptor.singleton_key(&data) {
            Some(key) => {
                let ttl = lock_ttl(descriptor.meta.time_limit);
                if !self.locks.acquire(&key, &owner, ttl).await? {
                    logger.failure("Job is already running");
                    let error = JobError::new(
                        FailureCategory::AlreadyRunning,
                        "AlreadyRunning",
                        format!("Singleton lock {} is held", key),
                    );
                    self.reject(&mut result, &buffer, JobStatus::Failed, error).await?;
                    return Err(EngineError::AlreadyRunning(key));
                }
                debug!("Acquired singleton lock {} for {}", key, result.id);
                let keeper = LockKeeper::spawn(self.locks.clone(), key.clone(), owner.clone(), ttl);
                Some((key, keeper))
            }
            None => None,
        };

        let executed = self
            .run_started(&mut result, class.as_ref(), data, request.user, &logger)
            .await;

        if let Some((key, keeper)) = lock {
            keeper.finish().await;
            if let Err(e) = self.locks.release(&key, &owner).await {
                warn!("Failed to release singleton lock {}: {}", key, e);
            }
        }
        executed
    }

    /// Record a result that never reached `Running`
    async fn reject(
        &self,
        result: &mut JobResult,
        buffer: &LogBuffer,
        status: JobStatus,
        error: JobError,
    ) -> Result<(), EngineError> {
        let error = self.redacted(error);
        warn!("Job result {} rejected: {}", result.id, error.message);
        result.fail_with(status, error).map_err(StoreError::from)?;
        if result.worker_id.is_none() {
            result.worker_id = Some(self.config.worker_id.clone());
        }
        let entries = buffer.drain();
        if !entries.is_empty() {
            self.store.append_logs(result.id, entries).await?;
        }
        self.store.save(result).await?;
        Ok(())
    }

    /// Scrub secrets from an error before it is stored
    fn redacted(&self, mut error: JobError) -> JobError {
        error.message = self.redactor.redact(&error.message).into_owned();
        error.traceback = error
            .traceback
            .map(|traceback| self.redactor.redact(&traceback).into_owned());
        error
    }

    async fn run_started(
        &self,
        result: &mut JobResult,
        class: &dyn JobClass,
        data: JobData,
        user: Option<RequestUser>,
        logger: &JobLogger,
    ) -> Result<JobResult, EngineError> {
        let buffer = logger.buffer().clone();
        let mut job = match class.instantiate() {
            Ok(job) => job,
            Err(failure) => {
                logger.failure(format!("Failed to instantiate job: {}", failure));
                let error = JobError::new(
                    FailureCategory::RuntimeFailure,
                    failure.exc_type,
                    failure.message,
                );
                self.reject(result, &buffer, JobStatus::Errored, error).await?;
                return Ok(result.clone());
            }
        };

        result.transition(JobStatus::Running).map_err(StoreError::from)?;
        if result.worker_id.is_none() {
            result.worker_id = Some(self.config.worker_id.clone());
        }
        self.store.save(result).await?;
        logger
            .entry(LogLevel::Info, format!("Running job {}", result.class_path))
            .skip_db()
            .emit();

        let ctx = JobContext::new(result.id, result.class_path.clone(), logger.clone())
            .with_user(user)
            .with_dryrun(result.dryrun)
            .with_inputs(data.clone());
        let flusher = LogFlusher::spawn(
            self.store.clone(),
            result.id,
            buffer.clone(),
            self.config.flush_interval,
        );

        let meta = &class.descriptor().meta;
        let body = run_body(job.as_mut(), &ctx, &data, self.data.as_ref());
        let completion = match with_time_limits(body, &ctx, meta.soft_time_limit, meta.time_limit).await {
            Some(completion) => completion,
            None => Completion::Raised(JobFailure::new(
                TIME_LIMIT_EXCEEDED,
                format!(
                    "Time limit of {}s exceeded",
                    meta.time_limit.unwrap_or_default()
                ),
            )),
        };

        let explicit = ctx.outcome().to_failure();
        let (status, failure) = match (&completion, explicit) {
            (Completion::Raised(failure), _) => {
                let category = if failure.exc_type == TIME_LIMIT_EXCEEDED {
                    FailureCategory::TimeLimitExceeded
                } else {
                    FailureCategory::RuntimeFailure
                };
                logger.failure(describe_failure(failure));
                (JobStatus::Errored, Some((category, failure.clone())))
            }
            (Completion::Returned(_), Some(failure)) => (
                JobStatus::Failed,
                Some((FailureCategory::ExplicitFailure, failure)),
            ),
            (Completion::Returned(_), None) => (JobStatus::Completed, None),
        };

        match &failure {
            None => {
                ctx.advance(LifecycleState::Succeeded);
                ctx.enter("on_success");
                let value = match &completion {
                    Completion::Returned(value) => value.as_ref(),
                    Completion::Raised(_) => None,
                };
                if let Err(e) = job.on_success(&ctx, value).await {
                    ctx.logger().error(format!("on_success raised {}", e));
                }
            }
            Some((_, failure)) => {
                ctx.advance(LifecycleState::Failed);
                ctx.enter("on_failure");
                if let Err(e) = job.on_failure(&ctx, failure).await {
                    ctx.logger().error(format!("on_failure raised {}", e));
                }
            }
        }

        ctx.enter("after_return");
        if let Err(e) = job.after_return(&ctx, status, &completion).await {
            ctx.logger().error(format!("after_return raised {}", e));
        }
        ctx.advance(LifecycleState::Finalized);

        if let Completion::Returned(value) = completion {
            result.return_value = value;
        }
        match failure {
            Some((category, failure)) => {
                let mut error = JobError::new(category, failure.exc_type, failure.message);
                error.traceback = failure.traceback;
                result.fail_with(status, self.redacted(error)).map_err(StoreError::from)?;
            }
            None => result.transition(status).map_err(StoreError::from)?,
        }

        flusher.finish().await;
        self.store.save(result).await?;
        info!(
            "Job result {} finished as {} in {}ms",
            result.id,
            result.status,
            result.duration().map(|d| d.num_milliseconds()).unwrap_or_default()
        );
        Ok(result.clone())
    }
}

/// `before_start`, then `run` and its checks inside one transaction
async fn run_body(
    job: &mut dyn Job,
    ctx: &JobContext,
    data: &JobData,
    store: &dyn DataStore,
) -> Completion {
    ctx.advance(LifecycleState::BeforeStart);
    ctx.enter("before_start");
    if let Err(failure) = job.before_start(ctx).await {
        return Completion::Raised(failure);
    }

    ctx.advance(LifecycleState::Running);
    let scope = match TransactionScope::open(store).await {
        Ok(scope) => scope,
        Err(e) => {
            return Completion::Raised(JobFailure::runtime(format!(
                "Failed to open data transaction: {}",
                e
            )));
        }
    };
    let scoped = ctx.with_data(scope.handle());

    scoped.enter("run");
    let value = match job.run(&scoped, data).await {
        Ok(value) => value,
        Err(failure) => return rolled_back(scope, failure).await,
    };
    for check in job.additional_checks() {
        scoped.enter(&check);
        if let Err(failure) = job.run_check(&scoped, &check).await {
            return rolled_back(scope, failure).await;
        }
    }

    let exit = if ctx.outcome().is_failed() {
        scope.rollback().await
    } else {
        scope.commit_unless(ctx.dryrun()).await
    };
    match exit {
        Ok(ScopeExit::RolledBack) if ctx.dryrun() => {
            ctx.logger().info("Dry run: database changes rolled back");
            Completion::Returned(value)
        }
        Ok(_) => Completion::Returned(value),
        Err(e) => Completion::Raised(JobFailure::runtime(format!(
            "Failed to commit data transaction: {}",
            e
        ))),
    }
}

async fn rolled_back(scope: TransactionScope, failure: JobFailure) -> Completion {
    if let Err(e) = scope.rollback().await {
        warn!("Rollback failed: {}", e);
    }
    Completion::Raised(failure)
}

/// `None` when the hard limit elapsed first
async fn with_time_limits<F>(
    body: F,
    ctx: &JobContext,
    soft: Option<u64>,
    hard: Option<u64>,
) -> Option<Completion>
where
    F: Future<Output = Completion>,
{
    tokio::pin!(body);
    let soft_timer = sleep_for(soft);
    let hard_timer = sleep_for(hard);
    tokio::pin!(soft_timer);
    tokio::pin!(hard_timer);
    let mut soft_fired = false;

    loop {
        tokio::select! {
            biased;
            completion = &mut body => return Some(completion),
            _ = &mut hard_timer => {
                warn!("Job result {} exceeded its time limit", ctx.job_result_id());
                return None;
            }
            _ = &mut soft_timer, if !soft_fired => {
                soft_fired = true;
                ctx.signal_soft_limit();
                ctx.logger().warning(format!(
                    "Soft time limit of {}s exceeded",
                    soft.unwrap_or_default()
                ));
            }
        }
    }
}

async fn sleep_for(seconds: Option<u64>) {
    match seconds {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => std::future::pending().await,
    }
}

fn describe_failure(failure: &JobFailure) -> String {
    match &failure.traceback {
        Some(traceback) => format!("{}: {}\n{}", failure.exc_type, failure.message, traceback),
        None => format!("{}: {}", failure.exc_type, failure.message),
    }
}

// =============================================================================
// Log flushing
// =============================================================================

/// Sends buffered entries to the result store on an interval
struct LogFlusher {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LogFlusher {
    fn spawn(store: Arc<dyn ResultStore>, id: Uuid, buffer: LogBuffer, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => flush(store.as_ref(), id, &buffer).await,
                }
            }
            flush(store.as_ref(), id, &buffer).await;
        });
        Self { stop, task }
    }

    /// Stop ticking and send whatever is left
    async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Log flusher stopped abnormally: {}", e);
        }
    }
}

async fn flush(store: &dyn ResultStore, id: Uuid, buffer: &LogBuffer) {
    let entries = buffer.drain();
    if entries.is_empty() {
        return;
    }
    let count = entries.len();
    if let Err(e) = store.append_logs(id, entries.clone()).await {
        warn!("Failed to send {} log entries for {}: {}", count, id, e);
        buffer.requeue(entries);
    }
}

#[async_trait]
impl TaskHandler for Engine {
    async fn handle(&self, message: TaskMessage) -> Result<(), String> {
        let request: ExecutionRequest = serde_json::from_value(message.payload)
            .map_err(|e| format!("invalid {} payload: {}", message.task, e))?;
        self.execute(request).await.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::job::NativeJobClass;
    use crate::lua_job::LuaJobClass;
    use serde_json::json;
    use sluice_core::domain::job::{ClassPath, JobDescriptor, JobMeta};
    use sluice_core::domain::log::LogEntry;
    use sluice_core::domain::variable::VariableDefinition;
    use sluice_lua::parse_job_module;
    use std::sync::Mutex;

    struct Harness {
        engine: Engine,
        store: Arc<MemoryResultStore>,
        data: MemoryDataStore,
        locks: Arc<MemoryLocks>,
    }

    impl Harness {
        fn new(classes: Vec<Arc<dyn JobClass>>) -> Self {
            let registry = Arc::new(Registry::default());
            for class in classes {
                registry.register(class).unwrap();
            }
            let store = Arc::new(MemoryResultStore::new());
            let data = MemoryDataStore::new();
            let locks = Arc::new(MemoryLocks::new());
            let engine = Engine::new(
                registry,
                store.clone(),
                Arc::new(data.clone()),
                locks.clone(),
                Arc::new(Redactor::with_defaults()),
                EngineConfig::default(),
            );
            Self {
                engine,
                store,
                data,
                locks,
            }
        }

        async fn pending(&self, path: &ClassPath, dryrun: bool) -> Uuid {
            let mut result = JobResult::new(path.clone(), path.class_name.clone());
            result.dryrun = dryrun;
            self.store.create(&result).await.unwrap();
            result.id
        }

        async fn run(&self, path: &ClassPath, data: Value) -> (Uuid, Result<JobResult, EngineError>) {
            self.run_with(path, data, false).await
        }

        async fn run_with(
            &self,
            path: &ClassPath,
            data: Value,
            dryrun: bool,
        ) -> (Uuid, Result<JobResult, EngineError>) {
            let id = self.pending(path, dryrun).await;
            let data = match data {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let outcome = self
                .engine
                .execute(ExecutionRequest {
                    job_result_id: id,
                    data,
                    user: None,
                })
                .await;
            (id, outcome)
        }

        async fn logs(&self, id: Uuid) -> Vec<LogEntry> {
            self.store.logs(id).await.unwrap()
        }
    }

    /// Records every lifecycle call; raises in the named method
    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
        raise_in: Option<&'static str>,
    }

    impl Recording {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn maybe_raise(&self, method: &str) -> Result<(), JobFailure> {
            if self.raise_in == Some(method) {
                return Err(JobFailure::runtime("kaput").with_traceback("at line 7"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Job for Recording {
        async fn before_start(&mut self, _ctx: &JobContext) -> Result<(), JobFailure> {
            self.record("before_start");
            self.maybe_raise("before_start")
        }

        async fn run(&mut self, _ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
            self.record("run");
            self.maybe_raise("run")?;
            Ok(Some(json!(42)))
        }

        fn additional_checks(&self) -> Vec<String> {
            vec!["check_inventory".to_string()]
        }

        async fn run_check(&mut self, _ctx: &JobContext, name: &str) -> Result<(), JobFailure> {
            self.record(name);
            self.maybe_raise(name)
        }

        async fn on_success(&mut self, _ctx: &JobContext, value: Option<&Value>) -> Result<(), JobFailure> {
            self.record(format!("on_success:{}", value.cloned().unwrap_or(Value::Null)));
            Ok(())
        }

        async fn on_failure(&mut self, _ctx: &JobContext, failure: &JobFailure) -> Result<(), JobFailure> {
            self.record(format!("on_failure:{}", failure.message));
            Ok(())
        }

        async fn after_return(
            &mut self,
            _ctx: &JobContext,
            status: JobStatus,
            _completion: &Completion,
        ) -> Result<(), JobFailure> {
            self.record(format!("after_return:{}", status));
            self.maybe_raise("after_return")
        }
    }

    fn recording(
        class_name: &str,
        raise_in: Option<&'static str>,
    ) -> (Arc<dyn JobClass>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let shared = calls.clone();
        let class = NativeJobClass::new(
            JobDescriptor::new(ClassPath::local("tests", class_name), class_name),
            move || Recording {
                calls: shared.clone(),
                raise_in,
            },
        )
        .into_arc();
        (class, calls)
    }

    #[tokio::test]
    async fn test_pass_job() {
        let h = Harness::new(vec![builtin::test_pass()]);
        let path = ClassPath::plugin("example_app", "TestPass");
        let (id, outcome) = h.run(&path, json!({})).await;

        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.return_value, Some(json!(true)));
        assert!(result.error.is_none());
        assert_eq!(result.worker_id.as_deref(), Some("local"));
        assert!(result.started_at.is_some() && result.completed_at.is_some());

        let logs = h.logs(id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[0].message, "Success");
        assert_eq!(logs[0].grouping, "run");
        assert_eq!(h.store.get(id).await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_fail_without_abort() {
        let h = Harness::new(vec![builtin::test_fail_without_abort()]);
        let path = ClassPath::plugin("example_app", "TestFailWithoutAbort");
        let (id, outcome) = h.run(&path, json!({})).await;

        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.error.as_ref().map(|e| e.category),
            Some(FailureCategory::ExplicitFailure)
        );

        let logs = h.logs(id).await;
        let levels: Vec<LogLevel> = logs.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Failure, LogLevel::Info, LogLevel::Info]);
        let seqs: Vec<u64> = logs.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_lifecycle_order_on_success() {
        let (class, calls) = recording("Recorded", None);
        let h = Harness::new(vec![class]);
        let (_, outcome) = h.run(&ClassPath::local("tests", "Recorded"), json!({})).await;

        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["before_start", "run", "check_inventory", "on_success:42", "after_return:completed"]
        );
    }

    #[tokio::test]
    async fn test_run_raising_runs_after_return_once() {
        let (class, calls) = recording("Raises", Some("run"));
        let h = Harness::new(vec![class]);
        let (id, outcome) = h.run(&ClassPath::local("tests", "Raises"), json!({})).await;

        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Errored);
        let error = result.error.unwrap();
        assert_eq!(error.category, FailureCategory::RuntimeFailure);
        assert_eq!(error.exc_type, "RuntimeError");
        assert_eq!(error.traceback.as_deref(), Some("at line 7"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["before_start", "run", "on_failure:kaput", "after_return:errored"]
        );

        let logs = h.logs(id).await;
        let failure = logs.iter().find(|e| e.level == LogLevel::Failure).unwrap();
        assert_eq!(failure.message, "RuntimeError: kaput\nat line 7");
        assert_eq!(failure.grouping, "run");
    }

    #[tokio::test]
    async fn test_before_start_raising_skips_run() {
        let (class, calls) = recording("EarlyFail", Some("before_start"));
        let h = Harness::new(vec![class]);
        let (_, outcome) = h.run(&ClassPath::local("tests", "EarlyFail"), json!({})).await;

        assert_eq!(outcome.unwrap().status, JobStatus::Errored);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["before_start", "on_failure:kaput", "after_return:errored"]
        );
    }

    #[tokio::test]
    async fn test_failing_check_errors_the_result() {
        let (class, calls) = recording("BadCheck", Some("check_inventory"));
        let h = Harness::new(vec![class]);
        let (id, outcome) = h.run(&ClassPath::local("tests", "BadCheck"), json!({})).await;

        assert_eq!(outcome.unwrap().status, JobStatus::Errored);
        assert_eq!(calls.lock().unwrap().len(), 5);
        let logs = h.logs(id).await;
        assert_eq!(logs[0].grouping, "check_inventory");
    }

    #[tokio::test]
    async fn test_after_return_error_keeps_status() {
        let (class, _) = recording("LateFail", Some("after_return"));
        let h = Harness::new(vec![class]);
        let (id, outcome) = h.run(&ClassPath::local("tests", "LateFail"), json!({})).await;

        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
        let logs = h.logs(id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(logs[0].grouping, "after_return");
    }

    #[tokio::test]
    async fn test_singleton_conflict() {
        let h = Harness::new(vec![builtin::singleton()]);
        let path = ClassPath::plugin("example_app", "ExampleSingletonJob");
        let key = format!("sluice:singleton:{}[device=\"edge-01\"]", path);
        assert!(h.locks.acquire(&key, "elsewhere", Duration::from_secs(60)).await.unwrap());

        let (id, outcome) = h.run(&path, json!({"device": "edge-01"})).await;
        assert!(matches!(outcome, Err(EngineError::AlreadyRunning(_))));

        let stored = h.store.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.started_at.is_none());
        assert_eq!(
            stored.error.map(|e| e.category),
            Some(FailureCategory::AlreadyRunning)
        );

        // Another key is free, and its lock is gone once the run ends
        let (_, outcome) = h.run(&path, json!({"device": "edge-02"})).await;
        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
        let other = format!("sluice:singleton:{}[device=\"edge-02\"]", path);
        assert!(!h.locks.is_locked(&other).await.unwrap());
        assert!(h.locks.is_locked(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_dryrun_rolls_back() {
        let h = Harness::new(vec![builtin::dry_run()]);
        let path = ClassPath::plugin("example_app", "ExampleDryRunJob");

        let (id, outcome) = h.run_with(&path, json!({"hostname": "edge-01"}), true).await;
        assert_eq!(outcome.unwrap().status, JobStatus::Completed);
        assert!(h.data.snapshot().is_empty());
        let logs = h.logs(id).await;
        assert_eq!(logs.last().unwrap().message, "Dry run: database changes rolled back");

        let (_, outcome) = h.run_with(&path, json!({"hostname": "edge-01"}), false).await;
        assert_eq!(outcome.unwrap().return_value, Some(json!("devices/edge-01")));
        assert_eq!(
            h.data.snapshot().get("devices/edge-01"),
            Some(&json!({"hostname": "edge-01", "status": "active"}))
        );
    }

    #[tokio::test]
    async fn test_explicit_failure_rolls_back() {
        struct WriteThenFail;

        #[async_trait]
        impl Job for WriteThenFail {
            async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
                ctx.data()?.put("k", json!(1)).await?;
                ctx.fail("nope");
                Ok(None)
            }
        }

        let class = NativeJobClass::new(
            JobDescriptor::new(ClassPath::local("tests", "WriteThenFail"), "WriteThenFail"),
            || WriteThenFail,
        )
        .into_arc();
        let h = Harness::new(vec![class]);
        let (_, outcome) = h.run(&ClassPath::local("tests", "WriteThenFail"), json!({})).await;
        assert_eq!(outcome.unwrap().status, JobStatus::Failed);
        assert!(h.data.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_time_limit() {
        let h = Harness::new(vec![builtin::soft_time_limit()]);
        let path = ClassPath::plugin("example_app", "ExampleSoftTimeLimitJob");
        let (id, outcome) = h.run(&path, json!({})).await;

        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.return_value, Some(json!("cleaned up")));

        let warnings: Vec<String> = h
            .logs(id)
            .await
            .into_iter()
            .filter(|e| e.level == LogLevel::Warning)
            .map(|e| e.message)
            .collect();
        assert_eq!(
            warnings,
            vec![
                "Soft time limit of 1s exceeded",
                "Soft time limit reached, cleaning up"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_time_limit() {
        struct Sleeper(Arc<Mutex<Vec<String>>>);

        #[async_trait]
        impl Job for Sleeper {
            async fn run(&mut self, _ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                self.0.lock().unwrap().push("woke".into());
                Ok(None)
            }

            async fn after_return(
                &mut self,
                _ctx: &JobContext,
                status: JobStatus,
                _completion: &Completion,
            ) -> Result<(), JobFailure> {
                self.0.lock().unwrap().push(format!("after_return:{}", status));
                Ok(())
            }
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        let shared = calls.clone();
        let meta = JobMeta {
            time_limit: Some(2),
            ..JobMeta::default()
        };
        let class = NativeJobClass::new(
            JobDescriptor::new(ClassPath::local("tests", "Sleeper"), "Sleeper").with_meta(meta),
            move || Sleeper(shared.clone()),
        )
        .into_arc();
        let h = Harness::new(vec![class]);
        let (_, outcome) = h.run(&ClassPath::local("tests", "Sleeper"), json!({})).await;

        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Errored);
        let error = result.error.unwrap();
        assert_eq!(error.category, FailureCategory::TimeLimitExceeded);
        assert_eq!(error.message, "Time limit of 2s exceeded");
        assert_eq!(*calls.lock().unwrap(), vec!["after_return:errored"]);
    }

    #[tokio::test]
    async fn test_unknown_class_errors_result() {
        let h = Harness::new(vec![]);
        let (id, outcome) = h.run(&ClassPath::local("tests", "Gone"), json!({})).await;
        assert!(matches!(outcome, Err(EngineError::NotFound(_))));

        let stored = h.store.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Errored);
        assert_eq!(stored.error.map(|e| e.category), Some(FailureCategory::NotFound));
        let logs = h.logs(id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].grouping, INITIALIZATION_GROUPING);
    }

    #[tokio::test]
    async fn test_invalid_data_errors_result() {
        let (class, calls) = recording("Typed", None);
        let descriptor = class
            .descriptor()
            .clone()
            .with_variable("count", VariableDefinition::integer());
        let shared = calls.clone();
        let typed = NativeJobClass::new(descriptor, move || Recording {
            calls: shared.clone(),
            raise_in: None,
        })
        .into_arc();
        let h = Harness::new(vec![typed]);

        let (id, outcome) = h.run(&ClassPath::local("tests", "Typed"), json!({"count": "many"})).await;
        assert!(matches!(outcome, Err(EngineError::Validation(_))));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(
            h.store.get(id).await.unwrap().error.map(|e| e.category),
            Some(FailureCategory::ValidationFailed)
        );
    }

    #[tokio::test]
    async fn test_result_runs_once() {
        let h = Harness::new(vec![builtin::test_pass()]);
        let path = ClassPath::plugin("example_app", "TestPass");
        let (id, outcome) = h.run(&path, json!({})).await;
        outcome.unwrap();

        let again = h
            .engine
            .execute(ExecutionRequest {
                job_result_id: id,
                data: Map::new(),
                user: None,
            })
            .await;
        assert!(matches!(again, Err(EngineError::NotPending { .. })));
    }

    #[tokio::test]
    async fn test_redaction_before_persistence() {
        struct Leaky;

        #[async_trait]
        impl Job for Leaky {
            async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
                ctx.logger().info("connecting with password=hunter2");
                Ok(None)
            }
        }

        let class = NativeJobClass::new(
            JobDescriptor::new(ClassPath::local("tests", "Leaky"), "Leaky"),
            || Leaky,
        )
        .into_arc();
        let h = Harness::new(vec![class]);
        let (id, _) = h.run(&ClassPath::local("tests", "Leaky"), json!({})).await;
        let logs = h.logs(id).await;
        assert!(!logs[0].message.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_error_redacted_before_persistence() {
        struct LeakyFailure {
            explicit: bool,
        }

        #[async_trait]
        impl Job for LeakyFailure {
            async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
                if self.explicit {
                    ctx.fail("login rejected, token=abc123");
                    return Ok(None);
                }
                Err(JobFailure::runtime("login failed with password=hunter2")
                    .with_traceback("connect(password=hunter2)"))
            }
        }

        let raised = ClassPath::local("tests", "LeakyRaise");
        let explicit = ClassPath::local("tests", "LeakyFail");
        let h = Harness::new(vec![
            NativeJobClass::new(JobDescriptor::new(raised.clone(), "LeakyRaise"), || {
                LeakyFailure { explicit: false }
            })
            .into_arc(),
            NativeJobClass::new(JobDescriptor::new(explicit.clone(), "LeakyFail"), || {
                LeakyFailure { explicit: true }
            })
            .into_arc(),
        ]);

        let (id, _) = h.run(&raised, json!({})).await;
        let error = h.store.get(id).await.unwrap().error.unwrap();
        assert_eq!(error.message, "login failed with password=[REDACTED]");
        assert_eq!(error.traceback.as_deref(), Some("connect(password=[REDACTED])"));

        let (id, _) = h.run(&explicit, json!({})).await;
        let stored = h.store.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let error = stored.error.unwrap();
        assert!(!error.message.contains("abc123"));
        assert!(error.message.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_rejection_error_redacted() {
        let h = Harness::new(vec![builtin::singleton()]);
        let path = ClassPath::plugin("example_app", "ExampleSingletonJob");
        let key = format!("sluice:singleton:{}[device=\"secret=s3cr3t\"]", path);
        assert!(h.locks.acquire(&key, "elsewhere", Duration::from_secs(60)).await.unwrap());

        let (id, outcome) = h.run(&path, json!({"device": "secret=s3cr3t"})).await;
        assert!(matches!(outcome, Err(EngineError::AlreadyRunning(_))));
        let error = h.store.get(id).await.unwrap().error.unwrap();
        assert!(!error.message.contains("s3cr3t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_singleton_lock_renewed_while_running() {
        struct LongHaul;

        #[async_trait]
        impl Job for LongHaul {
            async fn run(&mut self, _ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
                tokio::time::sleep(Duration::from_secs(3 * 60 * 60)).await;
                Ok(None)
            }
        }

        let path = ClassPath::local("tests", "LongHaul");
        let meta = JobMeta {
            is_singleton: true,
            ..JobMeta::default()
        };
        let class = NativeJobClass::new(
            JobDescriptor::new(path.clone(), "LongHaul").with_meta(meta),
            || LongHaul,
        )
        .into_arc();
        let h = Harness::new(vec![class]);
        let key = format!("sluice:singleton:{}", path);

        // The second run starts well past the default lock TTL
        let first = h.run(&path, json!({}));
        let second = async {
            tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
            h.run(&path, json!({})).await
        };
        let ((_, first), (_, second)) = tokio::join!(first, second);

        assert!(matches!(second, Err(EngineError::AlreadyRunning(_))));
        assert_eq!(first.unwrap().status, JobStatus::Completed);
        assert!(!h.locks.is_locked(&key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lua_job_hard_limit_stops_vm() {
        let source = r#"
            local Spin = job.define {
                name = "Spin",
                meta = { time_limit = 1 },
                run = function(self)
                    log.info("spinning")
                    while true do end
                end,
                after_return = function(self, status)
                    log.info("after_return " .. status)
                end,
            }
            return { Spin = Spin }
        "#;
        let spec = parse_job_module(source).unwrap().remove(0);
        let path = ClassPath::local("spin", "Spin");
        let class: Arc<dyn JobClass> =
            Arc::new(LuaJobClass::new(&spec, path.clone(), Arc::from(source)));
        let h = Harness::new(vec![class]);

        let (id, outcome) = h.run(&path, json!({})).await;
        let result = outcome.unwrap();
        assert_eq!(result.status, JobStatus::Errored);
        assert_eq!(
            result.error.map(|e| e.category),
            Some(FailureCategory::TimeLimitExceeded)
        );

        let messages: Vec<String> = h.logs(id).await.into_iter().map(|e| e.message).collect();
        assert_eq!(messages.first().map(String::as_str), Some("spinning"));
        assert_eq!(messages.last().map(String::as_str), Some("after_return errored"));
    }

    #[tokio::test]
    async fn test_engine_as_task_handler() {
        let h = Harness::new(vec![builtin::test_pass()]);
        let path = ClassPath::plugin("example_app", "TestPass");
        let id = h.pending(&path, false).await;
        let payload = serde_json::to_value(ExecutionRequest {
            job_result_id: id,
            data: Map::new(),
            user: None,
        })
        .unwrap();

        h.engine
            .handle(TaskMessage {
                task: RUN_JOB_TASK.to_string(),
                queue: "default".to_string(),
                job_result_id: id,
                payload,
            })
            .await
            .unwrap();
        assert_eq!(h.store.get(id).await.unwrap().status, JobStatus::Completed);

        let bad = TaskMessage {
            task: RUN_JOB_TASK.to_string(),
            queue: "default".to_string(),
            job_result_id: id,
            payload: json!({"nope": true}),
        };
        assert!(h.engine.handle(bad).await.is_err());
    }
}
