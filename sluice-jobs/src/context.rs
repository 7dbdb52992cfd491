//! Per-execution context handed to every lifecycle method
//!
//! Cloning is cheap and clones share state: the logger buffer, the outcome,
//! the lifecycle position and the soft limit flag.

use sluice_core::domain::job::ClassPath;
use sluice_core::domain::user::RequestUser;
use sluice_core::domain::variable::JobData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::engine::transaction::DataHandle;
use crate::job::{JOB_FAILED, JobFailure, LifecycleState};
use crate::logging::JobLogger;

/// Error type name of the soft time limit condition
pub const SOFT_TIME_LIMIT_EXCEEDED: &str = "SoftTimeLimitExceeded";

/// Failure state accumulated through explicit `fail` calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    failed: bool,
    failure_message: Option<String>,
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// First message passed to `fail`
    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    pub fn to_failure(&self) -> Option<JobFailure> {
        self.failed.then(|| {
            JobFailure::new(
                JOB_FAILED,
                self.failure_message
                    .clone()
                    .unwrap_or_else(|| "Job reported failure".to_string()),
            )
        })
    }
}

#[derive(Clone)]
pub struct JobContext {
    job_result_id: Uuid,
    class_path: ClassPath,
    logger: JobLogger,
    user: Option<RequestUser>,
    dryrun: bool,
    inputs: Arc<JobData>,
    data: Option<DataHandle>,
    outcome: Arc<Mutex<Outcome>>,
    lifecycle: Arc<Mutex<LifecycleState>>,
    soft_limit: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(job_result_id: Uuid, class_path: ClassPath, logger: JobLogger) -> Self {
        Self {
            job_result_id,
            class_path,
            logger,
            user: None,
            dryrun: false,
            inputs: Arc::new(JobData::new()),
            data: None,
            outcome: Arc::new(Mutex::new(Outcome::default())),
            lifecycle: Arc::new(Mutex::new(LifecycleState::NotStarted)),
            soft_limit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_user(mut self, user: Option<RequestUser>) -> Self {
        self.user = user;
        self
    }

    pub fn with_dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = dryrun;
        self
    }

    pub fn with_inputs(mut self, inputs: JobData) -> Self {
        self.inputs = Arc::new(inputs);
        self
    }

    /// Clone of this context with a data transaction attached
    pub(crate) fn with_data(&self, handle: DataHandle) -> Self {
        let mut ctx = self.clone();
        ctx.data = Some(handle);
        ctx
    }

    pub fn job_result_id(&self) -> Uuid {
        self.job_result_id
    }

    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn user(&self) -> Option<&RequestUser> {
        self.user.as_ref()
    }

    pub fn dryrun(&self) -> bool {
        self.dryrun
    }

    /// Validated inputs of this execution
    pub fn inputs(&self) -> &JobData {
        &self.inputs
    }

    /// The open data transaction; only available in `run` and checks
    pub fn data(&self) -> Result<&DataHandle, JobFailure> {
        self.data
            .as_ref()
            .ok_or_else(|| JobFailure::runtime("No data transaction is open outside run()"))
    }

    /// Mark the run failed without interrupting it
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.logger.failure(message.clone());

        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        outcome.failed = true;
        outcome.failure_message.get_or_insert(message);
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn soft_limit_reached(&self) -> bool {
        self.soft_limit.load(Ordering::SeqCst)
    }

    /// `Err(SoftTimeLimitExceeded)` once the soft limit has elapsed
    ///
    /// Long running native jobs call this between units of work and may
    /// catch the error to clean up.
    pub fn check_soft_limit(&self) -> Result<(), JobFailure> {
        if self.soft_limit_reached() {
            Err(JobFailure::new(
                SOFT_TIME_LIMIT_EXCEEDED,
                "Soft time limit exceeded",
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn soft_limit_flag(&self) -> Arc<AtomicBool> {
        self.soft_limit.clone()
    }

    pub(crate) fn signal_soft_limit(&self) {
        self.soft_limit.store(true, Ordering::SeqCst);
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the lifecycle; out of order moves are ignored
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let mut state = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if state.can_advance_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Enter a lifecycle method: entries default to its name as grouping
    pub(crate) fn enter(&self, method: &str) {
        self.logger.set_grouping(method);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logging::{LogBuffer, Redactor};
    use sluice_core::domain::log::LogLevel;

    pub(crate) fn test_context() -> JobContext {
        let id = Uuid::new_v4();
        let logger = JobLogger::new(id, LogBuffer::new(), Arc::new(Redactor::disabled()));
        JobContext::new(id, ClassPath::local("tests", "Job"), logger)
    }

    #[test]
    fn test_fail_logs_and_keeps_first_message() {
        let ctx = test_context();
        assert!(!ctx.outcome().is_failed());
        assert!(ctx.outcome().to_failure().is_none());

        ctx.fail("first");
        ctx.fail("second");

        let outcome = ctx.outcome();
        assert!(outcome.is_failed());
        assert_eq!(outcome.failure_message(), Some("first"));
        assert_eq!(outcome.to_failure().unwrap().exc_type, JOB_FAILED);

        let entries = ctx.logger().buffer().drain();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.level == LogLevel::Failure));
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = test_context();
        let clone = ctx.clone();
        clone.fail("from clone");
        clone.signal_soft_limit();

        assert!(ctx.outcome().is_failed());
        assert!(ctx.soft_limit_reached());
        assert_eq!(
            ctx.check_soft_limit().unwrap_err().exc_type,
            SOFT_TIME_LIMIT_EXCEEDED
        );
    }

    #[test]
    fn test_lifecycle_advance() {
        let ctx = test_context();
        assert_eq!(ctx.lifecycle(), LifecycleState::NotStarted);
        assert!(!ctx.advance(LifecycleState::Running));
        assert!(ctx.advance(LifecycleState::BeforeStart));
        assert!(ctx.advance(LifecycleState::Running));
        assert_eq!(ctx.lifecycle(), LifecycleState::Running);
    }

    #[test]
    fn test_data_unavailable_outside_scope() {
        let ctx = test_context();
        assert!(ctx.data().is_err());
    }
}
