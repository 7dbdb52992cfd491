//! The job contract
//!
//! A `JobClass` is what the registry stores: an introspectable descriptor
//! plus a way to make fresh instances. A `Job` is one instance, driven
//! through its lifecycle by the engine:
//!
//! ```text
//! before_start -> run -> checks... -> on_success | on_failure -> after_return
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sluice_core::domain::job::JobDescriptor;
use sluice_core::domain::job_result::JobStatus;
use sluice_core::domain::variable::JobData;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::context::JobContext;
use crate::engine::store::StoreError;

/// Error type name used when job code raises without naming a type
pub const RUNTIME_ERROR: &str = "RuntimeError";

/// Error type name handed to `on_failure` after an explicit `ctx.fail`
pub const JOB_FAILED: &str = "JobFailed";

/// An error raised by job code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{exc_type}: {message}")]
pub struct JobFailure {
    pub exc_type: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl JobFailure {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RUNTIME_ERROR, message)
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        let chain: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        let failure = JobFailure::runtime(err.to_string());
        if chain.is_empty() {
            failure
        } else {
            failure.with_traceback(format!("caused by: {}", chain.join("\ncaused by: ")))
        }
    }
}

impl From<StoreError> for JobFailure {
    fn from(err: StoreError) -> Self {
        JobFailure::new("DataError", err.to_string())
    }
}

/// How the body of a run ended, as seen by `after_return`
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Returned(Option<Value>),
    Raised(JobFailure),
}

/// Lifecycle position of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    BeforeStart,
    Running,
    Succeeded,
    Failed,
    Finalized,
}

impl LifecycleState {
    pub fn can_advance_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (NotStarted, BeforeStart)
                | (BeforeStart, Running)
                | (BeforeStart, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Finalized)
                | (Failed, Finalized)
        )
    }
}

/// One job instance
///
/// Only `run` is mandatory. Every hook receives the execution context, whose
/// logger groups entries under the hook currently running.
#[async_trait]
pub trait Job: Send {
    async fn before_start(&mut self, _ctx: &JobContext) -> Result<(), JobFailure> {
        Ok(())
    }

    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure>;

    /// Names of checks run after `run`, inside the same transaction
    fn additional_checks(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run_check(&mut self, _ctx: &JobContext, name: &str) -> Result<(), JobFailure> {
        Err(JobFailure::runtime(format!("Unknown check '{}'", name)))
    }

    async fn on_success(&mut self, _ctx: &JobContext, _value: Option<&Value>) -> Result<(), JobFailure> {
        Ok(())
    }

    async fn on_failure(&mut self, _ctx: &JobContext, _failure: &JobFailure) -> Result<(), JobFailure> {
        Ok(())
    }

    async fn after_return(
        &mut self,
        _ctx: &JobContext,
        _status: JobStatus,
        _completion: &Completion,
    ) -> Result<(), JobFailure> {
        Ok(())
    }
}

/// A registered job class
pub trait JobClass: Send + Sync {
    fn descriptor(&self) -> &JobDescriptor;

    fn instantiate(&self) -> Result<Box<dyn Job>, JobFailure>;
}

type JobFactory = dyn Fn() -> Box<dyn Job> + Send + Sync;

/// A job class compiled into the worker
pub struct NativeJobClass {
    descriptor: JobDescriptor,
    factory: Box<JobFactory>,
}

impl NativeJobClass {
    pub fn new<F, J>(descriptor: JobDescriptor, factory: F) -> Self
    where
        F: Fn() -> J + Send + Sync + 'static,
        J: Job + 'static,
    {
        Self {
            descriptor,
            factory: Box::new(move || Box::new(factory())),
        }
    }

    pub fn into_arc(self) -> Arc<dyn JobClass> {
        Arc::new(self)
    }
}

impl JobClass for NativeJobClass {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn instantiate(&self) -> Result<Box<dyn Job>, JobFailure> {
        Ok((self.factory)())
    }
}

impl fmt::Debug for NativeJobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeJobClass")
            .field("class_path", &self.descriptor.class_path)
            .finish()
    }
}
