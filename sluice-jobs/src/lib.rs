//! Sluice Jobs
//!
//! The job execution subsystem: the job contract, the class registry and its
//! sources, the Lua job adapter, the execution engine with its collaborators,
//! the logging bridge, and hook/button receivers.

pub mod builtin;
pub mod context;
pub mod engine;
pub mod job;
pub mod logging;
pub mod lua_job;
pub mod receivers;
pub mod registry;

pub use context::JobContext;
pub use engine::{Engine, EngineConfig, EngineError, ExecutionRequest};
pub use job::{Completion, Job, JobClass, JobFailure, NativeJobClass};
pub use registry::{DuplicatePolicy, Registry, RegistryError};
