//! Sluice Lua Infrastructure
//!
//! Lua is how job classes are loaded at runtime from local directories and
//! Git repositories. This crate provides:
//! - Module trait and registry for Lua modules
//! - The sandbox, with the `job` authoring module and time limit hook
//! - Runtime modules (log, input, ctx, data)
//! - Job module parsing and live class definitions

pub mod convert;
pub mod definition;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use definition::{ClassDefinition, LuaFailure};
pub use module::{ModuleMetadata, ModuleRegistry, SluiceModule};
pub use modules::{
    CtxModule, DataAccess, DataModule, InputModule, InputProvider, JobControl, LogModule, LogSink,
    LuaLogRecord,
};
pub use parser::{LuaClassSpec, parse_job_module};
pub use sandbox::{LimitFlags, create_sandbox, install_time_limits, job_module_stubs};
