//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod git;
pub mod hook;
pub mod job;
pub mod job_result;
pub mod lock;
pub mod log;
pub mod sweep;
pub mod worker;

// Re-export for convenience
pub use git as git_service;
pub use hook as hook_service;
pub use job as job_service;
pub use job_result as result_service;
pub use lock as lock_service;
pub use log as log_service;
pub use worker as worker_service;
