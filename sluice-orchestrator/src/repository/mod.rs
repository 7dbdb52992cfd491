//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod backend;
pub mod hook;
pub mod job_payload;
pub mod job_result;
pub mod lock;
pub mod log;
pub mod worker;

// Re-export for convenience
pub use hook as hook_repository;
pub use job_payload as payload_repository;
pub use job_result as result_repository;
pub use lock as lock_repository;
pub use log as log_repository;
pub use worker as worker_repository;
