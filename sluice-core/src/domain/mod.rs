//! Core domain types
//!
//! Shared between the orchestrator (persistence, dispatch) and the workers
//! (execution). Nothing here performs I/O.

pub mod change;
pub mod hook;
pub mod job;
pub mod job_result;
pub mod log;
pub mod user;
pub mod variable;
pub mod worker;
