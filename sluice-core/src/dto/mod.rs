//! Data Transfer Objects for inter-service communication
//!
//! Request and response bodies exchanged between the orchestrator, the
//! workers and front ends.

pub mod git;
pub mod hook;
pub mod job;
pub mod lock;
pub mod log;
pub mod worker;
