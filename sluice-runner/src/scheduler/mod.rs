//! Scheduler layer for the worker
//!
//! Polls the orchestrator for pending results and hands claimed ones to the
//! engine. Background loops keep the worker's heartbeat fresh and its Git
//! job sources up to date.

pub mod git;
pub mod poller;

pub use git::GitRefresher;
pub use poller::JobPoller;
