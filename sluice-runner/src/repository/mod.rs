//! Repository layer
//!
//! Backends the engine runs against inside a worker process. Results, logs
//! and singleton locks live in the orchestrator and are reached over HTTP;
//! job data goes to Postgres when configured.

mod data;
mod locks;
mod results;

pub use data::PgDataStore;
pub use locks::HttpLocks;
pub use results::HttpResultStore;
