//! Runtime modules for Lua jobs
//!
//! Each module is generic over a small trait so the worker can back it with
//! the running job's context while tests use in-memory doubles.

pub mod ctx;
pub mod data;
pub mod input;
pub mod log;

pub use ctx::{CtxModule, JobControl};
pub use data::{DataAccess, DataModule};
pub use input::{InputModule, InputProvider};
pub use log::{LogModule, LogSink, LuaLogRecord};
