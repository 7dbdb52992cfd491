//! Logging module for Sluice Lua jobs
//!
//! This module provides a trait-based abstraction for logging that allows
//! different components to provide their own implementations:
//! - Workers: the job logger of the running execution
//! - Tests: an in-memory sink
//!
//! Every level takes an optional options table:
//! `log.success("Backed up", { object = { model = "dcim.device", id = 7 }, grouping = "backup", skip_db = false })`

use crate::module::{ModuleMetadata, SluiceModule};
use mlua::prelude::*;
use sluice_core::domain::log::{LogLevel, ObjectRef};

/// A log call made by job code
#[derive(Debug, Clone, PartialEq)]
pub struct LuaLogRecord {
    pub level: LogLevel,
    pub message: String,
    pub object: Option<ObjectRef>,
    /// Overrides the current lifecycle grouping
    pub grouping: Option<String>,
    /// Process log only, never persisted
    pub skip_db: bool,
}

/// Trait for log sinks
///
/// Implement this trait to provide custom logging behavior.
/// The LogModule is generic over this trait, allowing different
/// components to provide their own implementations.
pub trait LogSink: Send + Sync {
    fn write(&mut self, record: LuaLogRecord);
}

/// Logging module for Sluice Lua jobs
pub struct LogModule<S: LogSink> {
    sink: std::sync::Arc<std::sync::Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: std::sync::Arc::new(std::sync::Mutex::new(sink)),
        }
    }
}

const LEVELS: [LogLevel; 7] = [
    LogLevel::Debug,
    LogLevel::Info,
    LogLevel::Success,
    LogLevel::Warning,
    LogLevel::Failure,
    LogLevel::Error,
    LogLevel::Critical,
];

impl<S: LogSink + 'static> SluiceModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for level in LEVELS {
            let sink = self.sink.clone();
            log_table.set(
                level.as_str(),
                lua.create_function(move |_, (msg, opts): (String, Option<LuaTable>)| {
                    let mut record = LuaLogRecord {
                        level,
                        message: msg,
                        object: None,
                        grouping: None,
                        skip_db: false,
                    };
                    if let Some(opts) = opts {
                        apply_options(&mut record, &opts)?;
                    }
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                        .write(record);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        let mut stubs = String::from(
            r#"---@meta

---Job logging module
---@class log
log = {}

---@class LogOptions
---@field object? {model: string, id: string|integer, display?: string} Object the entry refers to
---@field grouping? string Grouping label, defaults to the current lifecycle method
---@field skip_db? boolean Only write to the worker's process log
"#,
        );
        for level in LEVELS {
            stubs.push_str(&format!(
                "\n---Log a {} message\n---@param msg string\n---@param opts? LogOptions\nfunction log.{}(msg, opts) end\n",
                level, level
            ));
        }
        stubs
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Structured job logging",
            author: "Sluice",
        }
    }
}

fn apply_options(record: &mut LuaLogRecord, opts: &LuaTable) -> LuaResult<()> {
    record.grouping = opts.get("grouping")?;
    record.skip_db = opts.get::<Option<bool>>("skip_db")?.unwrap_or(false);

    if let Some(object) = opts.get::<Option<LuaTable>>("object")? {
        let model: String = object.get("model")?;
        // ids may be integers or strings on the Lua side
        let id: String = match object.get::<LuaValue>("id")? {
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::String(s) => s.to_str()?.to_string(),
            other => {
                return Err(LuaError::RuntimeError(format!(
                    "object id must be a string or integer, got {}",
                    other.type_name()
                )));
            }
        };
        let mut obj = ObjectRef::new(model, id);
        obj.display = object.get("display")?;
        record.object = Some(obj);
    }
    Ok(())
}
