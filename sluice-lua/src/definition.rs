//! Job class definition for runtime execution
//!
//! Unlike `LuaClassSpec` (which is plain data), a `ClassDefinition` holds the
//! live class table of an evaluated module and is used to call lifecycle
//! functions. It is bound to the sandbox it was loaded into.

use anyhow::{Context, Result, anyhow};
use mlua::{Function, Lua, MultiValue, Table, Value};

use crate::convert::{json_to_lua, lua_to_json};
use crate::sandbox::{SOFT_TIME_LIMIT_EXCEEDED, TIME_LIMIT_EXCEEDED};

/// A class table loaded into an execution sandbox
pub struct ClassDefinition {
    class_name: String,
    class: Table,
}

impl ClassDefinition {
    /// Evaluate `source` in `lua` and pick the class named `class_name`
    ///
    /// `lua` must already have its runtime modules registered, since module
    /// level code may reference them.
    pub fn load(lua: &Lua, source: &str, class_name: &str) -> Result<Self> {
        let module: Table = lua
            .load(source)
            .eval()
            .context("Failed to evaluate job module")?;

        let class: Table = match module.get::<Value>(class_name)? {
            Value::Table(class) => class,
            Value::Nil => return Err(anyhow!("Module does not define class '{}'", class_name)),
            _ => return Err(anyhow!("Class '{}' must be a table", class_name)),
        };

        Ok(Self {
            class_name: class_name.to_string(),
            class,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn has(&self, function: &str) -> bool {
        matches!(self.class.get::<Value>(function), Ok(Value::Function(_)))
    }

    /// Call `function` as a method of the class with JSON arguments
    ///
    /// A missing optional function is a no-op returning `null`.
    pub fn call(
        &self,
        lua: &Lua,
        function: &str,
        args: &[serde_json::Value],
    ) -> mlua::Result<serde_json::Value> {
        let f: Function = match self.class.get::<Value>(function)? {
            Value::Function(f) => f,
            _ => return Ok(serde_json::Value::Null),
        };

        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(Value::Table(self.class.clone()));
        for arg in args {
            values.push(json_to_lua(lua, arg)?);
        }

        let returned: Value = f.call(MultiValue::from_iter(values))?;
        lua_to_json(lua, returned)
    }
}

/// A Lua error split into the parts recorded on a failed result
#[derive(Debug, Clone, PartialEq)]
pub struct LuaFailure {
    pub exc_type: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl LuaFailure {
    pub fn is_time_limit(&self) -> bool {
        self.exc_type == TIME_LIMIT_EXCEEDED
    }
}

impl From<&mlua::Error> for LuaFailure {
    fn from(err: &mlua::Error) -> Self {
        let text = err.to_string();
        let (message, traceback) = match text.split_once("\nstack traceback:") {
            Some((message, trace)) => (
                message.to_string(),
                Some(format!("stack traceback:{}", trace)),
            ),
            None => (text, None),
        };
        let message = message
            .strip_prefix("runtime error: ")
            .unwrap_or(&message)
            .trim()
            .to_string();

        let exc_type = if message.contains(TIME_LIMIT_EXCEEDED) && !message.contains(SOFT_TIME_LIMIT_EXCEEDED) {
            TIME_LIMIT_EXCEEDED
        } else if message.contains(SOFT_TIME_LIMIT_EXCEEDED) {
            SOFT_TIME_LIMIT_EXCEEDED
        } else {
            "LuaError"
        };

        LuaFailure {
            exc_type: exc_type.to_string(),
            message,
            traceback,
        }
    }
}
