//! Data module: transactional key/value access for jobs
//!
//! Writes go through the transaction scope of the running job and are
//! discarded on dry runs and on failure.

use crate::convert::{json_to_lua, lua_to_json};
use crate::module::{ModuleMetadata, SluiceModule};
use mlua::prelude::*;
use std::sync::Arc;

/// Blocking access to the job's open data transaction
///
/// Called from the Lua thread, so implementations may block.
pub trait DataAccess: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String>;

    fn put(&self, key: &str, value: serde_json::Value) -> Result<(), String>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> Result<bool, String>;

    fn keys(&self, prefix: &str) -> Result<Vec<String>, String>;
}

pub struct DataModule<D: DataAccess> {
    access: Arc<D>,
}

impl<D: DataAccess> DataModule<D> {
    pub fn new(access: D) -> Self {
        Self {
            access: Arc::new(access),
        }
    }
}

fn data_error(e: String) -> LuaError {
    LuaError::RuntimeError(format!("data: {}", e))
}

impl<D: DataAccess + 'static> SluiceModule for DataModule<D> {
    fn id(&self) -> &'static str {
        "data"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let data = lua.create_table()?;

        let access = self.access.clone();
        data.set(
            "get",
            lua.create_function(move |lua, key: String| {
                match access.get(&key).map_err(data_error)? {
                    Some(value) => json_to_lua(lua, &value),
                    None => Ok(LuaValue::Nil),
                }
            })?,
        )?;

        let access = self.access.clone();
        data.set(
            "put",
            lua.create_function(move |lua, (key, value): (String, LuaValue)| {
                let value = lua_to_json(lua, value)?;
                access.put(&key, value).map_err(data_error)
            })?,
        )?;

        let access = self.access.clone();
        data.set(
            "delete",
            lua.create_function(move |_, key: String| access.delete(&key).map_err(data_error))?,
        )?;

        let access = self.access.clone();
        data.set(
            "keys",
            lua.create_function(move |lua, prefix: Option<String>| {
                let keys = access
                    .keys(prefix.as_deref().unwrap_or(""))
                    .map_err(data_error)?;
                lua.create_sequence_from(keys)
            })?,
        )?;

        lua.globals().set(self.id(), data)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Transactional data access; changes are rolled back on dry runs and failures
---@class data
data = {}

---@param key string
---@return any
function data.get(key) end

---@param key string
---@param value any
function data.put(key, value) end

---@param key string
---@return boolean existed
function data.delete(key) end

---@param prefix? string
---@return string[]
function data.keys(prefix) end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Transactional job data access",
            author: "Sluice",
        }
    }
}
