//! Input module for reading the job's validated variables
//!
//! The same values are passed to `run(self, data)`; this module makes them
//! reachable from every lifecycle function and from checks.

use crate::convert::json_to_lua;
use crate::module::{ModuleMetadata, SluiceModule};
use mlua::prelude::*;
use std::sync::Arc;

/// Trait for providing job inputs
///
/// Values are the cleaned variable values in their JSON form.
pub trait InputProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<serde_json::Value>;

    /// Declared variable names, in declaration order
    fn keys(&self) -> Vec<String>;
}

/// Static inputs, mostly useful for tests and metadata evaluation
impl InputProvider for serde_json::Map<String, serde_json::Value> {
    fn get(&self, name: &str) -> Option<serde_json::Value> {
        serde_json::Map::get(self, name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        serde_json::Map::keys(self).cloned().collect()
    }
}

pub struct InputModule<V: InputProvider> {
    provider: Arc<V>,
}

impl<V: InputProvider> InputModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: InputProvider + 'static> SluiceModule for InputModule<V> {
    fn id(&self) -> &'static str {
        "input"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let input_table = lua.create_table()?;

        // input.get(name, default?)
        {
            let provider = self.provider.clone();
            input_table.set(
                "get",
                lua.create_function(move |lua, (name, default): (String, LuaValue)| {
                    match provider.get(&name) {
                        Some(serde_json::Value::Null) | None => Ok(default),
                        Some(value) => json_to_lua(lua, &value),
                    }
                })?,
            )?;
        }

        // input.require(name) errors when the value is missing or null
        {
            let provider = self.provider.clone();
            input_table.set(
                "require",
                lua.create_function(move |lua, name: String| match provider.get(&name) {
                    Some(serde_json::Value::Null) | None => Err(LuaError::RuntimeError(format!(
                        "Required input '{}' is not set",
                        name
                    ))),
                    Some(value) => json_to_lua(lua, &value),
                })?,
            )?;
        }

        {
            let provider = self.provider.clone();
            input_table.set(
                "has",
                lua.create_function(move |_, name: String| {
                    Ok(!matches!(
                        provider.get(&name),
                        None | Some(serde_json::Value::Null)
                    ))
                })?,
            )?;
        }

        {
            let provider = self.provider.clone();
            input_table.set(
                "all",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    for key in provider.keys() {
                        if let Some(value) = provider.get(&key) {
                            table.set(key.as_str(), json_to_lua(lua, &value)?)?;
                        }
                    }
                    Ok(table)
                })?,
            )?;
        }

        {
            let provider = self.provider.clone();
            input_table.set(
                "keys",
                lua.create_function(move |lua, ()| lua.create_sequence_from(provider.keys()))?,
            )?;
        }

        lua.globals().set(self.id(), input_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Access to the job's validated variables
---@class input
input = {}

---Get a variable value, or `default` when it is unset
---@param name string
---@param default? any
---@return any
function input.get(name, default) end

---Get a variable value, raising an error when it is unset
---@param name string
---@return any
function input.require(name) end

---@param name string
---@return boolean
function input.has(name) end

---All variables as a table
---@return table<string, any>
function input.all() end

---Declared variable names in declaration order
---@return string[]
function input.keys() end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Job variable access",
            author: "Sluice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup(value: serde_json::Value) -> Lua {
        let lua = Lua::new();
        let serde_json::Value::Object(map) = value else {
            panic!("expected object");
        };
        InputModule::new(map).register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_input_get() {
        let lua = setup(json!({"device": "edge-01", "count": 3, "note": null}));

        let device: String = lua.load(r#"return input.get("device")"#).eval().unwrap();
        assert_eq!(device, "edge-01");

        let count: i64 = lua.load(r#"return input.get("count")"#).eval().unwrap();
        assert_eq!(count, 3);

        let note: String = lua
            .load(r#"return input.get("note", "none")"#)
            .eval()
            .unwrap();
        assert_eq!(note, "none");

        let missing: Option<String> = lua.load(r#"return input.get("missing")"#).eval().unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_input_require() {
        let lua = setup(json!({"device": "edge-01", "note": null}));

        let device: String = lua
            .load(r#"return input.require("device")"#)
            .eval()
            .unwrap();
        assert_eq!(device, "edge-01");

        let result: LuaResult<String> = lua.load(r#"return input.require("note")"#).eval();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Required input 'note'")
        );
    }

    #[test]
    fn test_input_has_all_keys() {
        let lua = setup(json!({"a": 1, "b": [1, 2], "c": null}));

        let (has_a, has_c): (bool, bool) = lua
            .load(r#"return input.has("a"), input.has("c")"#)
            .eval()
            .unwrap();
        assert!(has_a);
        assert!(!has_c);

        let second: i64 = lua.load(r#"return input.all().b[2]"#).eval().unwrap();
        assert_eq!(second, 2);

        let count: i64 = lua.load(r#"return #input.keys()"#).eval().unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_stubs_generation() {
        let module = InputModule::new(serde_json::Map::new());
        let stubs = module.stubs();
        assert!(stubs.contains("---@meta"));
        assert!(stubs.contains("function input.require(name) end"));
    }
}
