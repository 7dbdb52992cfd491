//! JSON <-> Lua value conversion
//!
//! JSON `null` maps to `nil` in both directions so job code can test
//! optional inputs with `== nil`.

use mlua::{DeserializeOptions, Lua, LuaSerdeExt, Result as LuaResult, SerializeOptions, Value};

pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<Value> {
    lua.to_value_with(
        value,
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false),
    )
}

/// Functions and userdata inside tables are skipped rather than rejected
pub fn lua_to_json(lua: &Lua, value: Value) -> LuaResult<serde_json::Value> {
    lua.from_value_with(value, DeserializeOptions::new().deny_unsupported_types(false))
}
