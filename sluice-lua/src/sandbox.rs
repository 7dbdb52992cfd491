//! Lua sandbox creation
//!
//! This module provides a restricted Lua sandbox that prevents access to
//! dangerous operations like filesystem I/O, network access, and process execution.
//!
//! The `job` authoring module is always injected since every job module file
//! needs it just to be evaluated. Runtime modules (log, input, ctx, data) are
//! registered by the caller after creating the sandbox.

use mlua::{HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value, VmState};
use sluice_core::domain::job::JobKind;
use sluice_core::domain::variable::VariableKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type name raised inside Lua when the soft time limit elapses
pub const SOFT_TIME_LIMIT_EXCEEDED: &str = "SoftTimeLimitExceeded";

/// Error type name raised inside Lua when the job must stop
pub const TIME_LIMIT_EXCEEDED: &str = "TimeLimitExceeded";

/// Instructions executed between two time limit checks
const LIMIT_CHECK_INTERVAL: u32 = 1_000;

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math, coroutines)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Security
/// This sandbox prevents:
/// - Network access
/// - File system access
/// - Process execution
/// - Loading external modules via require()
///
/// # Example
/// ```no_run
/// use sluice_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let module: mlua::Table = lua
///     .load(r#"
///         local Hello = job.define { name = "Hello" }
///         function Hello:run(data) return "hi" end
///         return { Hello = Hello }
///     "#)
///     .eval()?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH, COROUTINE
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_job_module(&lua)?;

    Ok(lua)
}

/// Register the `job` authoring module
///
/// `job.define`, `job.hook_receiver` and `job.button_receiver` stamp the kind
/// onto a class table and return it. One helper per variable type builds a
/// variable declaration: `job.integer("count", { min_value = 1 })`.
fn register_job_module(lua: &Lua) -> LuaResult<()> {
    let job = lua.create_table()?;

    for (fn_name, kind) in [
        ("define", JobKind::Standard),
        ("hook_receiver", JobKind::JobHookReceiver),
        ("button_receiver", JobKind::JobButtonReceiver),
    ] {
        let define_fn = lua.create_function(move |_, class: Table| {
            class.set("kind", kind.as_str())?;
            Ok(class)
        })?;
        job.set(fn_name, define_fn)?;
    }

    for &tag in VariableKind::TAGS {
        let var_fn = lua.create_function(move |lua, (name, opts): (String, Option<Table>)| {
            let var = lua.create_table()?;
            if let Some(opts) = opts {
                for pair in opts.pairs::<Value, Value>() {
                    let (k, v) = pair?;
                    var.set(k, v)?;
                }
            }
            var.set("name", name)?;
            var.set("type", tag)?;
            Ok(var)
        })?;
        job.set(tag, var_fn)?;
    }

    job.set(
        "choice_item",
        lua.create_function(|lua, (value, label): (String, Option<String>)| {
            let choice = lua.create_table()?;
            choice.set("label", label.unwrap_or_else(|| value.clone()))?;
            choice.set("value", value)?;
            Ok(choice)
        })?,
    )?;

    lua.globals().set("job", job)?;
    Ok(())
}

/// Stub file for the `job` module
pub fn job_module_stubs() -> String {
    let mut stubs = String::from(
        r#"---@meta

---Job authoring helpers
---@class job
job = {}

---Declare a standard job class
---@param class table Class table with name, description, variables, meta and lifecycle functions
---@return table class
function job.define(class) end

---Declare a job hook receiver (implements receive_job_hook(change, action, object))
---@param class table
---@return table class
function job.hook_receiver(class) end

---Declare a job button receiver (implements receive_job_button(object))
---@param class table
---@return table class
function job.button_receiver(class) end

---Build a choice entry
---@param value string
---@param label? string
---@return table
function job.choice_item(value, label) end
"#,
    );
    for tag in VariableKind::TAGS {
        stubs.push_str(&format!(
            "\n---Declare a {} variable\n---@param name string\n---@param opts? table\n---@return table\nfunction job.{}(name, opts) end\n",
            tag, tag
        ));
    }
    stubs
}

// =============================================================================
// Time limits
// =============================================================================

/// Flags polled by the instruction hook
///
/// `soft` is raised by the engine when the soft limit elapses; the hook then
/// raises one catchable `SoftTimeLimitExceeded` error. `abort` makes every
/// subsequent check fail, so job code cannot swallow it.
#[derive(Debug, Clone, Default)]
pub struct LimitFlags {
    pub soft: Arc<AtomicBool>,
    pub abort: Arc<AtomicBool>,
}

impl LimitFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

/// Install the time limit hook on a sandbox
pub fn install_time_limits(lua: &Lua, flags: LimitFlags) {
    let soft_raised = AtomicBool::new(false);
    let _ = lua.set_hook(
        // Return events also fire when pcall returns, outside its protection
        HookTriggers::new()
            .on_returns()
            .every_nth_instruction(LIMIT_CHECK_INTERVAL),
        move |_lua, _debug| {
            if flags.abort.load(Ordering::SeqCst) {
                return Err(mlua::Error::RuntimeError(format!(
                    "{}: job terminated",
                    TIME_LIMIT_EXCEEDED
                )));
            }
            if flags.soft.load(Ordering::SeqCst) && !soft_raised.swap(true, Ordering::SeqCst) {
                return Err(mlua::Error::RuntimeError(format!(
                    "{}: soft time limit reached",
                    SOFT_TIME_LIMIT_EXCEEDED
                )));
            }
            Ok(VmState::Continue)
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("hello")"#).eval().unwrap();
        assert_eq!(result, "HELLO");

        let result: f64 = lua.load(r#"return math.sqrt(16)"#).eval().unwrap();
        assert_eq!(result, 4.0);
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();

        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_sandbox_no_runtime_modules_by_default() {
        let lua = create_sandbox().unwrap();

        for global in ["log", "input", "ctx", "data"] {
            let present: bool = lua
                .load(format!("return {} ~= nil", global))
                .eval()
                .unwrap();
            assert!(!present, "{} should not be registered", global);
        }
    }

    #[test]
    fn test_job_define_sets_kind() {
        let lua = create_sandbox().unwrap();

        let kinds: (String, String, String) = lua
            .load(
                r#"
            local a = job.define({ name = "A" })
            local b = job.hook_receiver({ name = "B" })
            local c = job.button_receiver({ name = "C" })
            return a.kind, b.kind, c.kind
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(kinds.0, "standard");
        assert_eq!(kinds.1, "job_hook_receiver");
        assert_eq!(kinds.2, "job_button_receiver");
    }

    #[test]
    fn test_variable_helpers() {
        let lua = create_sandbox().unwrap();

        let var: Table = lua
            .load(r#"return job.integer("count", { min_value = 1, required = false })"#)
            .eval()
            .unwrap();
        assert_eq!(var.get::<String>("name").unwrap(), "count");
        assert_eq!(var.get::<String>("type").unwrap(), "integer");
        assert_eq!(var.get::<i64>("min_value").unwrap(), 1);
        assert!(!var.get::<bool>("required").unwrap());

        // The helper's own name and type win over opts
        let var: Table = lua
            .load(r#"return job.string("x", { type = "json" })"#)
            .eval()
            .unwrap();
        assert_eq!(var.get::<String>("type").unwrap(), "string");
    }

    #[test]
    fn test_stubs_cover_every_variable_helper() {
        let stubs = job_module_stubs();
        assert!(stubs.starts_with("---@meta"));
        for tag in VariableKind::TAGS {
            assert!(stubs.contains(&format!("function job.{}(name, opts) end", tag)));
        }
    }

    #[test]
    fn test_abort_flag_stops_infinite_loop() {
        let lua = create_sandbox().unwrap();
        let flags = LimitFlags::new();
        flags.abort();
        install_time_limits(&lua, flags);

        let err = lua
            .load("while true do end")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains(TIME_LIMIT_EXCEEDED));
    }

    #[test]
    fn test_soft_limit_is_catchable_once() {
        let lua = create_sandbox().unwrap();
        let flags = LimitFlags::new();
        flags.soft.store(true, Ordering::SeqCst);
        install_time_limits(&lua, flags);

        let caught: String = lua
            .load(
                r#"
            local ok, err = pcall(function()
                for i = 1, 100000 do end
            end)
            -- second loop runs to completion
            for i = 1, 100000 do end
            return tostring(err)
        "#,
            )
            .eval()
            .unwrap();
        assert!(caught.contains(SOFT_TIME_LIMIT_EXCEEDED));
    }
}
