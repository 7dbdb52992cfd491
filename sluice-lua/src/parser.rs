//! Job module parser
//!
//! Evaluates a Lua job module in a fresh sandbox and extracts the class
//! declarations (name, description, variables, meta, checks) without running
//! any lifecycle function.
//!
//! A job module returns a table mapping class names to class tables:
//!
//! ```lua
//! local Backup = job.define {
//!     name = "Backup configs",
//!     variables = { job.string("device", { min_length = 3 }) },
//!     meta = { soft_time_limit = 30, time_limit = 60 },
//!     checks = { "verify_backup" },
//! }
//! function Backup:run(data) ... end
//! function Backup:verify_backup() ... end
//! return { Backup = Backup }
//! ```

use anyhow::{Context, Result, anyhow};
use mlua::{Lua, LuaSerdeExt, Table, Value};
use sluice_core::domain::job::{ClassPath, JobDescriptor, JobKind, JobMeta};
use sluice_core::domain::variable::VariableSpec;

use crate::sandbox::create_sandbox;

/// Lifecycle functions a class table may define
pub const LIFECYCLE_FUNCTIONS: &[&str] = &[
    "before_start",
    "run",
    "on_success",
    "on_failure",
    "after_return",
    "receive_job_hook",
    "receive_job_button",
];

/// One class declared by a job module
#[derive(Debug, Clone, PartialEq)]
pub struct LuaClassSpec {
    pub class_name: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: JobKind,
    pub variables: Vec<VariableSpec>,
    pub meta: JobMeta,
    /// Names of additional check functions, in execution order
    pub checks: Vec<String>,
}

impl LuaClassSpec {
    pub fn descriptor(&self, class_path: ClassPath) -> JobDescriptor {
        let mut descriptor = JobDescriptor::new(class_path, self.name.clone())
            .with_kind(self.kind)
            .with_meta(self.meta.clone());
        descriptor.description = self.description.clone();
        descriptor.variables = self.variables.clone();
        descriptor
    }
}

/// Parse every class declared by a job module
///
/// Classes come back sorted by class name.
pub fn parse_job_module(source: &str) -> Result<Vec<LuaClassSpec>> {
    let lua = create_sandbox().context("Failed to create sandbox")?;

    let module: Table = lua
        .load(source)
        .eval()
        .context("Failed to evaluate job module")?;

    let mut classes = Vec::new();
    for pair in module.pairs::<String, Value>() {
        let (class_name, value) = pair.context("Job module must map class names to tables")?;
        let Value::Table(class) = value else {
            return Err(anyhow!("Class '{}' must be a table", class_name));
        };
        let spec = parse_class(&lua, &class_name, &class)
            .with_context(|| format!("Invalid job class '{}'", class_name))?;
        classes.push(spec);
    }

    classes.sort_by(|a, b| a.class_name.cmp(&b.class_name));
    Ok(classes)
}

fn parse_class(lua: &Lua, class_name: &str, class: &Table) -> Result<LuaClassSpec> {
    let name: Option<String> = class.get("name").context("Field 'name' must be a string")?;
    let description: Option<String> = class
        .get("description")
        .context("Field 'description' must be a string")?;

    let kind = parse_kind(class)?;
    let variables = parse_variables(lua, class)?;
    let meta = parse_meta(lua, class)?;
    let checks = parse_checks(class)?;

    let entry_point = match kind {
        JobKind::Standard => "run",
        JobKind::JobHookReceiver => "receive_job_hook",
        JobKind::JobButtonReceiver => "receive_job_button",
    };
    if !matches!(class.get::<Value>(entry_point)?, Value::Function(_)) {
        return Err(anyhow!("Class must define function '{}'", entry_point));
    }

    Ok(LuaClassSpec {
        class_name: class_name.to_string(),
        name: name.unwrap_or_else(|| class_name.to_string()),
        description,
        kind,
        variables,
        meta,
        checks,
    })
}

fn parse_kind(class: &Table) -> Result<JobKind> {
    let kind: Option<String> = class.get("kind").context("Field 'kind' must be a string")?;
    match kind.as_deref() {
        None | Some("standard") => Ok(JobKind::Standard),
        Some("job_hook_receiver") => Ok(JobKind::JobHookReceiver),
        Some("job_button_receiver") => Ok(JobKind::JobButtonReceiver),
        Some(other) => Err(anyhow!("Unknown job kind '{}'", other)),
    }
}

/// Variables are an ordered array of declarations built by the `job.<type>` helpers
fn parse_variables(lua: &Lua, class: &Table) -> Result<Vec<VariableSpec>> {
    let value: Value = class.get("variables").unwrap_or(Value::Nil);
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => return Err(anyhow!("Field 'variables' must be an array")),
    };

    let mut variables = Vec::new();
    for (idx, entry) in table.sequence_values::<Value>().enumerate() {
        let entry = entry.context("Failed to read variables entry")?;
        let json: serde_json::Value = lua
            .from_value(entry)
            .with_context(|| format!("Variable #{} is not a plain table", idx + 1))?;
        let spec: VariableSpec = serde_json::from_value(json)
            .with_context(|| format!("Variable #{} is invalid", idx + 1))?;
        variables.push(spec);
    }
    Ok(variables)
}

fn parse_meta(lua: &Lua, class: &Table) -> Result<JobMeta> {
    let value: Value = class.get("meta").unwrap_or(Value::Nil);
    match value {
        Value::Nil => Ok(JobMeta::default()),
        Value::Table(_) => {
            let json: serde_json::Value =
                lua.from_value(value).context("Field 'meta' is not a plain table")?;
            serde_json::from_value(json).context("Field 'meta' is invalid")
        }
        _ => Err(anyhow!("Field 'meta' must be a table")),
    }
}

fn parse_checks(class: &Table) -> Result<Vec<String>> {
    let value: Value = class.get("checks").unwrap_or(Value::Nil);
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => return Err(anyhow!("Field 'checks' must be an array of function names")),
    };

    let mut checks = Vec::new();
    for name in table.sequence_values::<String>() {
        let name = name.context("Failed to read checks entry")?;
        if LIFECYCLE_FUNCTIONS.contains(&name.as_str()) {
            return Err(anyhow!("Check '{}' shadows a lifecycle function", name));
        }
        if !matches!(class.get::<Value>(name.as_str())?, Value::Function(_)) {
            return Err(anyhow!("Check '{}' is not a function of the class", name));
        }
        checks.push(name);
    }
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::variable::VariableKind;

    const MODULE: &str = r#"
        local Backup = job.define {
            name = "Backup configs",
            description = "Pull running configs",
            variables = {
                job.string("device", { min_length = 3 }),
                job.integer("retries", { required = false, default = 2 }),
                job.choice("mode", { choices = { job.choice_item("full"), job.choice_item("diff", "Diff only") } }),
            },
            meta = { soft_time_limit = 30, time_limit = 60, is_singleton = true, singleton_keys = { "device" } },
            checks = { "verify_backup" },
        }
        function Backup:run(data) return data.device end
        function Backup:verify_backup() end

        local Audit = job.define { run = function(self) end }

        return { Backup = Backup, Audit = Audit }
    "#;

    #[test]
    fn test_parse_module() {
        let classes = parse_job_module(MODULE).unwrap();
        assert_eq!(classes.len(), 2);

        let audit = &classes[0];
        assert_eq!(audit.class_name, "Audit");
        assert_eq!(audit.name, "Audit");
        assert_eq!(audit.meta, JobMeta::default());

        let backup = &classes[1];
        assert_eq!(backup.name, "Backup configs");
        assert_eq!(backup.description.as_deref(), Some("Pull running configs"));
        assert_eq!(backup.kind, JobKind::Standard);
        assert_eq!(backup.checks, vec!["verify_backup"]);

        let names: Vec<&str> = backup.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["device", "retries", "mode"]);
        assert_eq!(
            backup.variables[0].definition.kind,
            VariableKind::String {
                min_length: Some(3),
                max_length: None,
                regex: None
            }
        );
        assert!(!backup.variables[1].definition.required);
        assert_eq!(backup.variables[1].definition.default, Some(serde_json::json!(2)));

        assert_eq!(backup.meta.soft_time_limit, Some(30));
        assert_eq!(backup.meta.time_limit, Some(60));
        assert!(backup.meta.is_singleton);
        assert_eq!(backup.meta.singleton_keys, vec!["device"]);
        assert!(backup.meta.has_sensitive_variables);
    }

    #[test]
    fn test_descriptor_from_spec() {
        let classes = parse_job_module(MODULE).unwrap();
        let path = ClassPath::local("backups", "Backup");
        let descriptor = classes[1].descriptor(path.clone());
        assert_eq!(descriptor.class_path, path);
        assert_eq!(descriptor.variables.len(), 3);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_receiver_kinds() {
        let source = r#"
            local OnChange = job.hook_receiver { receive_job_hook = function(self, change, action, obj) end }
            local Button = job.button_receiver { receive_job_button = function(self, obj) end }
            return { OnChange = OnChange, Button = Button }
        "#;
        let classes = parse_job_module(source).unwrap();
        assert_eq!(classes[0].kind, JobKind::JobButtonReceiver);
        assert_eq!(classes[1].kind, JobKind::JobHookReceiver);
    }

    #[test]
    fn test_unknown_variable_type_fails() {
        let source = r#"
            local J = job.define { variables = { { name = "x", type = "colour" } }, run = function() end }
            return { J = J }
        "#;
        let err = parse_job_module(source).unwrap_err();
        assert!(format!("{:#}", err).contains("Variable #1 is invalid"));
    }

    #[test]
    fn test_missing_entry_point_fails() {
        let source = r#"
            local J = job.button_receiver { run = function() end }
            return { J = J }
        "#;
        let err = parse_job_module(source).unwrap_err();
        assert!(format!("{:#}", err).contains("receive_job_button"));
    }

    #[test]
    fn test_bad_checks_fail() {
        let source = r#"
            local J = job.define { checks = { "missing" }, run = function() end }
            return { J = J }
        "#;
        assert!(parse_job_module(source).is_err());

        let source = r#"
            local J = job.define { checks = { "run" }, run = function() end }
            return { J = J }
        "#;
        assert!(parse_job_module(source).is_err());
    }

    #[test]
    fn test_syntax_error_fails() {
        assert!(parse_job_module("return {").is_err());
        assert!(parse_job_module("return 42").is_err());
    }
}
