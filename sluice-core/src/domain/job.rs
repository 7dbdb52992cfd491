//! Job definition types
//!
//! A `JobDescriptor` is everything known about a job class without running
//! it: where it was loaded from, its declared variables and its Meta flags.
//! It is the stable introspection surface exposed to front ends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::variable::{
    FieldDescriptor, JobData, ValidationErrors, VariableDefinition, VariableError, VariableSpec,
    validate_job_data,
};

/// Name of the queue used when a job declares no task queues
pub const DEFAULT_TASK_QUEUE: &str = "default";

// =============================================================================
// Class paths
// =============================================================================

/// Provenance of a job class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceGrouping {
    /// Jobs found in the configured local jobs directory
    Local,
    /// Jobs provided by a tracked Git repository, keyed by repository slug
    Git(String),
    /// Jobs contributed by installed apps
    Plugins,
}

impl SourceGrouping {
    pub fn git(slug: impl Into<String>) -> Self {
        SourceGrouping::Git(slug.into())
    }
}

impl fmt::Display for SourceGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceGrouping::Local => f.write_str("local"),
            SourceGrouping::Git(slug) => write!(f, "git.{}", slug),
            SourceGrouping::Plugins => f.write_str("plugins"),
        }
    }
}

impl FromStr for SourceGrouping {
    type Err = ClassPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SourceGrouping::Local),
            "plugins" => Ok(SourceGrouping::Plugins),
            other => match other.strip_prefix("git.") {
                Some(slug) if !slug.is_empty() && !slug.contains('/') => {
                    Ok(SourceGrouping::Git(slug.to_string()))
                }
                _ => Err(ClassPathError::UnknownGrouping(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for SourceGrouping {
    type Error = ClassPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceGrouping> for String {
    fn from(value: SourceGrouping) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassPathError {
    #[error("class path '{0}' must have the form grouping/module/ClassName")]
    Malformed(String),

    #[error("unknown source grouping '{0}'")]
    UnknownGrouping(String),
}

/// `{grouping}/{module}/{ClassName}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassPath {
    pub grouping: SourceGrouping,
    pub module: String,
    pub class_name: String,
}

impl ClassPath {
    pub fn new(
        grouping: SourceGrouping,
        module: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            grouping,
            module: module.into(),
            class_name: class_name.into(),
        }
    }

    pub fn local(module: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(SourceGrouping::Local, module, class_name)
    }

    pub fn plugin(module: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(SourceGrouping::Plugins, module, class_name)
    }

    pub fn parse(s: &str) -> Result<Self, ClassPathError> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [grouping, module, class_name]
                if !module.is_empty() && !class_name.is_empty() =>
            {
                Ok(Self::new(grouping.parse()?, *module, *class_name))
            }
            _ => Err(ClassPathError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for ClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.grouping, self.module, self.class_name)
    }
}

impl FromStr for ClassPath {
    type Err = ClassPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClassPath {
    type Error = ClassPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClassPath> for String {
    fn from(value: ClassPath) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Meta
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("soft_time_limit ({soft}s) must be less than time_limit ({hard}s)")]
    SoftLimitNotBelowHard { soft: u64, hard: u64 },

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("approval_required cannot be combined with has_sensitive_variables")]
    SensitiveApproval,
}

/// Declarative job flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMeta {
    pub approval_required: bool,
    pub dryrun_default: bool,
    pub has_sensitive_variables: bool,
    pub hidden: bool,
    pub read_only: bool,
    pub is_singleton: bool,
    /// Variable names scoping the singleton lock; empty locks the whole job
    pub singleton_keys: Vec<String>,
    /// Seconds before the job is asked to wind down
    pub soft_time_limit: Option<u64>,
    /// Seconds before the job is terminated
    pub time_limit: Option<u64>,
    pub task_queues: Vec<String>,
}

impl Default for JobMeta {
    fn default() -> Self {
        Self {
            approval_required: false,
            dryrun_default: false,
            has_sensitive_variables: true,
            hidden: false,
            read_only: false,
            is_singleton: false,
            singleton_keys: Vec::new(),
            soft_time_limit: None,
            time_limit: None,
            task_queues: Vec::new(),
        }
    }
}

impl JobMeta {
    pub fn validate(&self) -> Result<(), MetaError> {
        if self.soft_time_limit == Some(0) {
            return Err(MetaError::ZeroLimit("soft_time_limit"));
        }
        if self.time_limit == Some(0) {
            return Err(MetaError::ZeroLimit("time_limit"));
        }
        if let (Some(soft), Some(hard)) = (self.soft_time_limit, self.time_limit) {
            if soft >= hard {
                return Err(MetaError::SoftLimitNotBelowHard { soft, hard });
            }
        }
        // Sensitive inputs are never stored, so there is nothing to approve later.
        if self.approval_required && self.has_sensitive_variables {
            return Err(MetaError::SensitiveApproval);
        }
        Ok(())
    }

    /// Queue a run goes to when the caller does not pick one
    pub fn default_queue(&self) -> &str {
        self.task_queues
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_TASK_QUEUE)
    }

    pub fn accepts_queue(&self, queue: &str) -> bool {
        if self.task_queues.is_empty() {
            queue == DEFAULT_TASK_QUEUE
        } else {
            self.task_queues.iter().any(|q| q == queue)
        }
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// What entry point a job class exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Standard,
    JobHookReceiver,
    JobButtonReceiver,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Standard => "standard",
            JobKind::JobHookReceiver => "job_hook_receiver",
            JobKind::JobButtonReceiver => "job_button_receiver",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error("variable '{name}': {source}")]
    Variable { name: String, source: VariableError },

    #[error("variable '{0}' is declared more than once")]
    DuplicateVariable(String),

    #[error("singleton key '{0}' is not a declared variable")]
    UnknownSingletonKey(String),
}

/// Introspectable description of a job class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub class_path: ClassPath,
    pub name: String,
    pub description: Option<String>,
    pub kind: JobKind,
    pub variables: Vec<VariableSpec>,
    pub meta: JobMeta,
}

impl JobDescriptor {
    pub fn new(class_path: ClassPath, name: impl Into<String>) -> Self {
        Self {
            class_path,
            name: name.into(),
            description: None,
            kind: JobKind::Standard,
            variables: Vec::new(),
            meta: JobMeta::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, definition: VariableDefinition) -> Self {
        self.variables.push(VariableSpec {
            name: name.into(),
            definition,
        });
        self
    }

    pub fn with_meta(mut self, meta: JobMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.definition)
    }

    /// Definition-time checks for the whole class
    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.meta.validate()?;

        let mut seen = std::collections::HashSet::new();
        for spec in &self.variables {
            if !seen.insert(spec.name.as_str()) {
                return Err(DescriptorError::DuplicateVariable(spec.name.clone()));
            }
            spec.definition
                .check()
                .map_err(|source| DescriptorError::Variable {
                    name: spec.name.clone(),
                    source,
                })?;
        }

        for key in &self.meta.singleton_keys {
            if !seen.contains(key.as_str()) {
                return Err(DescriptorError::UnknownSingletonKey(key.clone()));
            }
        }

        Ok(())
    }

    pub fn validate_data(&self, raw: &Map<String, Value>) -> Result<JobData, ValidationErrors> {
        validate_job_data(&self.variables, raw)
    }

    /// Lock key for singleton jobs, `None` for everything else
    pub fn singleton_key(&self, data: &JobData) -> Option<String> {
        if !self.meta.is_singleton {
            return None;
        }

        let mut key = format!("sluice:singleton:{}", self.class_path);
        if !self.meta.singleton_keys.is_empty() {
            let scoped: Vec<String> = self
                .meta
                .singleton_keys
                .iter()
                .map(|name| {
                    let value = data.get(name).map(|v| v.to_json()).unwrap_or(Value::Null);
                    format!("{}={}", name, value)
                })
                .collect();
            key.push('[');
            key.push_str(&scoped.join(","));
            key.push(']');
        }
        Some(key)
    }

    pub fn form_fields(&self, current: &Map<String, Value>) -> Vec<FieldDescriptor> {
        self.variables
            .iter()
            .map(|spec| {
                spec.definition
                    .render_as_input_field(&spec.name, current.get(&spec.name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_path_round_trip() {
        for s in ["local/backups/BackupConfigs", "git.netops/audit/Audit", "plugins/example_app/TestPassJob"] {
            let path = ClassPath::parse(s).unwrap();
            assert_eq!(path.to_string(), s);
        }

        let path = ClassPath::parse("git.netops/audit/Audit").unwrap();
        assert_eq!(path.grouping, SourceGrouping::git("netops"));
        assert_eq!(path.module, "audit");
        assert_eq!(path.class_name, "Audit");
    }

    #[test]
    fn test_class_path_rejects_malformed() {
        assert!(ClassPath::parse("local/OnlyTwo").is_err());
        assert!(ClassPath::parse("local/a/b/c").is_err());
        assert!(ClassPath::parse("somewhere/a/B").is_err());
        assert!(ClassPath::parse("git./a/B").is_err());
        assert!(ClassPath::parse("local//B").is_err());
    }

    #[test]
    fn test_class_path_serializes_as_string() {
        let path = ClassPath::plugin("example_app", "TestPassJob");
        let value = serde_json::to_value(&path).unwrap();
        assert_eq!(value, json!("plugins/example_app/TestPassJob"));
        let back: ClassPath = serde_json::from_value(value).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_meta_defaults() {
        let meta = JobMeta::default();
        assert!(meta.has_sensitive_variables);
        assert!(!meta.is_singleton);
        assert_eq!(meta.default_queue(), DEFAULT_TASK_QUEUE);
        assert!(meta.accepts_queue("default"));
        assert!(!meta.accepts_queue("priority"));

        let parsed: JobMeta = serde_json::from_value(json!({"hidden": true})).unwrap();
        assert!(parsed.hidden);
        assert!(parsed.has_sensitive_variables);
    }

    #[test]
    fn test_meta_time_limit_validation() {
        let mut meta = JobMeta {
            soft_time_limit: Some(5),
            time_limit: Some(5),
            ..JobMeta::default()
        };
        assert_eq!(
            meta.validate(),
            Err(MetaError::SoftLimitNotBelowHard { soft: 5, hard: 5 })
        );

        meta.soft_time_limit = Some(1);
        assert!(meta.validate().is_ok());

        meta.time_limit = Some(0);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_meta_sensitive_approval_conflict() {
        let meta = JobMeta {
            approval_required: true,
            ..JobMeta::default()
        };
        assert_eq!(meta.validate(), Err(MetaError::SensitiveApproval));

        let meta = JobMeta {
            approval_required: true,
            has_sensitive_variables: false,
            ..JobMeta::default()
        };
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_descriptor_validation() {
        let descriptor = JobDescriptor::new(ClassPath::local("m", "Job"), "Job")
            .with_variable("a", VariableDefinition::string())
            .with_variable("a", VariableDefinition::integer());
        assert_eq!(
            descriptor.validate(),
            Err(DescriptorError::DuplicateVariable("a".to_string()))
        );

        let descriptor = JobDescriptor::new(ClassPath::local("m", "Job"), "Job")
            .with_variable("a", VariableDefinition::string())
            .with_meta(JobMeta {
                is_singleton: true,
                singleton_keys: vec!["b".to_string()],
                ..JobMeta::default()
            });
        assert_eq!(
            descriptor.validate(),
            Err(DescriptorError::UnknownSingletonKey("b".to_string()))
        );
    }

    #[test]
    fn test_singleton_key_scoping() {
        let descriptor = JobDescriptor::new(ClassPath::local("m", "Sync"), "Sync")
            .with_variable("device", VariableDefinition::string())
            .with_variable("note", VariableDefinition::string().optional())
            .with_meta(JobMeta {
                is_singleton: true,
                singleton_keys: vec!["device".to_string()],
                ..JobMeta::default()
            });

        let mut raw = Map::new();
        raw.insert("device".to_string(), json!("edge-01"));
        let data = descriptor.validate_data(&raw).unwrap();
        assert_eq!(
            descriptor.singleton_key(&data).as_deref(),
            Some("sluice:singleton:local/m/Sync[device=\"edge-01\"]")
        );

        let plain = JobDescriptor::new(ClassPath::local("m", "Plain"), "Plain");
        assert_eq!(plain.singleton_key(&JobData::new()), None);
    }

    #[test]
    fn test_descriptor_introspection_shape() {
        let descriptor = JobDescriptor::new(ClassPath::local("m", "Job"), "Job")
            .with_variable("count", VariableDefinition::integer().optional());
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["class_path"], json!("local/m/Job"));
        assert_eq!(value["kind"], json!("standard"));
        assert_eq!(value["variables"][0]["name"], json!("count"));
        assert_eq!(value["variables"][0]["type"], json!("integer"));
        assert_eq!(value["variables"][0]["required"], json!(false));
    }
}
