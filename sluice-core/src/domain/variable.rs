//! Job variable definitions
//!
//! A job declares an ordered set of named variables. Each variable carries a
//! semantic type tag plus constraints and knows how to turn raw JSON input into
//! a typed value, and how to describe itself as a form field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::log::ObjectRef;

/// Error raised while validating a single value, or while checking a definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("This field is required.")]
    Required,

    #[error("{0}")]
    Invalid(String),

    #[error("invalid variable definition: {0}")]
    Definition(String),
}

fn invalid(msg: impl Into<String>) -> VariableError {
    VariableError::Invalid(msg.into())
}

/// A selectable option for choice variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Semantic type of a variable, with its type-specific constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableKind {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
    },
    Text,
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<i64>,
    },
    Boolean,
    Choice {
        choices: Vec<Choice>,
    },
    MultiChoice {
        choices: Vec<Choice>,
    },
    Object {
        model: String,
    },
    MultiObject {
        model: String,
    },
    File,
    IpAddress,
    IpAddressWithMask,
    IpNetwork {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_prefix_length: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_prefix_length: Option<u8>,
    },
    Json,
}

impl VariableKind {
    /// Every type tag accepted in job definitions
    pub const TAGS: &'static [&'static str] = &[
        "string",
        "text",
        "integer",
        "boolean",
        "choice",
        "multi_choice",
        "object",
        "multi_object",
        "file",
        "ip_address",
        "ip_address_with_mask",
        "ip_network",
        "json",
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            VariableKind::String { .. } => "string",
            VariableKind::Text => "text",
            VariableKind::Integer { .. } => "integer",
            VariableKind::Boolean => "boolean",
            VariableKind::Choice { .. } => "choice",
            VariableKind::MultiChoice { .. } => "multi_choice",
            VariableKind::Object { .. } => "object",
            VariableKind::MultiObject { .. } => "multi_object",
            VariableKind::File => "file",
            VariableKind::IpAddress => "ip_address",
            VariableKind::IpAddressWithMask => "ip_address_with_mask",
            VariableKind::IpNetwork { .. } => "ip_network",
            VariableKind::Json => "json",
        }
    }

    fn widget(&self) -> &'static str {
        match self {
            VariableKind::String { .. } => "text_input",
            VariableKind::Text => "textarea",
            VariableKind::Integer { .. } => "number_input",
            VariableKind::Boolean => "checkbox",
            VariableKind::Choice { .. } => "select",
            VariableKind::MultiChoice { .. } => "select_multiple",
            VariableKind::Object { .. } => "api_select",
            VariableKind::MultiObject { .. } => "api_select_multiple",
            VariableKind::File => "file_input",
            VariableKind::IpAddress
            | VariableKind::IpAddressWithMask
            | VariableKind::IpNetwork { .. } => "text_input",
            VariableKind::Json => "json_textarea",
        }
    }
}

/// A typed, validated variable value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VarValue {
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<String>),
    Object(ObjectRef),
    Objects(Vec<ObjectRef>),
    Json(Value),
}

impl VarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, VarValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            VarValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// An IP address plus prefix length, e.g. `10.0.0.1/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPrefix {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl IpPrefix {
    fn max_len(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// The same prefix with host bits cleared
    pub fn network(&self) -> IpPrefix {
        let addr = match self.addr {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix_len))
                };
                IpAddr::V4((bits & mask).into())
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix_len))
                };
                IpAddr::V6((bits & mask).into())
            }
        };
        IpPrefix {
            addr,
            prefix_len: self.prefix_len,
        }
    }
}

impl FromStr for IpPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in address/prefix form", s))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| format!("'{}' is not a valid IP address", addr))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| format!("'{}' is not a valid prefix length", len))?;
        if prefix_len > Self::max_len(&addr) {
            return Err(format!(
                "prefix length {} is out of range for {}",
                prefix_len, addr
            ));
        }
        Ok(IpPrefix { addr, prefix_len })
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Form field description used by front ends to render job input forms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub widget: &'static str,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    pub required: bool,
    pub initial: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
}

/// One declared job input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub kind: VariableKind,
}

fn default_required() -> bool {
    true
}

impl VariableDefinition {
    pub fn new(kind: VariableKind) -> Self {
        // Booleans are never "required": unchecked means false.
        let required = !matches!(kind, VariableKind::Boolean);
        Self {
            label: None,
            description: None,
            required,
            default: None,
            kind,
        }
    }

    pub fn string() -> Self {
        Self::new(VariableKind::String {
            min_length: None,
            max_length: None,
            regex: None,
        })
    }

    pub fn text() -> Self {
        Self::new(VariableKind::Text)
    }

    pub fn integer() -> Self {
        Self::new(VariableKind::Integer {
            min_value: None,
            max_value: None,
        })
    }

    pub fn boolean() -> Self {
        Self::new(VariableKind::Boolean)
    }

    pub fn choice(choices: Vec<Choice>) -> Self {
        Self::new(VariableKind::Choice { choices })
    }

    pub fn object(model: impl Into<String>) -> Self {
        Self::new(VariableKind::Object {
            model: model.into(),
        })
    }

    pub fn json() -> Self {
        Self::new(VariableKind::Json)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Definition-time sanity check
    ///
    /// Rejects constraint combinations that can never be satisfied and
    /// defaults that would not pass validation.
    pub fn check(&self) -> Result<(), VariableError> {
        let definition = |msg: String| Err(VariableError::Definition(msg));

        match &self.kind {
            VariableKind::String {
                min_length,
                max_length,
                regex,
            } => {
                if let Some((min, max)) = inverted(*min_length, *max_length) {
                    return definition(format!(
                        "min_length ({}) is greater than max_length ({})",
                        min, max
                    ));
                }
                if let Some(Err(e)) = regex.as_deref().map(regex::Regex::new) {
                    return definition(format!("invalid regex: {}", e));
                }
            }
            VariableKind::Integer {
                min_value,
                max_value,
            } => {
                if let Some((min, max)) = inverted(*min_value, *max_value) {
                    return definition(format!(
                        "min_value ({}) is greater than max_value ({})",
                        min, max
                    ));
                }
            }
            VariableKind::Choice { choices } | VariableKind::MultiChoice { choices } => {
                if choices.is_empty() {
                    return definition("choices cannot be empty".to_string());
                }
                let mut seen = std::collections::HashSet::new();
                for choice in choices {
                    if !seen.insert(choice.value.as_str()) {
                        return definition(format!("duplicate choice '{}'", choice.value));
                    }
                }
            }
            VariableKind::Object { model } | VariableKind::MultiObject { model } => {
                if model.trim().is_empty() {
                    return definition("model cannot be empty".to_string());
                }
            }
            VariableKind::IpNetwork {
                min_prefix_length,
                max_prefix_length,
            } => {
                for len in [min_prefix_length, max_prefix_length].into_iter().flatten() {
                    if *len > 128 {
                        return definition(format!("prefix length {} is out of range", len));
                    }
                }
                if let Some((min, max)) = inverted(*min_prefix_length, *max_prefix_length) {
                    return definition(format!(
                        "min_prefix_length ({}) is greater than max_prefix_length ({})",
                        min, max
                    ));
                }
            }
            VariableKind::Text
            | VariableKind::Boolean
            | VariableKind::File
            | VariableKind::IpAddress
            | VariableKind::IpAddressWithMask
            | VariableKind::Json => {}
        }

        if let Some(default) = &self.default {
            self.convert(default).map_err(|e| {
                VariableError::Definition(format!("default value is not valid: {}", e))
            })?;
        }

        Ok(())
    }

    /// Type-specific empty value used when an optional variable has no input
    pub fn empty_value(&self) -> VarValue {
        match &self.kind {
            VariableKind::String { .. } | VariableKind::Text | VariableKind::Choice { .. } => {
                VarValue::String(String::new())
            }
            VariableKind::Boolean => VarValue::Bool(false),
            VariableKind::MultiChoice { .. } => VarValue::List(Vec::new()),
            VariableKind::MultiObject { .. } => VarValue::Objects(Vec::new()),
            VariableKind::Integer { .. }
            | VariableKind::Object { .. }
            | VariableKind::File
            | VariableKind::IpAddress
            | VariableKind::IpAddressWithMask
            | VariableKind::IpNetwork { .. }
            | VariableKind::Json => VarValue::Null,
        }
    }

    /// Default value: the declared default when present, else the empty value
    pub fn default_value(&self) -> VarValue {
        self.default
            .as_ref()
            .and_then(|d| self.convert(d).ok())
            .unwrap_or_else(|| self.empty_value())
    }

    /// Validate raw input and convert it to a typed value
    ///
    /// `None`, `null`, empty strings and empty lists count as "no input".
    pub fn validate_and_convert(&self, raw: Option<&Value>) -> Result<VarValue, VariableError> {
        match raw {
            Some(value) if !is_blank(value) => self.convert(value),
            _ => {
                if self.default.is_some() {
                    return Ok(self.default_value());
                }
                if self.required && !matches!(self.kind, VariableKind::Boolean) {
                    return Err(VariableError::Required);
                }
                Ok(self.empty_value())
            }
        }
    }

    fn convert(&self, value: &Value) -> Result<VarValue, VariableError> {
        match &self.kind {
            VariableKind::String {
                min_length,
                max_length,
                regex,
            } => {
                let s = coerce_string(value)?;
                let len = s.chars().count();
                if let Some(min) = min_length.filter(|&min| len < min) {
                    return Err(invalid(format!(
                        "Ensure this value has at least {} characters (it has {}).",
                        min, len
                    )));
                }
                if let Some(max) = max_length.filter(|&max| len > max) {
                    return Err(invalid(format!(
                        "Ensure this value has at most {} characters (it has {}).",
                        max, len
                    )));
                }
                if let Some(pattern) = regex {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| VariableError::Definition(e.to_string()))?;
                    if !re.is_match(&s) {
                        return Err(invalid("Enter a valid value."));
                    }
                }
                Ok(VarValue::String(s))
            }
            VariableKind::Text => coerce_string(value).map(VarValue::String),
            VariableKind::Integer {
                min_value,
                max_value,
            } => {
                let i = coerce_integer(value)?;
                if let Some(min) = min_value.filter(|&min| i < min) {
                    return Err(invalid(format!(
                        "Ensure this value is greater than or equal to {}.",
                        min
                    )));
                }
                if let Some(max) = max_value.filter(|&max| i > max) {
                    return Err(invalid(format!(
                        "Ensure this value is less than or equal to {}.",
                        max
                    )));
                }
                Ok(VarValue::Integer(i))
            }
            VariableKind::Boolean => coerce_bool(value).map(VarValue::Bool),
            VariableKind::Choice { choices } => {
                let s = coerce_string(value)?;
                check_choice(choices, &s)?;
                Ok(VarValue::String(s))
            }
            VariableKind::MultiChoice { choices } => {
                let items = coerce_list(value)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let s = coerce_string(&item)?;
                    check_choice(choices, &s)?;
                    out.push(s);
                }
                Ok(VarValue::List(out))
            }
            VariableKind::Object { model } => coerce_object(model, value).map(VarValue::Object),
            VariableKind::MultiObject { model } => {
                let items = coerce_list(value)?;
                items
                    .iter()
                    .map(|item| coerce_object(model, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(VarValue::Objects)
            }
            VariableKind::File => coerce_file(value).map(VarValue::Json),
            VariableKind::IpAddress => {
                let s = coerce_string(value)?;
                let addr: IpAddr = s
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not a valid IP address.", s)))?;
                Ok(VarValue::String(addr.to_string()))
            }
            VariableKind::IpAddressWithMask => {
                let s = coerce_string(value)?;
                let prefix: IpPrefix = s.parse().map_err(invalid)?;
                Ok(VarValue::String(prefix.to_string()))
            }
            VariableKind::IpNetwork {
                min_prefix_length,
                max_prefix_length,
            } => {
                let s = coerce_string(value)?;
                let prefix: IpPrefix = s.parse().map_err(invalid)?;
                if let Some(min) = min_prefix_length.filter(|&min| prefix.prefix_len < min) {
                    return Err(invalid(format!(
                        "Prefix length must be at least {}.",
                        min
                    )));
                }
                if let Some(max) = max_prefix_length.filter(|&max| prefix.prefix_len > max) {
                    return Err(invalid(format!("Prefix length must be at most {}.", max)));
                }
                Ok(VarValue::String(prefix.network().to_string()))
            }
            VariableKind::Json => match value {
                Value::String(s) => serde_json::from_str(s)
                    .map(VarValue::Json)
                    .map_err(|_| invalid("Enter a valid JSON.")),
                other => Ok(VarValue::Json(other.clone())),
            },
        }
    }

    /// Describe this variable as a form input field
    pub fn render_as_input_field(&self, name: &str, current: Option<&Value>) -> FieldDescriptor {
        let mut attrs = BTreeMap::new();
        let mut choices = Vec::new();

        match &self.kind {
            VariableKind::String {
                min_length,
                max_length,
                regex,
            } => {
                if let Some(min) = min_length {
                    attrs.insert("minlength".to_string(), Value::from(*min));
                }
                if let Some(max) = max_length {
                    attrs.insert("maxlength".to_string(), Value::from(*max));
                }
                if let Some(pattern) = regex {
                    attrs.insert("pattern".to_string(), Value::from(pattern.clone()));
                }
            }
            VariableKind::Integer {
                min_value,
                max_value,
            } => {
                if let Some(min) = min_value {
                    attrs.insert("min".to_string(), Value::from(*min));
                }
                if let Some(max) = max_value {
                    attrs.insert("max".to_string(), Value::from(*max));
                }
            }
            VariableKind::Choice { choices: c } | VariableKind::MultiChoice { choices: c } => {
                choices = c.clone();
            }
            VariableKind::Object { model } | VariableKind::MultiObject { model } => {
                attrs.insert("data-model".to_string(), Value::from(model.clone()));
            }
            VariableKind::IpNetwork {
                min_prefix_length,
                max_prefix_length,
            } => {
                if let Some(min) = min_prefix_length {
                    attrs.insert("min_prefix_length".to_string(), Value::from(*min));
                }
                if let Some(max) = max_prefix_length {
                    attrs.insert("max_prefix_length".to_string(), Value::from(*max));
                }
            }
            _ => {}
        }

        let initial = current
            .filter(|v| !is_blank(v))
            .cloned()
            .or_else(|| self.default.clone());

        FieldDescriptor {
            name: name.to_string(),
            widget: self.kind.widget(),
            label: self.label.clone().unwrap_or_else(|| humanize(name)),
            help_text: self.description.clone(),
            required: self.required && !matches!(self.kind, VariableKind::Boolean),
            initial,
            choices,
            attrs,
        }
    }
}

/// A variable with its declared name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(flatten)]
    pub definition: VariableDefinition,
}

/// Per-field validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(pub BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, msgs)| format!("{}: {}", field, msgs.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Validated job input, keyed by variable name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobData(BTreeMap<String, VarValue>);

impl JobData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: VarValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(VarValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(VarValue::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(VarValue::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VarValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Validate a raw input map against an ordered variable set
pub fn validate_job_data(
    variables: &[VariableSpec],
    raw: &Map<String, Value>,
) -> Result<JobData, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    for key in raw.keys() {
        if !variables.iter().any(|v| &v.name == key) {
            errors.add(key.clone(), "Job data contained an unknown property");
        }
    }

    let mut data = JobData::new();
    for spec in variables {
        match spec.definition.validate_and_convert(raw.get(&spec.name)) {
            Ok(value) => data.insert(spec.name.clone(), value),
            Err(e) => errors.add(spec.name.clone(), e.to_string()),
        }
    }

    if errors.is_empty() {
        Ok(data)
    } else {
        Err(errors)
    }
}

// =============================================================================
// Coercion helpers
// =============================================================================

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn coerce_string(value: &Value) -> Result<String, VariableError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(invalid("Enter a valid string.")),
    }
}

fn coerce_integer(value: &Value) -> Result<i64, VariableError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| invalid("Enter a whole number.")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("Enter a whole number.")),
        _ => Err(invalid("Enter a whole number.")),
    }
}

fn coerce_bool(value: &Value) -> Result<bool, VariableError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid("Enter a valid boolean.")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Ok(true),
            "false" | "off" | "no" | "0" => Ok(false),
            _ => Err(invalid("Enter a valid boolean.")),
        },
        _ => Err(invalid("Enter a valid boolean.")),
    }
}

fn coerce_list(value: &Value) -> Result<Vec<Value>, VariableError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Value::String(p.to_string()))
            .collect()),
        other => Ok(vec![other.clone()]),
    }
}

fn check_choice(choices: &[Choice], value: &str) -> Result<(), VariableError> {
    if choices.iter().any(|c| c.value == value) {
        Ok(())
    } else {
        Err(invalid(format!(
            "Select a valid choice. {} is not one of the available choices.",
            value
        )))
    }
}

fn coerce_object(model: &str, value: &Value) -> Result<ObjectRef, VariableError> {
    let (id, display) = match value {
        Value::String(s) => (s.clone(), None),
        Value::Number(n) => (n.to_string(), None),
        Value::Object(map) => {
            if let Some(given) = map.get("model").and_then(Value::as_str).filter(|g| *g != model) {
                return Err(invalid(format!(
                    "Expected a {} object, got {}.",
                    model, given
                )));
            }
            let id = match map.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(invalid("Object reference is missing an 'id'.")),
            };
            let display = map
                .get("display")
                .and_then(Value::as_str)
                .map(str::to_string);
            (id, display)
        }
        _ => return Err(invalid("Select a valid object.")),
    };

    Ok(ObjectRef {
        model: model.to_string(),
        id,
        display,
    })
}

fn coerce_file(value: &Value) -> Result<Value, VariableError> {
    match value {
        Value::String(name) => Ok(serde_json::json!({ "name": name, "content": null })),
        Value::Object(map) => {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("Uploaded file is missing a 'name'."))?;
            let content = map.get("content").cloned().unwrap_or(Value::Null);
            if !content.is_null() && !content.is_string() {
                return Err(invalid("File content must be a string."));
            }
            Ok(serde_json::json!({ "name": name, "content": content }))
        }
        _ => Err(invalid("No file was submitted.")),
    }
}

fn inverted<T: PartialOrd + Copy>(min: Option<T>, max: Option<T>) -> Option<(T, T)> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Some((min, max)),
        _ => None,
    }
}

fn humanize(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
