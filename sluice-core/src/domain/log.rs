//! Log domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A persisted job log entry
///
/// Entries are immutable once appended and ordered by `seq` within a job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    /// Lifecycle method or check name that produced the entry
    pub grouping: String,
    pub object: Option<ObjectRef>,
    pub message: String,
}

/// Job log severity, including the domain-specific SUCCESS and FAILURE levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Failure,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Failure => "failure",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "success" => Some(LogLevel::Success),
            "warning" => Some(LogLevel::Warning),
            "failure" => Some(LogLevel::Failure),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a platform object (device, prefix, ...) by model and id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Model label, e.g. `dcim.device`
    pub model: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ObjectRef {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(display) => write!(f, "{} ({}:{})", display, self.model, self.id),
            None => write!(f, "{}:{}", self.model, self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_round_trip_names() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Success,
            LogLevel::Warning,
            LogLevel::Failure,
            LogLevel::Error,
            LogLevel::Critical,
        ] {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(LogLevel::parse("fatal"), None);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Success < LogLevel::Warning);
        assert!(LogLevel::Failure > LogLevel::Warning);
        assert!(LogLevel::Critical > LogLevel::Error);
    }

    #[test]
    fn test_object_ref_display() {
        let obj = ObjectRef::new("dcim.device", "42").with_display("edge-01");
        assert_eq!(obj.to_string(), "edge-01 (dcim.device:42)");
    }
}
