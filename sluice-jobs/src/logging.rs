//! Logging bridge
//!
//! Job code logs through a `JobLogger`. Every record is redacted, then always
//! written to the process log (`tracing`, target `sluice::job`) and, unless
//! marked `skip_db`, appended to the result's `LogBuffer` for persistence.

use regex::Regex;
use sluice_core::domain::log::{LogEntry, LogLevel, ObjectRef};
use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tracing target of job log records
pub const JOB_LOG_TARGET: &str = "sluice::job";

/// Grouping used outside any lifecycle method
pub const DEFAULT_GROUPING: &str = "main";

// =============================================================================
// Redaction
// =============================================================================

/// Replacement text for redacted values
pub const REDACTED: &str = "[REDACTED]";

struct RedactionRule {
    regex: Regex,
    replacement: String,
}

/// Regex based scrubbing of secrets from log messages
pub struct Redactor {
    rules: Vec<RedactionRule>,
}

impl Redactor {
    /// A redactor that leaves messages untouched
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in patterns: api keys, bearer JWTs, card numbers, SSNs and
    /// `password=...`-style assignments
    pub fn with_defaults() -> Self {
        let mut redactor = Self::disabled();
        for pattern in [
            r"sk-[a-zA-Z0-9]{20,}",
            r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
            r"\b(?:\d{4}[-\s]?){3}\d{4}\b",
            r"\b\d{3}-\d{2}-\d{4}\b",
        ] {
            if let Ok(regex) = Regex::new(pattern) {
                redactor.rules.push(RedactionRule {
                    regex,
                    replacement: REDACTED.to_string(),
                });
            }
        }
        if let Ok(regex) = Regex::new(r"(?i)\b(password|passwd|secret|token)(\s*[=:]\s*)\S+") {
            redactor.rules.push(RedactionRule {
                regex,
                replacement: format!("${{1}}${{2}}{}", REDACTED),
            });
        }
        redactor
    }

    /// Add a user supplied pattern; matches are replaced wholesale
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.rules.push(RedactionRule {
            regex: Regex::new(pattern)?,
            replacement: REDACTED.to_string(),
        });
        Ok(())
    }

    pub fn redact<'a>(&self, message: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(message);
        for rule in &self.rules {
            if rule.regex.is_match(&result) {
                result = Cow::Owned(
                    rule.regex
                        .replace_all(&result, rule.replacement.as_str())
                        .into_owned(),
                );
            }
        }
        result
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// Buffer
// =============================================================================

#[derive(Default)]
struct BufferInner {
    next_seq: u64,
    pending: Vec<LogEntry>,
}

/// Pending entries of one job result, numbered in emission order
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &self,
        level: LogLevel,
        grouping: String,
        object: Option<ObjectRef>,
        message: String,
    ) -> LogEntry {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_seq += 1;
        let entry = LogEntry {
            seq: inner.next_seq,
            timestamp: chrono::Utc::now(),
            level,
            grouping,
            object,
            message,
        };
        inner.pending.push(entry.clone());
        entry
    }

    /// Take everything emitted since the last drain
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut inner.pending)
    }

    /// Put back entries whose delivery failed, ahead of newer ones
    pub fn requeue(&self, mut entries: Vec<LogEntry>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.append(&mut inner.pending);
        inner.pending = entries;
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_empty()
    }
}

// =============================================================================
// Logger
// =============================================================================

/// Logger handed to job code through the execution context
#[derive(Clone)]
pub struct JobLogger {
    job_result_id: Uuid,
    buffer: LogBuffer,
    redactor: Arc<Redactor>,
    grouping: Arc<Mutex<String>>,
}

impl JobLogger {
    pub fn new(job_result_id: Uuid, buffer: LogBuffer, redactor: Arc<Redactor>) -> Self {
        Self {
            job_result_id,
            buffer,
            redactor,
            grouping: Arc::new(Mutex::new(DEFAULT_GROUPING.to_string())),
        }
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    /// Grouping applied to entries that do not set one
    pub fn set_grouping(&self, grouping: impl Into<String>) {
        *self.grouping.lock().unwrap_or_else(PoisonError::into_inner) = grouping.into();
    }

    pub fn grouping(&self) -> String {
        self.grouping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start building an entry
    pub fn entry(&self, level: LogLevel, message: impl Into<String>) -> LogEntryBuilder<'_> {
        LogEntryBuilder {
            logger: self,
            level,
            message: message.into(),
            object: None,
            grouping: None,
            skip_db: false,
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.entry(level, message).emit();
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn failure(&self, message: impl Into<String>) {
        self.log(LogLevel::Failure, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(LogLevel::Critical, message);
    }
}

/// Builder for one log record
#[must_use = "call emit() to write the entry"]
pub struct LogEntryBuilder<'a> {
    logger: &'a JobLogger,
    level: LogLevel,
    message: String,
    object: Option<ObjectRef>,
    grouping: Option<String>,
    skip_db: bool,
}

impl LogEntryBuilder<'_> {
    pub fn object(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub fn maybe_object(mut self, object: Option<ObjectRef>) -> Self {
        self.object = object;
        self
    }

    pub fn grouping(mut self, grouping: impl Into<String>) -> Self {
        self.grouping = Some(grouping.into());
        self
    }

    /// Write to the process log only
    pub fn skip_db(mut self) -> Self {
        self.skip_db = true;
        self
    }

    /// Emit the record; returns the persisted entry unless `skip_db` was set
    pub fn emit(self) -> Option<LogEntry> {
        let logger = self.logger;
        let message = logger.redactor.redact(&self.message).into_owned();
        let grouping = self.grouping.unwrap_or_else(|| logger.grouping());
        let object = self.object.map(|o| ObjectRef {
            display: o.display.map(|d| logger.redactor.redact(&d).into_owned()),
            ..o
        });

        let id = logger.job_result_id;
        let level = self.level;
        match level {
            LogLevel::Debug => {
                debug!(target: JOB_LOG_TARGET, job_result_id = %id, grouping = %grouping, level = %level, "{}", message)
            }
            LogLevel::Info | LogLevel::Success => {
                info!(target: JOB_LOG_TARGET, job_result_id = %id, grouping = %grouping, level = %level, "{}", message)
            }
            LogLevel::Warning => {
                warn!(target: JOB_LOG_TARGET, job_result_id = %id, grouping = %grouping, level = %level, "{}", message)
            }
            LogLevel::Failure | LogLevel::Error | LogLevel::Critical => {
                error!(target: JOB_LOG_TARGET, job_result_id = %id, grouping = %grouping, level = %level, "{}", message)
            }
        }

        if self.skip_db {
            return None;
        }
        Some(logger.buffer.push(level, grouping, object, message))
    }
}
