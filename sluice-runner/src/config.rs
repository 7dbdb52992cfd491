//! Worker configuration
//!
//! Defines polling intervals, job sources, the data store and the
//! orchestrator connection. Everything comes from the environment.

use anyhow::{Context, Result};
use sluice_core::domain::job::DEFAULT_TASK_QUEUE;
use sluice_jobs::registry::GitRepository;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to poll the orchestrator for pending results
    pub poll_interval: Duration,

    /// How often buffered job logs are sent while a job runs
    pub log_send_interval: Duration,

    pub heartbeat_interval: Duration,

    /// Jobs executed at the same time
    pub max_parallel_jobs: usize,

    /// Task queues this worker consumes
    pub task_queues: Vec<String>,

    /// Directory of local Lua job modules
    pub jobs_root: PathBuf,

    /// Where Git repositories are checked out
    pub git_root: PathBuf,

    pub git_repositories: Vec<GitRepository>,

    pub git_refresh_interval: Duration,

    /// Postgres URL for job data; jobs use an in-memory store without it
    pub data_database_url: Option<String>,

    /// Extra redaction regexes applied to job log messages
    pub log_redaction_patterns: Vec<String>,

    /// Where to write the Lua type stubs for job authors
    pub lua_stubs_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, orchestrator_url: String) -> Self {
        Self {
            worker_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(2),
            log_send_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            max_parallel_jobs: 4,
            task_queues: vec![DEFAULT_TASK_QUEUE.to_string()],
            jobs_root: PathBuf::from("jobs"),
            git_root: PathBuf::from("git"),
            git_repositories: Vec::new(),
            git_refresh_interval: Duration::from_secs(300),
            data_database_url: None,
            log_redaction_patterns: Vec::new(),
            lua_stubs_path: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 2)
    /// - LOG_SEND_INTERVAL (optional, seconds, default: 1)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - MAX_PARALLEL_JOBS (optional, default: 4)
    /// - TASK_QUEUES (optional, comma list, default: default)
    /// - JOBS_ROOT, GIT_ROOT (optional paths)
    /// - GIT_REPOSITORIES (optional, `slug=url@branch` comma list)
    /// - GIT_REFRESH_INTERVAL (optional, seconds, default: 300)
    /// - DATA_DATABASE_URL (optional)
    /// - LOG_REDACTION_PATTERNS (optional, `;` separated regexes)
    /// - LUA_STUBS_PATH (optional)
    pub fn from_env() -> Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .map_err(|_| anyhow::anyhow!("WORKER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(worker_id, orchestrator_url);
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override defaults with whatever `lookup` knows about
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let secs = |name: &str| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        if let Some(interval) = secs("POLL_INTERVAL") {
            self.poll_interval = interval;
        }
        if let Some(interval) = secs("LOG_SEND_INTERVAL") {
            self.log_send_interval = interval;
        }
        if let Some(interval) = secs("HEARTBEAT_INTERVAL") {
            self.heartbeat_interval = interval;
        }
        if let Some(interval) = secs("GIT_REFRESH_INTERVAL") {
            self.git_refresh_interval = interval;
        }
        if let Some(max) = lookup("MAX_PARALLEL_JOBS").and_then(|s| s.parse::<usize>().ok()) {
            self.max_parallel_jobs = max;
        }
        if let Some(queues) = lookup("TASK_QUEUES") {
            self.task_queues = split_list(&queues, ',');
        }
        if let Some(root) = lookup("JOBS_ROOT") {
            self.jobs_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("GIT_ROOT") {
            self.git_root = PathBuf::from(root);
        }
        if let Some(repositories) = lookup("GIT_REPOSITORIES") {
            self.git_repositories = GitRepository::parse_list(&repositories)
                .context("Invalid GIT_REPOSITORIES")?;
        }
        self.data_database_url = lookup("DATA_DATABASE_URL").filter(|url| !url.is_empty());
        if let Some(patterns) = lookup("LOG_REDACTION_PATTERNS") {
            self.log_redaction_patterns = split_list(&patterns, ';');
        }
        self.lua_stubs_path = lookup("LUA_STUBS_PATH").map(PathBuf::from);
        Ok(())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_send_interval.is_zero() {
            anyhow::bail!("log_send_interval must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.task_queues.is_empty() {
            anyhow::bail!("at least one task queue is required");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.task_queues, vec!["default"]);
        assert!(config.data_database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("POLL_INTERVAL", "7"),
                ("MAX_PARALLEL_JOBS", "8"),
                ("TASK_QUEUES", "default, priority"),
                ("GIT_REPOSITORIES", "netops=https://git.example.com/netops.git@prod"),
                ("LOG_REDACTION_PATTERNS", r"community \S+; key=\S+"),
                ("DATA_DATABASE_URL", ""),
            ]))
            .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.max_parallel_jobs, 8);
        assert_eq!(config.task_queues, vec!["default", "priority"]);
        assert_eq!(config.git_repositories[0].branch, "prod");
        assert_eq!(config.log_redaction_patterns.len(), 2);
        assert!(config.data_database_url.is_none());
    }

    #[test]
    fn test_bad_repository_list_is_an_error() {
        let mut config = Config::default();
        assert!(config.apply_env(lookup(&[("GIT_REPOSITORIES", "nope")])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.worker_id = String::new();
        assert!(config.validate().is_err());
        config.worker_id = "worker-1".to_string();

        config.orchestrator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.orchestrator_url = "http://localhost:8080".to_string();

        config.task_queues.clear();
        assert!(config.validate().is_err());
    }
}
