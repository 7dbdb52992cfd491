//! Git backed job sources
//!
//! A tracked repository is cloned to `<git_root>/<slug>`. When it provides
//! jobs they live in its `jobs/` directory. After a sync that moved the
//! checkout, a `SourceRefreshed` event tells the registry to reload the
//! repository's grouping.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::domain::job::SourceGrouping;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::RegistryError;
use super::source::{LuaDirectorySource, SourceProvider};
use crate::job::JobClass;

const DEFAULT_BRANCH: &str = "main";

/// Suffix of a `GIT_REPOSITORIES` entry for a repository without jobs
const NO_JOBS_SUFFIX: &str = "#nojobs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepository {
    pub slug: String,
    pub remote_url: String,
    pub branch: String,
    pub provides_jobs: bool,
}

impl GitRepository {
    pub fn new(slug: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            remote_url: remote_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            provides_jobs: true,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn without_jobs(mut self) -> Self {
        self.provides_jobs = false;
        self
    }

    pub fn grouping(&self) -> SourceGrouping {
        SourceGrouping::git(self.slug.clone())
    }

    /// Parse one `slug=url[@branch][#nojobs]` entry
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let (entry, provides_jobs) = match entry.strip_suffix(NO_JOBS_SUFFIX) {
            Some(rest) => (rest, false),
            None => (entry, true),
        };
        let (slug, location) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Repository '{}' must look like slug=url@branch", entry))?;
        let slug = slug.trim();
        if slug.is_empty() || slug.contains('/') || slug.contains('.') {
            return Err(anyhow!("Invalid repository slug '{}'", slug));
        }

        // scp-like urls (git@host:org/repo) contain '@' too; a branch never has ':'
        let (url, branch) = match location.rsplit_once('@') {
            Some((url, branch)) if !url.is_empty() && !branch.contains(':') => (url, branch),
            _ => (location, DEFAULT_BRANCH),
        };
        if url.trim().is_empty() {
            return Err(anyhow!("Repository '{}' has no url", slug));
        }

        let mut repo = GitRepository::new(slug, url.trim()).with_branch(branch.trim());
        repo.provides_jobs = provides_jobs;
        Ok(repo)
    }

    /// Parse a comma separated list of entries
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .filter(|e| !e.trim().is_empty())
            .map(GitRepository::parse)
            .collect()
    }
}

// =============================================================================
// Source
// =============================================================================

/// Jobs of one tracked repository, grouping `git.<slug>`
pub struct GitSource {
    repository: GitRepository,
    jobs: LuaDirectorySource,
}

impl GitSource {
    pub fn new(git_root: &Path, repository: GitRepository) -> Self {
        let jobs = LuaDirectorySource::new(
            repository.grouping(),
            git_root.join(&repository.slug).join("jobs"),
        );
        Self { repository, jobs }
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repository
    }
}

impl SourceProvider for GitSource {
    fn grouping(&self) -> SourceGrouping {
        self.repository.grouping()
    }

    fn list_modules(&self) -> Result<Vec<String>, RegistryError> {
        if !self.repository.provides_jobs {
            return Ok(Vec::new());
        }
        self.jobs.list_modules()
    }

    fn load(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError> {
        self.jobs.load(module)
    }

    fn invalidate(&self) {
        self.jobs.invalidate()
    }
}

// =============================================================================
// Synchronization
// =============================================================================

#[async_trait]
pub trait GitSynchronizer: Send + Sync {
    /// Clone or update the local checkout to `head` (default: branch tip)
    ///
    /// Returns whether the checked out commit changed.
    async fn ensure_local_clone(&self, repository: &GitRepository, head: Option<&str>)
    -> Result<bool>;
}

/// Synchronizer driving the `git` binary
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn checkout_dir(&self, repository: &GitRepository) -> PathBuf {
        self.root.join(&repository.slug)
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut command = Command::new("git");
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let output = command
            .args(args)
            .output()
            .await
            .context("Failed to execute git")?;

        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitSynchronizer for GitCli {
    async fn ensure_local_clone(
        &self,
        repository: &GitRepository,
        head: Option<&str>,
    ) -> Result<bool> {
        let dir = self.checkout_dir(repository);

        if !dir.join(".git").exists() {
            tokio::fs::create_dir_all(&self.root)
                .await
                .with_context(|| format!("Failed to create {}", self.root.display()))?;
            let target = dir.to_string_lossy().to_string();
            info!("Cloning {} into {}", repository.remote_url, target);
            self.git(
                None,
                &[
                    "clone",
                    "--branch",
                    &repository.branch,
                    &repository.remote_url,
                    &target,
                ],
            )
            .await?;
            if let Some(head) = head {
                self.git(Some(&dir), &["reset", "--hard", head]).await?;
            }
            return Ok(true);
        }

        let before = self.git(Some(&dir), &["rev-parse", "HEAD"]).await?;
        match head {
            Some(head) => {
                self.git(Some(&dir), &["fetch", "origin"]).await?;
                self.git(Some(&dir), &["reset", "--hard", head]).await?;
            }
            None => {
                self.git(Some(&dir), &["fetch", "origin", &repository.branch])
                    .await?;
                self.git(Some(&dir), &["reset", "--hard", "FETCH_HEAD"]).await?;
            }
        }
        let after = self.git(Some(&dir), &["rev-parse", "HEAD"]).await?;

        debug!("{}: {} -> {}", repository.slug, before, after);
        Ok(before != after)
    }
}

// =============================================================================
// Refresh notifications
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRefreshed {
    pub grouping: SourceGrouping,
}

/// Broadcasts source refreshes to registry listeners
pub struct RefreshNotifier {
    sender: broadcast::Sender<SourceRefreshed>,
}

impl RefreshNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceRefreshed> {
        self.sender.subscribe()
    }

    /// Returns how many listeners were told
    pub fn notify(&self, grouping: SourceGrouping) -> usize {
        self.sender.send(SourceRefreshed { grouping }).unwrap_or(0)
    }
}

impl Default for RefreshNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Sync one repository and announce it when the checkout moved
pub async fn sync_repository(
    synchronizer: &dyn GitSynchronizer,
    repository: &GitRepository,
    head: Option<&str>,
    notifier: &RefreshNotifier,
) -> Result<bool> {
    let changed = synchronizer
        .ensure_local_clone(repository, head)
        .await
        .with_context(|| format!("Failed to sync repository {}", repository.slug))?;
    if changed {
        info!("Repository {} changed, refreshing its jobs", repository.slug);
        notifier.notify(repository.grouping());
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_parse_entries() {
        let repo = GitRepository::parse("netops=https://git.example.com/netops.git@prod").unwrap();
        assert_eq!(repo.slug, "netops");
        assert_eq!(repo.remote_url, "https://git.example.com/netops.git");
        assert_eq!(repo.branch, "prod");
        assert!(repo.provides_jobs);
        assert_eq!(repo.grouping().to_string(), "git.netops");

        let repo = GitRepository::parse("cfg=git@git.example.com:org/cfg.git#nojobs").unwrap();
        assert_eq!(repo.remote_url, "git@git.example.com:org/cfg.git");
        assert_eq!(repo.branch, "main");
        assert!(!repo.provides_jobs);

        let repos = GitRepository::parse_list("a=https://h/a.git, b=https://h/b.git@dev,").unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[1].branch, "dev");

        assert!(GitRepository::parse("no-equals").is_err());
        assert!(GitRepository::parse("bad/slug=https://h/a.git").is_err());
        assert!(GitRepository::parse("a=").is_err());
    }

    fn write_jobs(root: &Path, slug: &str, modules: &[(&str, &str)]) {
        let dir = root.join(slug).join("jobs");
        std::fs::create_dir_all(&dir).unwrap();
        for (name, source) in modules {
            std::fs::write(dir.join(format!("{}.lua", name)), source).unwrap();
        }
    }

    const THREE_JOBS: &str = r#"
        local A = job.define { run = function(self) end }
        local B = job.define { run = function(self) end }
        local C = job.define { run = function(self) end }
        return { A = A, B = B, C = C }
    "#;

    #[test]
    fn test_git_source_reads_jobs_dir() {
        let root = tempfile::tempdir().unwrap();
        write_jobs(root.path(), "netops", &[("backup", THREE_JOBS)]);

        let source = GitSource::new(root.path(), GitRepository::new("netops", "https://h/n.git"));
        assert_eq!(source.list_modules().unwrap(), vec!["backup"]);
        let classes = source.load("backup").unwrap();
        assert_eq!(
            classes[0].descriptor().class_path.to_string(),
            "git.netops/backup/A"
        );

        let source = GitSource::new(
            root.path(),
            GitRepository::new("netops", "https://h/n.git").without_jobs(),
        );
        assert!(source.list_modules().unwrap().is_empty());
    }

    #[test]
    fn test_unload_and_rediscover_after_jobs_removed() {
        let root = tempfile::tempdir().unwrap();
        write_jobs(root.path(), "netops", &[("backup", THREE_JOBS)]);

        let repo = GitRepository::new("netops", "https://h/n.git");
        let grouping = repo.grouping();
        let registry = Registry::default();
        registry.add_source(Arc::new(GitSource::new(root.path(), repo)));
        registry.discover_all();
        assert_eq!(registry.count(&grouping), 3);

        // The new clone no longer has any job modules
        std::fs::remove_file(root.path().join("netops/jobs/backup.lua")).unwrap();
        registry.unload_source(&grouping);
        assert_eq!(registry.reload_source(&grouping).unwrap(), 0);
        assert_eq!(registry.count(&grouping), 0);
        assert!(
            registry
                .list(true)
                .iter()
                .all(|d| !d.class_path.to_string().starts_with("git.netops/"))
        );
    }

    struct FakeSync {
        changed: AtomicBool,
    }

    #[async_trait]
    impl GitSynchronizer for FakeSync {
        async fn ensure_local_clone(&self, _repo: &GitRepository, _head: Option<&str>) -> Result<bool> {
            Ok(self.changed.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_sync_notifies_only_on_change() {
        let notifier = RefreshNotifier::new();
        let mut events = notifier.subscribe();
        let repo = GitRepository::new("netops", "https://h/n.git");
        let sync = FakeSync {
            changed: AtomicBool::new(false),
        };

        assert!(!sync_repository(&sync, &repo, None, &notifier).await.unwrap());
        assert!(events.try_recv().is_err());

        sync.changed.store(true, Ordering::SeqCst);
        assert!(sync_repository(&sync, &repo, None, &notifier).await.unwrap());
        assert_eq!(events.recv().await.unwrap().grouping, repo.grouping());
    }
}
