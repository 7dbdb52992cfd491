//! Job class registry
//!
//! Classes are indexed `grouping -> module -> class name`. The registry is
//! built once per process and shared by reference. Sources are pluggable
//! `SourceProvider`s and each one owns its grouping: loading a source builds
//! the grouping's new modules without holding the lock, then replaces the
//! old ones under a single write. Lookups never see a half-loaded grouping.

mod git;
mod source;

pub use git::{
    GitCli, GitRepository, GitSource, GitSynchronizer, RefreshNotifier, SourceRefreshed,
    sync_repository,
};
pub use source::{JobApp, LocalSource, LuaDirectorySource, PluginSource, SourceProvider};

use sluice_core::domain::job::{ClassPath, DescriptorError, JobDescriptor, SourceGrouping};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::JobClass;

pub type ModuleClasses = BTreeMap<String, Arc<dyn JobClass>>;
pub type SourceModules = BTreeMap<String, ModuleClasses>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job class not found: {0}")]
    NotFound(String),

    #[error("job class {0} is already registered")]
    Duplicate(ClassPath),

    #[error("invalid job class {path}: {source}")]
    Invalid {
        path: ClassPath,
        #[source]
        source: DescriptorError,
    },

    #[error("no job source for {0}")]
    UnknownSource(SourceGrouping),

    #[error("failed to load {grouping}/{module}: {message}")]
    Load {
        grouping: SourceGrouping,
        module: String,
        message: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to do when a class path is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep the first class and log a warning
    #[default]
    FirstWins,
    /// Refuse the second registration
    Reject,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Option<DuplicatePolicy> {
        match s {
            "first_wins" => Some(DuplicatePolicy::FirstWins),
            "reject" => Some(DuplicatePolicy::Reject),
            _ => None,
        }
    }
}

pub struct Registry {
    classes: RwLock<BTreeMap<SourceGrouping, SourceModules>>,
    providers: RwLock<Vec<Arc<dyn SourceProvider>>>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            classes: RwLock::new(BTreeMap::new()),
            providers: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Add a source; its classes are loaded by `discover_all` or `reload_source`
    pub fn add_source(&self, provider: Arc<dyn SourceProvider>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    fn provider(&self, grouping: &SourceGrouping) -> Option<Arc<dyn SourceProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| &p.grouping() == grouping)
            .cloned()
    }

    /// Register one class
    ///
    /// Registering the very same class object again is a no-op.
    pub fn register(&self, class: Arc<dyn JobClass>) -> Result<(), RegistryError> {
        let descriptor = class.descriptor();
        let path = descriptor.class_path.clone();
        descriptor.validate().map_err(|source| RegistryError::Invalid {
            path: path.clone(),
            source,
        })?;

        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        let modules = classes.entry(path.grouping.clone()).or_default();
        self.insert(modules, path, class).map(|_| ())
    }

    /// Add a class to one grouping's modules, applying the duplicate policy
    ///
    /// Returns whether the class was added.
    fn insert(
        &self,
        modules: &mut SourceModules,
        path: ClassPath,
        class: Arc<dyn JobClass>,
    ) -> Result<bool, RegistryError> {
        let module = modules.entry(path.module.clone()).or_default();

        if let Some(existing) = module.get(&path.class_name) {
            if Arc::ptr_eq(existing, &class) {
                return Ok(false);
            }
            return match self.policy {
                DuplicatePolicy::FirstWins => {
                    warn!("Job class {} is already registered, keeping the first", path);
                    Ok(false)
                }
                DuplicatePolicy::Reject => Err(RegistryError::Duplicate(path)),
            };
        }

        debug!("Registered job class {}", path);
        module.insert(path.class_name.clone(), class);
        Ok(true)
    }

    pub fn resolve(&self, path: &ClassPath) -> Result<Arc<dyn JobClass>, RegistryError> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path.grouping)
            .and_then(|modules| modules.get(&path.module))
            .and_then(|classes| classes.get(&path.class_name))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))
    }

    /// Resolve a `grouping/module/Class` string
    pub fn resolve_str(&self, path: &str) -> Result<Arc<dyn JobClass>, RegistryError> {
        let path = ClassPath::parse(path).map_err(|_| RegistryError::NotFound(path.to_string()))?;
        self.resolve(&path)
    }

    /// Load every source and return the full catalog
    ///
    /// A source that fails to load is logged and skipped so one broken
    /// repository does not hide the others.
    pub fn discover_all(&self) -> BTreeMap<SourceGrouping, SourceModules> {
        let providers: Vec<_> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for provider in providers {
            let grouping = provider.grouping();
            match self.load_source(provider.as_ref()) {
                Ok(count) => info!("Discovered {} job classes in {}", count, grouping),
                Err(e) => warn!("Failed to discover jobs in {}: {}", grouping, e),
            }
        }
        self.snapshot()
    }

    /// Load a source and replace its grouping in one step
    fn load_source(&self, provider: &dyn SourceProvider) -> Result<usize, RegistryError> {
        let grouping = provider.grouping();
        let modules = self.collect_source(provider)?;
        let count = modules.values().map(|m| m.len()).sum();

        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grouping, modules);
        Ok(count)
    }

    /// Build a grouping's modules without touching the live index
    fn collect_source(&self, provider: &dyn SourceProvider) -> Result<SourceModules, RegistryError> {
        let grouping = provider.grouping();
        let mut modules = SourceModules::new();
        for module in provider.list_modules()? {
            let classes = match provider.load(&module) {
                Ok(classes) => classes,
                Err(e) => {
                    warn!("Skipping module {}: {}", module, e);
                    continue;
                }
            };
            for class in classes {
                let descriptor = class.descriptor();
                let path = descriptor.class_path.clone();
                if path.grouping != grouping {
                    warn!("Skipping job class {}: not part of {}", path, grouping);
                    continue;
                }
                if let Err(source) = descriptor.validate() {
                    warn!(
                        "Skipping job class {}: {}",
                        path,
                        RegistryError::Invalid { path: path.clone(), source }
                    );
                    continue;
                }
                if let Err(e) = self.insert(&mut modules, path.clone(), class) {
                    warn!("Skipping job class {}: {}", path, e);
                }
            }
        }
        // Modules whose only classes were skipped
        modules.retain(|_, classes| !classes.is_empty());
        Ok(modules)
    }

    /// Drop every class of a grouping and its cached modules
    pub fn unload_source(&self, grouping: &SourceGrouping) -> usize {
        if let Some(provider) = self.provider(grouping) {
            provider.invalidate();
        }
        let removed = self
            .classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(grouping)
            .map(|modules| modules.values().map(|m| m.len()).sum())
            .unwrap_or(0);
        info!("Unloaded {} job classes from {}", removed, grouping);
        removed
    }

    /// Discover a grouping again
    ///
    /// The previous classes stay resolvable until the new ones replace them.
    /// When listing the source fails, the previous classes are kept.
    pub fn reload_source(&self, grouping: &SourceGrouping) -> Result<usize, RegistryError> {
        let provider = self
            .provider(grouping)
            .ok_or_else(|| RegistryError::UnknownSource(grouping.clone()))?;
        provider.invalidate();
        self.load_source(provider.as_ref())
    }

    pub fn snapshot(&self) -> BTreeMap<SourceGrouping, SourceModules> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Descriptors of every class, hidden ones only on request
    pub fn list(&self, include_hidden: bool) -> Vec<JobDescriptor> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(|modules| modules.values())
            .flat_map(|classes| classes.values())
            .map(|class| class.descriptor())
            .filter(|d| include_hidden || !d.meta.hidden)
            .cloned()
            .collect()
    }

    /// Number of classes registered under a grouping
    pub fn count(&self, grouping: &SourceGrouping) -> usize {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(grouping)
            .map(|modules| modules.values().map(|m| m.len()).sum())
            .unwrap_or(0)
    }

    /// Reload a source every time the notifier reports it refreshed
    pub fn spawn_refresh_listener(self: &Arc<Self>, notifier: &RefreshNotifier) -> JoinHandle<()> {
        let mut events = notifier.subscribe();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Refresh listener lagged, {} events skipped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let registry = Arc::clone(&registry);
                let grouping = event.grouping.clone();
                let reloaded =
                    tokio::task::spawn_blocking(move || registry.reload_source(&grouping)).await;
                match reloaded {
                    Ok(Ok(count)) => {
                        info!("Reloaded {} job classes from {}", count, event.grouping)
                    }
                    Ok(Err(e)) => warn!("Failed to reload {}: {}", event.grouping, e),
                    Err(e) => warn!("Reload of {} panicked: {}", event.grouping, e),
                }
            }
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
