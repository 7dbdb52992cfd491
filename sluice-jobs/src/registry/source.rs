//! Job sources
//!
//! Each provider knows one grouping: it lists the modules it has and turns a
//! module into job classes.

use sluice_core::domain::job::{ClassPath, SourceGrouping};
use sluice_lua::parse_job_module;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::RegistryError;
use crate::job::JobClass;
use crate::lua_job::LuaJobClass;

pub trait SourceProvider: Send + Sync {
    fn grouping(&self) -> SourceGrouping;

    fn list_modules(&self) -> Result<Vec<String>, RegistryError>;

    fn load(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError>;

    /// Forget cached modules so the next load reads them again
    fn invalidate(&self);
}

// =============================================================================
// Lua directories
// =============================================================================

/// A directory of `*.lua` job modules, one module per file
///
/// Parsed modules are cached; the same class objects come back until the
/// cache is invalidated.
pub struct LuaDirectorySource {
    grouping: SourceGrouping,
    dir: PathBuf,
    cache: Mutex<HashMap<String, Vec<Arc<dyn JobClass>>>>,
}

impl LuaDirectorySource {
    pub fn new(grouping: SourceGrouping, dir: impl Into<PathBuf>) -> Self {
        Self {
            grouping,
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parse_file(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError> {
        let path = self.dir.join(format!("{}.lua", module));
        let source = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;

        let specs = parse_job_module(&source).map_err(|e| RegistryError::Load {
            grouping: self.grouping.clone(),
            module: module.to_string(),
            message: format!("{:#}", e),
        })?;

        let source: Arc<str> = Arc::from(source);
        let classes = specs
            .into_iter()
            .map(|spec| {
                let path = ClassPath::new(self.grouping.clone(), module, spec.class_name.clone());
                Arc::new(LuaJobClass::new(&spec, path, source.clone())) as Arc<dyn JobClass>
            })
            .collect();
        Ok(classes)
    }
}

impl SourceProvider for LuaDirectorySource {
    fn grouping(&self) -> SourceGrouping {
        self.grouping.clone()
    }

    fn list_modules(&self) -> Result<Vec<String>, RegistryError> {
        if !self.dir.is_dir() {
            debug!("Job directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut modules = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                modules.push(stem.to_string());
            }
        }
        modules.sort();
        Ok(modules)
    }

    fn load(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError> {
        if let Some(classes) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
        {
            return Ok(classes.clone());
        }

        let classes = self.parse_file(module)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.to_string(), classes.clone());
        Ok(classes)
    }

    fn invalidate(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Jobs in the configured local jobs directory
pub struct LocalSource(LuaDirectorySource);

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(LuaDirectorySource::new(SourceGrouping::Local, root))
    }
}

impl SourceProvider for LocalSource {
    fn grouping(&self) -> SourceGrouping {
        SourceGrouping::Local
    }

    fn list_modules(&self) -> Result<Vec<String>, RegistryError> {
        self.0.list_modules()
    }

    fn load(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError> {
        self.0.load(module)
    }

    fn invalidate(&self) {
        self.0.invalidate()
    }
}

// =============================================================================
// Installed apps
// =============================================================================

/// Jobs contributed by an app compiled into the worker
pub struct JobApp {
    pub name: String,
    pub jobs: Vec<Arc<dyn JobClass>>,
}

impl JobApp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Arc<dyn JobClass>) -> Self {
        self.jobs.push(job);
        self
    }
}

/// The `plugins` grouping: one module per installed app
#[derive(Default)]
pub struct PluginSource {
    apps: Vec<JobApp>,
}

impl PluginSource {
    pub fn new(apps: Vec<JobApp>) -> Self {
        Self { apps }
    }
}

impl SourceProvider for PluginSource {
    fn grouping(&self) -> SourceGrouping {
        SourceGrouping::Plugins
    }

    fn list_modules(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.apps.iter().map(|app| app.name.clone()).collect())
    }

    fn load(&self, module: &str) -> Result<Vec<Arc<dyn JobClass>>, RegistryError> {
        let app = self
            .apps
            .iter()
            .find(|app| app.name == module)
            .ok_or_else(|| RegistryError::Load {
                grouping: SourceGrouping::Plugins,
                module: module.to_string(),
                message: "no such app".to_string(),
            })?;

        for job in &app.jobs {
            let path = &job.descriptor().class_path;
            if path.grouping != SourceGrouping::Plugins || path.module != app.name {
                return Err(RegistryError::Load {
                    grouping: SourceGrouping::Plugins,
                    module: module.to_string(),
                    message: format!("job {} does not belong to app {}", path, app.name),
                });
            }
        }
        Ok(app.jobs.clone())
    }

    fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::registry::tests::native;

    const BACKUP: &str = r#"
        local Backup = job.define { name = "Backup", run = function(self) return true end }
        local Restore = job.define { name = "Restore", run = function(self) end }
        return { Backup = Backup, Restore = Restore }
    "#;

    #[test]
    fn test_local_directory_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backup.lua"), BACKUP).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a job").unwrap();

        let source = LocalSource::new(dir.path());
        assert_eq!(source.list_modules().unwrap(), vec!["backup"]);

        let classes = source.load("backup").unwrap();
        let paths: Vec<String> = classes
            .iter()
            .map(|c| c.descriptor().class_path.to_string())
            .collect();
        assert_eq!(paths, vec!["local/backup/Backup", "local/backup/Restore"]);

        // Cached until invalidated
        let again = source.load("backup").unwrap();
        assert!(Arc::ptr_eq(&classes[0], &again[0]));
        source.invalidate();
        let reloaded = source.load("backup").unwrap();
        assert!(!Arc::ptr_eq(&classes[0], &reloaded[0]));
    }

    #[test]
    fn test_broken_module_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backup.lua"), BACKUP).unwrap();
        std::fs::write(dir.path().join("broken.lua"), "return {").unwrap();

        let registry = Registry::default();
        registry.add_source(Arc::new(LocalSource::new(dir.path())));
        registry.discover_all();
        assert_eq!(registry.count(&SourceGrouping::Local), 2);

        let source = LocalSource::new(dir.path());
        assert!(matches!(
            source.load("broken"),
            Err(RegistryError::Load { .. })
        ));
        assert!(matches!(
            source.load("missing"),
            Err(RegistryError::Io { .. })
        ));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let source = LocalSource::new("/nonexistent/sluice/jobs");
        assert!(source.list_modules().unwrap().is_empty());
    }

    #[test]
    fn test_plugin_source() {
        let app = JobApp::new("example_app").with_job(native(ClassPath::plugin("example_app", "Ping")));
        let source = PluginSource::new(vec![app]);
        assert_eq!(source.list_modules().unwrap(), vec!["example_app"]);
        assert_eq!(source.load("example_app").unwrap().len(), 1);
        assert!(source.load("other").is_err());

        let stray = JobApp::new("stray").with_job(native(ClassPath::local("m", "Job")));
        let source = PluginSource::new(vec![stray]);
        assert!(source.load("stray").is_err());
    }
}
