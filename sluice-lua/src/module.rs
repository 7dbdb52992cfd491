use mlua::prelude::*;

/// Trait for Sluice Lua modules.
///
/// Each module exposes one global table to job code running in the sandbox.
/// Modules must have a unique identifier, which is also the global name.
///
/// # Example
///
/// ```rust
/// use sluice_lua::module::SluiceModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl SluiceModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("epoch", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\n---@class clock\nclock = {}\n".to_string()
///     }
/// }
/// ```
pub trait SluiceModule: Send + Sync {
    /// Returns the unique identifier for this module.
    ///
    /// Used as the global variable name in Lua: an `id()` of `"log"` is
    /// reachable from job code as `log.info(...)`. Must be a valid, unique,
    /// lowercase Lua identifier.
    fn id(&self) -> &'static str;

    /// Registers this module's functions and values into the Lua context.
    ///
    /// Called once per sandbox. Implementations build their table and set it
    /// as the global named by `id()`.
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// Lua Language Server annotations for job authors, starting with `---@meta`
    fn stubs(&self) -> String;

    /// Module metadata, used when listing the modules available to jobs
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "0.1.0",
            description: "",
            author: "",
        }
    }
}

/// Metadata about a Sluice module
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    /// Module identifier
    pub id: &'static str,
    /// Module version (semver)
    pub version: &'static str,
    /// Brief description of module functionality
    pub description: &'static str,
    /// Module author
    pub author: &'static str,
}

/// The set of modules loaded into one job sandbox
///
/// Built per execution, since most modules capture the running job's context.
pub struct ModuleRegistry {
    modules: Vec<Box<dyn SluiceModule>>,
}

impl ModuleRegistry {
    /// Creates a new empty module registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module, rejecting a second module with the same id
    pub fn register<M: SluiceModule + 'static>(&mut self, module: M) -> LuaResult<()> {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            return Err(LuaError::RuntimeError(format!(
                "Module with id '{}' is already registered",
                id
            )));
        }
        self.modules.push(Box::new(module));
        Ok(())
    }

    /// Builder form of `register` for assembling a sandbox in one expression
    pub fn with<M: SluiceModule + 'static>(mut self, module: M) -> LuaResult<Self> {
        self.register(module)?;
        Ok(self)
    }

    /// Gets a module by its ID
    pub fn get(&self, id: &str) -> Option<&dyn SluiceModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Returns all registered modules
    pub fn modules(&self) -> &[Box<dyn SluiceModule>] {
        &self.modules
    }

    /// Registers all modules into a Lua context, stopping at the first error
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }

    /// Combined stub file for all registered modules
    pub fn generate_stubs(&self) -> String {
        let mut stubs = String::new();
        for module in &self.modules {
            stubs.push_str(&module.stubs());
            stubs.push_str("\n\n");
        }
        stubs
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule;

    impl SluiceModule for TestModule {
        fn id(&self) -> &'static str {
            "test"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }

        fn stubs(&self) -> String {
            "---@meta\n---@class test\ntest = {}".to_string()
        }
    }

    #[test]
    fn test_module_registration() {
        let registry = ModuleRegistry::new().with(TestModule).unwrap();

        assert!(registry.get("test").is_some());
        assert!(registry.get("nonexistent").is_none());

        let lua = Lua::new();
        registry.register_all(&lua).unwrap();
        let value: i32 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule).unwrap();
        let err = registry.register(TestModule).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.modules().len(), 1);
    }

    #[test]
    fn test_stub_generation() {
        let registry = ModuleRegistry::new().with(TestModule).unwrap();

        let stubs = registry.generate_stubs();
        assert!(stubs.contains("---@meta"));
        assert!(stubs.contains("test = {}"));
    }
}
