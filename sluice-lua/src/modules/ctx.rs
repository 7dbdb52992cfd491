//! Execution context module
//!
//! Gives job code the explicit fail signal and read access to the run's
//! dry-run flag, requesting user and soft time limit state.

use crate::module::{ModuleMetadata, SluiceModule};
use mlua::prelude::*;
use std::sync::Arc;

/// Control surface of a running job
pub trait JobControl: Send + Sync {
    /// Mark the run failed and log a FAILURE entry; does not interrupt the job
    fn fail(&self, message: &str);

    fn is_dryrun(&self) -> bool;

    fn username(&self) -> Option<String>;

    fn has_perm(&self, perm: &str) -> bool;

    fn soft_limit_reached(&self) -> bool;

    fn job_result_id(&self) -> String;
}

pub struct CtxModule<C: JobControl> {
    control: Arc<C>,
}

impl<C: JobControl> CtxModule<C> {
    pub fn new(control: C) -> Self {
        Self {
            control: Arc::new(control),
        }
    }
}

impl<C: JobControl + 'static> SluiceModule for CtxModule<C> {
    fn id(&self) -> &'static str {
        "ctx"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let ctx = lua.create_table()?;

        let control = self.control.clone();
        ctx.set(
            "fail",
            lua.create_function(move |_, message: Option<String>| {
                control.fail(message.as_deref().unwrap_or("Job failed"));
                Ok(())
            })?,
        )?;

        let control = self.control.clone();
        ctx.set(
            "dryrun",
            lua.create_function(move |_, ()| Ok(control.is_dryrun()))?,
        )?;

        let control = self.control.clone();
        ctx.set(
            "user",
            lua.create_function(move |_, ()| Ok(control.username()))?,
        )?;

        let control = self.control.clone();
        ctx.set(
            "has_perm",
            lua.create_function(move |_, perm: String| Ok(control.has_perm(&perm)))?,
        )?;

        let control = self.control.clone();
        ctx.set(
            "soft_limit_reached",
            lua.create_function(move |_, ()| Ok(control.soft_limit_reached()))?,
        )?;

        let control = self.control.clone();
        ctx.set(
            "job_result_id",
            lua.create_function(move |_, ()| Ok(control.job_result_id()))?,
        )?;

        lua.globals().set(self.id(), ctx)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Execution context of the running job
---@class ctx
ctx = {}

---Mark the job as failed without stopping it
---@param message? string
function ctx.fail(message) end

---@return boolean
function ctx.dryrun() end

---Username of the requesting user, if any
---@return string?
function ctx.user() end

---@param perm string e.g. "dcim.change_device"
---@return boolean
function ctx.has_perm(perm) end

---True once the soft time limit has elapsed
---@return boolean
function ctx.soft_limit_reached() end

---@return string
function ctx.job_result_id() end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Job execution context",
            author: "Sluice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestControl {
        failures: Mutex<Vec<String>>,
    }

    impl JobControl for Arc<TestControl> {
        fn fail(&self, message: &str) {
            self.failures.lock().unwrap().push(message.to_string());
        }

        fn is_dryrun(&self) -> bool {
            true
        }

        fn username(&self) -> Option<String> {
            Some("alice".to_string())
        }

        fn has_perm(&self, perm: &str) -> bool {
            perm == "dcim.view_device"
        }

        fn soft_limit_reached(&self) -> bool {
            false
        }

        fn job_result_id(&self) -> String {
            "r-1".to_string()
        }
    }

    #[test]
    fn test_ctx_module() {
        let control = Arc::new(TestControl::default());
        let lua = Lua::new();
        CtxModule::new(control.clone()).register(&lua).unwrap();

        let (dryrun, user, allowed, denied): (bool, String, bool, bool) = lua
            .load(
                r#"
            ctx.fail("bad input")
            ctx.fail()
            return ctx.dryrun(), ctx.user(), ctx.has_perm("dcim.view_device"), ctx.has_perm("dcim.delete_device")
        "#,
            )
            .eval()
            .unwrap();

        assert!(dryrun);
        assert_eq!(user, "alice");
        assert!(allowed);
        assert!(!denied);
        assert_eq!(
            *control.failures.lock().unwrap(),
            vec!["bad input".to_string(), "Job failed".to_string()]
        );
    }
}
