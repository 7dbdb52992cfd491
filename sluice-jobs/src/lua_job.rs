//! Lua job adapter
//!
//! Every execution gets a fresh sandbox, created on first use inside a
//! blocking thread. Lifecycle calls are serialized on that sandbox. The
//! `log`, `input`, `ctx` and `data` modules read the context of the call in
//! progress from a shared slot.
//!
//! When a lifecycle future is dropped (the hard time limit) the abort flag
//! is raised and the instruction hook stops the VM.

use async_trait::async_trait;
use serde_json::{Value, json};
use sluice_core::domain::job::{ClassPath, JobDescriptor, JobKind};
use sluice_core::domain::job_result::JobStatus;
use sluice_core::domain::variable::JobData;
use sluice_lua::sandbox::TIME_LIMIT_EXCEEDED;
use sluice_lua::{
    ClassDefinition, CtxModule, DataAccess, DataModule, InputModule, InputProvider, JobControl,
    LimitFlags, LogModule, LogSink, LuaClassSpec, LuaFailure, LuaLogRecord, ModuleRegistry,
    create_sandbox, install_time_limits,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;

use crate::context::JobContext;
use crate::engine::transaction::DataHandle;
use crate::job::{Completion, Job, JobClass, JobFailure};
use crate::receivers::{decode_button_object, decode_object_change, with_receiver_variables};

/// A class declared by a Lua job module
pub struct LuaJobClass {
    descriptor: JobDescriptor,
    source: Arc<str>,
    class_name: String,
    checks: Vec<String>,
}

impl LuaJobClass {
    pub fn new(spec: &LuaClassSpec, class_path: ClassPath, source: Arc<str>) -> Self {
        Self {
            descriptor: with_receiver_variables(spec.descriptor(class_path)),
            source,
            class_name: spec.class_name.clone(),
            checks: spec.checks.clone(),
        }
    }
}

impl JobClass for LuaJobClass {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn instantiate(&self) -> Result<Box<dyn Job>, JobFailure> {
        Ok(Box::new(LuaJob {
            source: self.source.clone(),
            class_name: self.class_name.clone(),
            kind: self.descriptor.kind,
            checks: self.checks.clone(),
            slot: ContextSlot::default(),
            state: Arc::new(Mutex::new(None)),
            abort: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct LoadedClass {
    lua: mlua::Lua,
    class: ClassDefinition,
}

/// One execution of a Lua job class
pub struct LuaJob {
    source: Arc<str>,
    class_name: String,
    kind: JobKind,
    checks: Vec<String>,
    slot: ContextSlot,
    state: Arc<Mutex<Option<LoadedClass>>>,
    abort: Arc<AtomicBool>,
}

/// Raises the abort flags unless disarmed
struct AbortOnDrop {
    call: Arc<AtomicBool>,
    vm: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.call.store(true, Ordering::SeqCst);
            self.vm.store(true, Ordering::SeqCst);
        }
    }
}

fn lua_failure(err: &mlua::Error) -> JobFailure {
    let failure = LuaFailure::from(err);
    JobFailure {
        exc_type: failure.exc_type,
        message: failure.message,
        traceback: failure.traceback,
    }
}

impl LuaJob {
    async fn call(
        &mut self,
        ctx: &JobContext,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, JobFailure> {
        self.slot.set(ctx.clone());

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut guard = AbortOnDrop {
            call: cancelled.clone(),
            vm: self.abort.clone(),
            armed: true,
        };

        let state = self.state.clone();
        let source = self.source.clone();
        let class_name = self.class_name.clone();
        let slot = self.slot.clone();
        let flags = LimitFlags {
            soft: ctx.soft_limit_flag(),
            abort: self.abort.clone(),
        };
        let handle = Handle::current();
        let function = function.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let mut loaded = state.lock().unwrap_or_else(PoisonError::into_inner);
            // Any earlier call has finished: the flag belongs to this one now
            flags.abort.store(false, Ordering::SeqCst);
            if cancelled.load(Ordering::SeqCst) {
                return Err(JobFailure::new(TIME_LIMIT_EXCEEDED, "job terminated"));
            }

            if loaded.is_none() {
                *loaded = Some(load_class(&source, &class_name, slot, flags, handle)?);
            }
            let Some(loaded) = loaded.as_ref() else {
                return Err(JobFailure::runtime("Lua class is not loaded"));
            };
            loaded
                .class
                .call(&loaded.lua, &function, &args)
                .map_err(|e| lua_failure(&e))
        })
        .await;
        guard.armed = false;

        joined.unwrap_or_else(|e| Err(JobFailure::runtime(format!("Lua worker stopped: {}", e))))
    }
}

fn load_class(
    source: &str,
    class_name: &str,
    slot: ContextSlot,
    flags: LimitFlags,
    handle: Handle,
) -> Result<LoadedClass, JobFailure> {
    let lua = create_sandbox().map_err(|e| lua_failure(&e))?;

    ModuleRegistry::new()
        .with(LogModule::new(ContextLogSink(slot.clone())))
        .and_then(|r| r.with(InputModule::new(ContextInputs(slot.clone()))))
        .and_then(|r| r.with(CtxModule::new(ContextControl(slot.clone()))))
        .and_then(|r| r.with(DataModule::new(ContextData { slot, handle })))
        .and_then(|r| r.register_all(&lua))
        .map_err(|e| lua_failure(&e))?;

    // Module level code already ran once during discovery
    let class = ClassDefinition::load(&lua, source, class_name)?;
    install_time_limits(&lua, flags);
    Ok(LoadedClass { lua, class })
}

fn optional(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

fn failure_json(failure: &JobFailure) -> Value {
    json!({
        "exc_type": failure.exc_type,
        "message": failure.message,
        "traceback": failure.traceback,
    })
}

#[async_trait]
impl Job for LuaJob {
    async fn before_start(&mut self, ctx: &JobContext) -> Result<(), JobFailure> {
        self.call(ctx, "before_start", Vec::new()).await.map(|_| ())
    }

    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure> {
        let returned = match self.kind {
            JobKind::Standard => self.call(ctx, "run", vec![data.to_json()]).await?,
            JobKind::JobHookReceiver => {
                let change = decode_object_change(data)?;
                let changed_object = change
                    .postchange_data
                    .clone()
                    .map(Value::Object)
                    .unwrap_or(Value::Null);
                let action = change.action.as_str().to_string();
                let change = serde_json::to_value(&change)
                    .map_err(|e| JobFailure::runtime(format!("Invalid object change: {}", e)))?;
                self.call(
                    ctx,
                    "receive_job_hook",
                    vec![change, Value::String(action), changed_object],
                )
                .await?
            }
            JobKind::JobButtonReceiver => {
                let object = decode_button_object(data)?;
                let object = serde_json::to_value(&object)
                    .map_err(|e| JobFailure::runtime(format!("Invalid object: {}", e)))?;
                self.call(ctx, "receive_job_button", vec![object]).await?
            }
        };
        Ok(optional(returned))
    }

    fn additional_checks(&self) -> Vec<String> {
        self.checks.clone()
    }

    async fn run_check(&mut self, ctx: &JobContext, name: &str) -> Result<(), JobFailure> {
        if !self.checks.iter().any(|c| c == name) {
            return Err(JobFailure::runtime(format!("Unknown check '{}'", name)));
        }
        self.call(ctx, name, Vec::new()).await.map(|_| ())
    }

    async fn on_success(&mut self, ctx: &JobContext, value: Option<&Value>) -> Result<(), JobFailure> {
        let value = value.cloned().unwrap_or(Value::Null);
        self.call(ctx, "on_success", vec![value]).await.map(|_| ())
    }

    async fn on_failure(&mut self, ctx: &JobContext, failure: &JobFailure) -> Result<(), JobFailure> {
        self.call(ctx, "on_failure", vec![failure_json(failure)])
            .await
            .map(|_| ())
    }

    async fn after_return(
        &mut self,
        ctx: &JobContext,
        status: JobStatus,
        completion: &Completion,
    ) -> Result<(), JobFailure> {
        let (value, error) = match completion {
            Completion::Returned(value) => (value.clone().unwrap_or(Value::Null), Value::Null),
            Completion::Raised(failure) => (Value::Null, failure_json(failure)),
        };
        self.call(
            ctx,
            "after_return",
            vec![Value::String(status.as_str().to_string()), value, error],
        )
        .await
        .map(|_| ())
    }
}

// =============================================================================
// Runtime module backends
// =============================================================================

/// Context of the lifecycle call in progress
#[derive(Clone, Default)]
struct ContextSlot(Arc<Mutex<Option<JobContext>>>);

impl ContextSlot {
    fn set(&self, ctx: JobContext) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(ctx);
    }

    fn get(&self) -> Option<JobContext> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

struct ContextLogSink(ContextSlot);

impl LogSink for ContextLogSink {
    fn write(&mut self, record: LuaLogRecord) {
        let Some(ctx) = self.0.get() else {
            return;
        };
        let mut entry = ctx
            .logger()
            .entry(record.level, record.message)
            .maybe_object(record.object);
        if let Some(grouping) = record.grouping {
            entry = entry.grouping(grouping);
        }
        if record.skip_db {
            entry = entry.skip_db();
        }
        entry.emit();
    }
}

struct ContextInputs(ContextSlot);

impl InputProvider for ContextInputs {
    fn get(&self, name: &str) -> Option<Value> {
        self.0
            .get()
            .and_then(|ctx| ctx.inputs().get(name).map(|v| v.to_json()))
    }

    fn keys(&self) -> Vec<String> {
        self.0
            .get()
            .map(|ctx| ctx.inputs().iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }
}

struct ContextControl(ContextSlot);

impl JobControl for ContextControl {
    fn fail(&self, message: &str) {
        if let Some(ctx) = self.0.get() {
            ctx.fail(message);
        }
    }

    fn is_dryrun(&self) -> bool {
        self.0.get().map(|ctx| ctx.dryrun()).unwrap_or(false)
    }

    fn username(&self) -> Option<String> {
        self.0
            .get()
            .and_then(|ctx| ctx.user().map(|u| u.username.clone()))
    }

    fn has_perm(&self, perm: &str) -> bool {
        self.0
            .get()
            .and_then(|ctx| ctx.user().map(|u| u.has_perm(perm)))
            .unwrap_or(false)
    }

    fn soft_limit_reached(&self) -> bool {
        self.0
            .get()
            .map(|ctx| ctx.soft_limit_reached())
            .unwrap_or(false)
    }

    fn job_result_id(&self) -> String {
        self.0
            .get()
            .map(|ctx| ctx.job_result_id().to_string())
            .unwrap_or_default()
    }
}

struct ContextData {
    slot: ContextSlot,
    handle: Handle,
}

impl ContextData {
    fn data(&self) -> Result<DataHandle, String> {
        let ctx = self.slot.get().ok_or("no execution in progress")?;
        ctx.data().cloned().map_err(|f| f.message)
    }
}

impl DataAccess for ContextData {
    fn get(&self, key: &str) -> Result<Option<Value>, String> {
        let data = self.data()?;
        self.handle
            .block_on(data.get(key))
            .map_err(|e| e.to_string())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), String> {
        let data = self.data()?;
        self.handle
            .block_on(data.put(key, value))
            .map_err(|e| e.to_string())
    }

    fn delete(&self, key: &str) -> Result<bool, String> {
        let data = self.data()?;
        self.handle
            .block_on(data.delete(key))
            .map_err(|e| e.to_string())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, String> {
        let data = self.data()?;
        self.handle
            .block_on(data.keys(prefix))
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use crate::engine::transaction::{MemoryDataStore, TransactionScope};
    use sluice_core::domain::change::{ChangeAction, ObjectChange};
    use sluice_core::domain::log::LogLevel;
    use sluice_core::domain::variable::VarValue;
    use sluice_lua::parse_job_module;
    use std::time::Duration;

    fn class(source: &str, class_name: &str) -> LuaJobClass {
        let specs = parse_job_module(source).unwrap();
        let spec = specs.iter().find(|s| s.class_name == class_name).unwrap();
        LuaJobClass::new(spec, ClassPath::local("tests", class_name), Arc::from(source))
    }

    const GREETER: &str = r#"
        local Greeter = job.define {
            name = "Greeter",
            variables = { job.string("name") },
            checks = { "verify" },
        }
        function Greeter:before_start()
            log.info("warming up")
        end
        function Greeter:run(data)
            log.success("hello " .. input.get("name"), { object = { model = "dcim.device", id = 7 } })
            if ctx.dryrun() then log.info("dry") end
            return { greeted = data.name }
        end
        function Greeter:verify()
            log.info("verified", { grouping = "checks" })
        end
        return { Greeter = Greeter }
    "#;

    fn greeter_data() -> JobData {
        let mut data = JobData::new();
        data.insert("name", VarValue::String("edge".into()));
        data
    }

    #[tokio::test]
    async fn test_lifecycle_calls_reach_lua() {
        let class = class(GREETER, "Greeter");
        assert_eq!(class.descriptor().variables.len(), 1);

        let mut job = class.instantiate().unwrap();
        let ctx = test_context().with_inputs(greeter_data());

        ctx.enter("before_start");
        job.before_start(&ctx).await.unwrap();
        ctx.enter("run");
        let value = job.run(&ctx, ctx.inputs()).await.unwrap();
        assert_eq!(value, Some(json!({"greeted": "edge"})));

        assert_eq!(job.additional_checks(), vec!["verify"]);
        job.run_check(&ctx, "verify").await.unwrap();
        assert!(job.run_check(&ctx, "run").await.is_err());

        let entries = ctx.logger().buffer().drain();
        let summary: Vec<(&str, &str, LogLevel)> = entries
            .iter()
            .map(|e| (e.grouping.as_str(), e.message.as_str(), e.level))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("before_start", "warming up", LogLevel::Info),
                ("run", "hello edge", LogLevel::Success),
                ("checks", "verified", LogLevel::Info),
            ]
        );
        assert_eq!(entries[1].object.as_ref().unwrap().id, "7");
    }

    #[tokio::test]
    async fn test_lua_error_becomes_failure() {
        let source = r#"
            local Broken = job.define { run = function(self) error("boom") end }
            return { Broken = Broken }
        "#;
        let mut job = class(source, "Broken").instantiate().unwrap();
        let failure = job.run(&test_context(), &JobData::new()).await.unwrap_err();
        assert_eq!(failure.exc_type, "LuaError");
        assert!(failure.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_ctx_fail_does_not_stop_lua() {
        let source = r#"
            local Flaky = job.define { run = function(self)
                ctx.fail("boom")
                log.info("still here")
                return 1
            end }
            return { Flaky = Flaky }
        "#;
        let mut job = class(source, "Flaky").instantiate().unwrap();
        let ctx = test_context();
        assert_eq!(job.run(&ctx, &JobData::new()).await.unwrap(), Some(json!(1)));
        assert_eq!(ctx.outcome().failure_message(), Some("boom"));
        assert_eq!(ctx.logger().buffer().drain().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_data_module_uses_transaction() {
        let source = r#"
            local Writer = job.define { run = function(self)
                data.put("site/ams", { name = "Amsterdam" })
                return data.get("site/ams").name
            end }
            return { Writer = Writer }
        "#;
        let store = MemoryDataStore::new();
        let scope = TransactionScope::open(&store).await.unwrap();
        let ctx = test_context().with_data(scope.handle());

        let mut job = class(source, "Writer").instantiate().unwrap();
        assert_eq!(
            job.run(&ctx, &JobData::new()).await.unwrap(),
            Some(json!("Amsterdam"))
        );
        scope.commit_unless(false).await.unwrap();
        assert_eq!(store.snapshot()["site/ams"], json!({"name": "Amsterdam"}));

        // Outside run() there is no transaction
        let mut job = class(source, "Writer").instantiate().unwrap();
        let failure = job.run(&test_context(), &JobData::new()).await.unwrap_err();
        assert!(failure.message.contains("data:"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_call_aborts_vm() {
        let source = r#"
            local Spin = job.define { run = function(self) while true do end end }
            function Spin:after_return(status) log.info("after " .. status) end
            return { Spin = Spin }
        "#;
        let mut job = class(source, "Spin").instantiate().unwrap();
        let ctx = test_context();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(200), job.run(&ctx, &JobData::new())).await;
        assert!(timed_out.is_err());

        // The VM stops and serves the next lifecycle call
        let completion = Completion::Raised(JobFailure::new(TIME_LIMIT_EXCEEDED, "terminated"));
        tokio::time::timeout(
            Duration::from_secs(10),
            job.after_return(&ctx, JobStatus::Errored, &completion),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(ctx.logger().buffer().drain()[0].message, "after errored");
    }

    #[tokio::test]
    async fn test_soft_limit_is_raised_in_lua() {
        let source = r#"
            local Slow = job.define { run = function(self)
                local ok, err = pcall(function() while true do end end)
                log.warning("wound down: " .. tostring(ctx.soft_limit_reached()))
                return tostring(err)
            end }
            return { Slow = Slow }
        "#;
        let mut job = class(source, "Slow").instantiate().unwrap();
        let ctx = test_context();
        ctx.signal_soft_limit();

        let value = job.run(&ctx, &JobData::new()).await.unwrap().unwrap();
        assert!(value.as_str().unwrap().contains("SoftTimeLimitExceeded"));
        assert_eq!(
            ctx.logger().buffer().drain()[0].message,
            "wound down: true"
        );
    }

    #[tokio::test]
    async fn test_hook_receiver_gets_change() {
        let source = r#"
            local OnChange = job.hook_receiver { receive_job_hook = function(self, change, action, obj)
                return { action = action, model = change.changed_object_type, name = obj.name }
            end }
            return { OnChange = OnChange }
        "#;
        let class = class(source, "OnChange");
        assert!(class.descriptor().variable("object_change").is_some());

        let mut post = serde_json::Map::new();
        post.insert("name".into(), json!("edge-01"));
        let change = ObjectChange::new("dcim.device", "1", ChangeAction::Update).with_postchange(post);
        let mut data = JobData::new();
        data.insert("object_change", VarValue::Json(serde_json::to_value(&change).unwrap()));

        let mut job = class.instantiate().unwrap();
        let value = job.run(&test_context(), &data).await.unwrap();
        assert_eq!(
            value,
            Some(json!({"action": "update", "model": "dcim.device", "name": "edge-01"}))
        );
    }
}
