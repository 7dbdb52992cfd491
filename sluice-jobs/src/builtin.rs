//! Jobs shipped with every worker under `plugins/example_app`

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sluice_core::domain::change::{ChangeAction, ObjectChange};
use sluice_core::domain::job::{ClassPath, JobDescriptor, JobKind, JobMeta};
use sluice_core::domain::log::{LogLevel, ObjectRef};
use sluice_core::domain::variable::{JobData, VariableDefinition};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{JobContext, SOFT_TIME_LIMIT_EXCEEDED};
use crate::job::{Job, JobClass, JobFailure, NativeJobClass};
use crate::receivers::{
    ButtonReceiverJob, HookReceiverJob, JobButtonReceiver, JobHookReceiver, with_receiver_variables,
};
use crate::registry::JobApp;

pub const EXAMPLE_APP: &str = "example_app";

/// The built-in app with every example job
pub fn builtin_app() -> JobApp {
    JobApp::new(EXAMPLE_APP)
        .with_job(test_pass())
        .with_job(test_fail_without_abort())
        .with_job(soft_time_limit())
        .with_job(singleton())
        .with_job(dry_run())
        .with_job(hook_receiver())
        .with_job(button_receiver())
}

fn descriptor(class_name: &str, description: &str) -> JobDescriptor {
    JobDescriptor::new(ClassPath::plugin(EXAMPLE_APP, class_name), class_name)
        .with_description(description)
}

fn plain_meta() -> JobMeta {
    JobMeta {
        has_sensitive_variables: false,
        ..JobMeta::default()
    }
}

// =============================================================================
// Test jobs
// =============================================================================

struct TestPass;

#[async_trait]
impl Job for TestPass {
    async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
        ctx.logger().info("Success");
        Ok(Some(Value::Bool(true)))
    }
}

pub fn test_pass() -> Arc<dyn JobClass> {
    NativeJobClass::new(
        descriptor("TestPass", "Logs one entry and succeeds").with_meta(plain_meta()),
        || TestPass,
    )
    .into_arc()
}

struct TestFailWithoutAbort;

#[async_trait]
impl Job for TestFailWithoutAbort {
    async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
        ctx.fail("Failure");
        ctx.logger().info("I can keep going after the failure");
        ctx.logger().info("Done");
        Ok(None)
    }
}

pub fn test_fail_without_abort() -> Arc<dyn JobClass> {
    NativeJobClass::new(
        descriptor("TestFailWithoutAbort", "Marks itself failed and keeps running")
            .with_meta(plain_meta()),
        || TestFailWithoutAbort,
    )
    .into_arc()
}

// =============================================================================
// Time limits
// =============================================================================

struct SoftTimeLimit;

#[async_trait]
impl Job for SoftTimeLimit {
    async fn run(&mut self, ctx: &JobContext, _data: &JobData) -> Result<Option<Value>, JobFailure> {
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match ctx.check_soft_limit() {
                Ok(()) => continue,
                Err(e) if e.exc_type == SOFT_TIME_LIMIT_EXCEEDED => {
                    ctx.logger().warning("Soft time limit reached, cleaning up");
                    return Ok(Some(json!("cleaned up")));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(json!("finished")))
    }
}

pub fn soft_time_limit() -> Arc<dyn JobClass> {
    let meta = JobMeta {
        soft_time_limit: Some(1),
        time_limit: Some(5),
        ..plain_meta()
    };
    NativeJobClass::new(
        descriptor("ExampleSoftTimeLimitJob", "Sleeps past its soft time limit").with_meta(meta),
        || SoftTimeLimit,
    )
    .into_arc()
}

// =============================================================================
// Singleton and data
// =============================================================================

struct Singleton;

#[async_trait]
impl Job for Singleton {
    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure> {
        let device = data.get_str("device").unwrap_or_default();
        ctx.logger().info(format!("Holding the lock for {}", device));
        Ok(None)
    }
}

pub fn singleton() -> Arc<dyn JobClass> {
    let meta = JobMeta {
        is_singleton: true,
        singleton_keys: vec!["device".to_string()],
        ..plain_meta()
    };
    NativeJobClass::new(
        descriptor("ExampleSingletonJob", "One run per device at a time")
            .with_variable("device", VariableDefinition::string())
            .with_meta(meta),
        || Singleton,
    )
    .into_arc()
}

struct DryRun;

#[async_trait]
impl Job for DryRun {
    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure> {
        let hostname = data.get_str("hostname").unwrap_or_default().to_string();
        let key = format!("devices/{}", hostname);
        ctx.data()?
            .put(&key, json!({ "hostname": hostname, "status": "active" }))
            .await?;
        ctx.logger()
            .entry(LogLevel::Success, format!("Created device {}", hostname))
            .object(ObjectRef::new("dcim.device", &hostname))
            .emit();
        Ok(Some(Value::String(key)))
    }
}

pub fn dry_run() -> Arc<dyn JobClass> {
    let meta = JobMeta {
        dryrun_default: true,
        ..plain_meta()
    };
    NativeJobClass::new(
        descriptor("ExampleDryRunJob", "Creates a device unless run as a dry run")
            .with_variable("hostname", VariableDefinition::string())
            .with_meta(meta),
        || DryRun,
    )
    .into_arc()
}

// =============================================================================
// Receivers
// =============================================================================

struct LogChanges;

#[async_trait]
impl JobHookReceiver for LogChanges {
    async fn receive_job_hook(
        &mut self,
        ctx: &JobContext,
        change: &ObjectChange,
        action: ChangeAction,
        _changed_object: Option<&Map<String, Value>>,
    ) -> Result<(), JobFailure> {
        let object = change.object_ref();
        ctx.logger()
            .entry(LogLevel::Info, format!("{} {}", action, object))
            .object(object.clone())
            .emit();
        if action == ChangeAction::Update {
            for (field, diff) in change.diff() {
                ctx.logger()
                    .entry(
                        LogLevel::Info,
                        format!("{}: {} -> {}", field, diff.before, diff.after),
                    )
                    .object(object.clone())
                    .emit();
            }
        }
        Ok(())
    }
}

pub fn hook_receiver() -> Arc<dyn JobClass> {
    let descriptor = descriptor("ExampleJobHookReceiver", "Logs every change it receives")
        .with_kind(JobKind::JobHookReceiver)
        .with_meta(plain_meta());
    NativeJobClass::new(with_receiver_variables(descriptor), || {
        HookReceiverJob(LogChanges)
    })
    .into_arc()
}

struct CheckAndLog;

/// `dcim.device` -> `dcim.change_device`
fn change_permission(model: &str) -> String {
    match model.split_once('.') {
        Some((app, name)) => format!("{}.change_{}", app, name),
        None => format!("change_{}", model),
    }
}

#[async_trait]
impl JobButtonReceiver for CheckAndLog {
    async fn receive_job_button(&mut self, ctx: &JobContext, target: &ObjectRef) -> Result<(), JobFailure> {
        let perm = change_permission(&target.model);
        let allowed = ctx.user().map(|u| u.has_perm(&perm)).unwrap_or(false);
        if !allowed {
            ctx.logger()
                .entry(LogLevel::Failure, format!("You do not have permission to run this job ({})", perm))
                .object(target.clone())
                .emit();
            return Ok(());
        }
        ctx.logger()
            .entry(LogLevel::Success, format!("Button pressed on {}", target))
            .object(target.clone())
            .emit();
        Ok(())
    }
}

pub fn button_receiver() -> Arc<dyn JobClass> {
    let descriptor = descriptor("ExampleSimpleJobButtonReceiver", "Logs the object it was pressed on")
        .with_kind(JobKind::JobButtonReceiver)
        .with_meta(plain_meta());
    NativeJobClass::new(with_receiver_variables(descriptor), || {
        ButtonReceiverJob(CheckAndLog)
    })
    .into_arc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PluginSource, Registry, SourceProvider};
    use sluice_core::domain::job::SourceGrouping;

    #[test]
    fn test_builtin_app_registers_cleanly() {
        let registry = Registry::default();
        registry.add_source(Arc::new(PluginSource::new(vec![builtin_app()])));
        registry.discover_all();
        assert_eq!(registry.count(&SourceGrouping::Plugins), 7);
        assert!(registry.resolve_str("plugins/example_app/TestPass").is_ok());

        let source = PluginSource::new(vec![builtin_app()]);
        assert_eq!(source.list_modules().unwrap(), vec![EXAMPLE_APP]);
    }

    #[test]
    fn test_change_permission() {
        assert_eq!(change_permission("dcim.device"), "dcim.change_device");
        assert_eq!(change_permission("widget"), "change_widget");
    }
}
