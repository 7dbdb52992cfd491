//! Job hook and job button receivers
//!
//! Receivers are jobs with a fixed input. A hook receiver gets the
//! `object_change` that triggered it; a button receiver gets the `object`
//! the button was pressed on.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sluice_core::domain::change::{ChangeAction, ObjectChange};
use sluice_core::domain::hook::{JobButton, JobHook};
use sluice_core::domain::job::{JobDescriptor, JobKind};
use sluice_core::domain::log::ObjectRef;
use sluice_core::domain::user::RequestUser;
use sluice_core::domain::variable::{JobData, VarValue, VariableDefinition};
use sluice_core::dto::job::EnqueueJob;
use tracing::{debug, warn};

use crate::context::JobContext;
use crate::engine::dispatcher::{DispatchError, Dispatched, Dispatcher};
use crate::job::{Job, JobFailure};

/// Input of a hook receiver
pub const OBJECT_CHANGE_VAR: &str = "object_change";

/// Input of a button receiver
pub const OBJECT_VAR: &str = "object";

/// Add the fixed receiver input to a receiver descriptor
pub fn with_receiver_variables(descriptor: JobDescriptor) -> JobDescriptor {
    match descriptor.kind {
        JobKind::JobHookReceiver if descriptor.variable(OBJECT_CHANGE_VAR).is_none() => descriptor
            .with_variable(
                OBJECT_CHANGE_VAR,
                VariableDefinition::json().with_description("The change that triggered the hook"),
            ),
        JobKind::JobButtonReceiver if descriptor.variable(OBJECT_VAR).is_none() => descriptor
            .with_variable(
                OBJECT_VAR,
                VariableDefinition::json().with_description("The object the button was pressed on"),
            ),
        _ => descriptor,
    }
}

fn json_input<'a>(data: &'a JobData, name: &str) -> Result<&'a Value, JobFailure> {
    match data.get(name) {
        Some(VarValue::Json(value)) => Ok(value),
        _ => Err(JobFailure::runtime(format!("Missing receiver input '{}'", name))),
    }
}

pub fn decode_object_change(data: &JobData) -> Result<ObjectChange, JobFailure> {
    serde_json::from_value(json_input(data, OBJECT_CHANGE_VAR)?.clone())
        .map_err(|e| JobFailure::runtime(format!("Invalid object change: {}", e)))
}

pub fn decode_button_object(data: &JobData) -> Result<ObjectRef, JobFailure> {
    serde_json::from_value(json_input(data, OBJECT_VAR)?.clone())
        .map_err(|e| JobFailure::runtime(format!("Invalid button object: {}", e)))
}

// =============================================================================
// Receiver traits
// =============================================================================

#[async_trait]
pub trait JobHookReceiver: Send {
    /// `changed_object` is the post-change snapshot, `None` after a delete
    async fn receive_job_hook(
        &mut self,
        ctx: &JobContext,
        change: &ObjectChange,
        action: ChangeAction,
        changed_object: Option<&Map<String, Value>>,
    ) -> Result<(), JobFailure>;
}

#[async_trait]
pub trait JobButtonReceiver: Send {
    async fn receive_job_button(&mut self, ctx: &JobContext, target: &ObjectRef) -> Result<(), JobFailure>;
}

/// Runs a `JobHookReceiver` as a job
pub struct HookReceiverJob<R>(pub R);

#[async_trait]
impl<R: JobHookReceiver> Job for HookReceiverJob<R> {
    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure> {
        let change = decode_object_change(data)?;
        self.0
            .receive_job_hook(ctx, &change, change.action, change.postchange_data.as_ref())
            .await?;
        Ok(None)
    }
}

/// Runs a `JobButtonReceiver` as a job
pub struct ButtonReceiverJob<R>(pub R);

#[async_trait]
impl<R: JobButtonReceiver> Job for ButtonReceiverJob<R> {
    async fn run(&mut self, ctx: &JobContext, data: &JobData) -> Result<Option<Value>, JobFailure> {
        let target = decode_button_object(data)?;
        self.0.receive_job_button(ctx, &target).await?;
        Ok(None)
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Turns object changes and button presses into receiver runs
pub struct HookDispatcher<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> HookDispatcher<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Enqueue every enabled hook matching `change`
    ///
    /// One failing hook does not stop the others; each outcome is returned
    /// with the hook's name.
    pub async fn dispatch(
        &self,
        hooks: &[JobHook],
        change: &ObjectChange,
    ) -> Vec<(String, Result<Dispatched, DispatchError>)> {
        let payload = match serde_json::to_value(change) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot serialize object change {}: {}", change.id, e);
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        for hook in hooks.iter().filter(|h| h.matches(change)) {
            debug!("Object change {} matches hook {}", change.id, hook.name);
            let mut data = Map::new();
            data.insert(OBJECT_CHANGE_VAR.to_string(), payload.clone());
            let mut request = EnqueueJob::new(data);
            if let Some(user) = &change.user {
                request = request.with_user(RequestUser::new(user.clone()));
            }

            let outcome = self
                .dispatcher
                .enqueue_kind(&hook.class_path, request, JobKind::JobHookReceiver)
                .await;
            if let Err(e) = &outcome {
                warn!("Job hook {} failed to enqueue: {}", hook.name, e);
            }
            outcomes.push((hook.name.clone(), outcome));
        }
        outcomes
    }

    /// Run the receiver behind `button` for `object`
    pub async fn press(
        &self,
        button: &JobButton,
        object: &ObjectRef,
        user: Option<RequestUser>,
    ) -> Result<Dispatched, DispatchError> {
        if !button.enabled || !button.applies_to(&object.model) {
            return Err(DispatchError::ButtonNotApplicable {
                button: button.name.clone(),
                model: object.model.clone(),
            });
        }

        let payload = serde_json::to_value(object)
            .map_err(|e| DispatchError::Payload(e.to_string()))?;
        let mut data = Map::new();
        data.insert(OBJECT_VAR.to_string(), payload);
        let mut request = EnqueueJob::new(data);
        request.user = user;

        self.dispatcher
            .enqueue_kind(&button.class_path, request, JobKind::JobButtonReceiver)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use sluice_core::domain::job::ClassPath;
    use sluice_core::domain::log::LogLevel;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(ChangeAction, Option<String>)>>>,
    }

    #[async_trait]
    impl JobHookReceiver for Recorder {
        async fn receive_job_hook(
            &mut self,
            _ctx: &JobContext,
            _change: &ObjectChange,
            action: ChangeAction,
            changed_object: Option<&Map<String, Value>>,
        ) -> Result<(), JobFailure> {
            let name = changed_object
                .and_then(|o| o.get("name"))
                .and_then(|n| n.as_str())
                .map(String::from);
            self.seen.lock().unwrap().push((action, name));
            Ok(())
        }
    }

    struct NeedsPerm;

    #[async_trait]
    impl JobButtonReceiver for NeedsPerm {
        async fn receive_job_button(&mut self, ctx: &JobContext, target: &ObjectRef) -> Result<(), JobFailure> {
            let allowed = ctx.user().map(|u| u.has_perm("dcim.change_device")).unwrap_or(false);
            if !allowed {
                ctx.logger().failure(format!("Not allowed to touch {}", target.id));
                return Ok(());
            }
            ctx.logger().success(format!("Touched {}", target.id));
            Ok(())
        }
    }

    fn change_data(change: &ObjectChange) -> JobData {
        let mut data = JobData::new();
        data.insert(OBJECT_CHANGE_VAR, VarValue::Json(serde_json::to_value(change).unwrap()));
        data
    }

    #[tokio::test]
    async fn test_hook_receiver_decodes_change() {
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let mut job = HookReceiverJob(recorder);

        let mut post = Map::new();
        post.insert("name".into(), Value::String("edge-01".into()));
        let created = ObjectChange::new("dcim.device", "1", ChangeAction::Create).with_postchange(post);
        job.run(&test_context(), &change_data(&created)).await.unwrap();

        let deleted = ObjectChange::new("dcim.device", "1", ChangeAction::Delete);
        job.run(&test_context(), &change_data(&deleted)).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ChangeAction::Create, Some("edge-01".to_string())),
                (ChangeAction::Delete, None)
            ]
        );

        let err = job.run(&test_context(), &JobData::new()).await.unwrap_err();
        assert!(err.message.contains(OBJECT_CHANGE_VAR));
    }

    #[tokio::test]
    async fn test_button_receiver_checks_permission_itself() {
        let mut job = ButtonReceiverJob(NeedsPerm);
        let mut data = JobData::new();
        data.insert(
            OBJECT_VAR,
            VarValue::Json(serde_json::to_value(ObjectRef::new("dcim.device", "9")).unwrap()),
        );

        let ctx = test_context();
        job.run(&ctx, &data).await.unwrap();
        let entries = ctx.logger().buffer().drain();
        assert_eq!(entries[0].level, LogLevel::Failure);

        let ctx = test_context().with_user(Some(
            RequestUser::new("alice").with_permission("dcim.change_device"),
        ));
        job.run(&ctx, &data).await.unwrap();
        assert_eq!(ctx.logger().buffer().drain()[0].message, "Touched 9");
    }

    #[test]
    fn test_receiver_variables_are_added_once() {
        let descriptor = JobDescriptor::new(ClassPath::local("m", "Hook"), "Hook")
            .with_kind(JobKind::JobHookReceiver);
        let descriptor = with_receiver_variables(with_receiver_variables(descriptor));
        assert_eq!(descriptor.variables.len(), 1);
        assert_eq!(descriptor.variables[0].name, OBJECT_CHANGE_VAR);

        let standard = with_receiver_variables(JobDescriptor::new(ClassPath::local("m", "J"), "J"));
        assert!(standard.variables.is_empty());
    }
}
