//! Job hook and job button registrations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::change::{ChangeAction, ObjectChange};
use crate::domain::job::ClassPath;

/// Binds a hook receiver job to object-change events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHook {
    pub id: Uuid,
    pub name: String,
    pub class_path: ClassPath,
    /// Model labels this hook listens to
    pub content_types: Vec<String>,
    pub actions: Vec<ChangeAction>,
    pub enabled: bool,
}

impl JobHook {
    pub fn new(name: impl Into<String>, class_path: ClassPath) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            class_path,
            content_types: Vec::new(),
            actions: vec![ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete],
            enabled: true,
        }
    }

    pub fn for_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_types.push(content_type.into());
        self
    }

    pub fn on_actions(mut self, actions: Vec<ChangeAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn matches(&self, change: &ObjectChange) -> bool {
        self.enabled
            && self.actions.contains(&change.action)
            && self
                .content_types
                .iter()
                .any(|ct| ct == &change.changed_object_type)
    }
}

/// A UI button that runs a button receiver job against one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobButton {
    pub id: Uuid,
    pub name: String,
    pub class_path: ClassPath,
    pub content_types: Vec<String>,
    pub enabled: bool,
}

impl JobButton {
    pub fn new(name: impl Into<String>, class_path: ClassPath) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            class_path,
            content_types: Vec::new(),
            enabled: true,
        }
    }

    pub fn for_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_types.push(content_type.into());
        self
    }

    pub fn applies_to(&self, model: &str) -> bool {
        self.enabled && self.content_types.iter().any(|ct| ct == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_matching() {
        let hook = JobHook::new("sync", ClassPath::local("hooks", "Sync"))
            .for_content_type("dcim.device")
            .on_actions(vec![ChangeAction::Update]);

        assert!(hook.matches(&ObjectChange::new("dcim.device", "1", ChangeAction::Update)));
        assert!(!hook.matches(&ObjectChange::new("dcim.device", "1", ChangeAction::Create)));
        assert!(!hook.matches(&ObjectChange::new("dcim.site", "1", ChangeAction::Update)));

        let disabled = JobHook {
            enabled: false,
            ..hook
        };
        assert!(!disabled.matches(&ObjectChange::new("dcim.device", "1", ChangeAction::Update)));
    }

    #[test]
    fn test_button_applies_to() {
        let button = JobButton::new("Audit", ClassPath::local("buttons", "Audit"))
            .for_content_type("dcim.device");
        assert!(button.applies_to("dcim.device"));
        assert!(!button.applies_to("ipam.prefix"));
    }
}
