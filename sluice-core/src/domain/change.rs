//! Object change records
//!
//! Emitted by the platform's change tracking whenever a model instance is
//! created, updated or deleted. Job hooks react to these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::log::ObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after values of one changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub user: Option<String>,
    /// Model label of the changed object, e.g. `dcim.device`
    pub changed_object_type: String,
    pub changed_object_id: String,
    pub action: ChangeAction,
    /// Snapshot before the change, absent on create
    #[serde(default)]
    pub prechange_data: Option<Map<String, Value>>,
    /// Snapshot after the change, absent on delete
    #[serde(default)]
    pub postchange_data: Option<Map<String, Value>>,
}

impl ObjectChange {
    pub fn new(
        changed_object_type: impl Into<String>,
        changed_object_id: impl Into<String>,
        action: ChangeAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            user: None,
            changed_object_type: changed_object_type.into(),
            changed_object_id: changed_object_id.into(),
            action,
            prechange_data: None,
            postchange_data: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_prechange(mut self, data: Map<String, Value>) -> Self {
        self.prechange_data = Some(data);
        self
    }

    pub fn with_postchange(mut self, data: Map<String, Value>) -> Self {
        self.postchange_data = Some(data);
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.changed_object_type, &self.changed_object_id)
    }

    /// Fields whose value differs between the two snapshots
    ///
    /// A field missing from one side is reported with `null` on that side.
    pub fn diff(&self) -> BTreeMap<String, FieldChange> {
        let empty = Map::new();
        let before = self.prechange_data.as_ref().unwrap_or(&empty);
        let after = self.postchange_data.as_ref().unwrap_or(&empty);

        let mut changes = BTreeMap::new();
        for key in before.keys().chain(after.keys()) {
            if changes.contains_key(key) {
                continue;
            }
            let old = before.get(key).cloned().unwrap_or(Value::Null);
            let new = after.get(key).cloned().unwrap_or(Value::Null);
            if old != new {
                changes.insert(
                    key.clone(),
                    FieldChange {
                        before: old,
                        after: new,
                    },
                );
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_diff_update() {
        let change = ObjectChange::new("dcim.device", "7", ChangeAction::Update)
            .with_prechange(map(json!({"name": "edge-01", "status": "planned", "rack": 3})))
            .with_postchange(map(json!({"name": "edge-01", "status": "active", "serial": "X1"})));

        let diff = change.diff();
        assert_eq!(diff.len(), 3);
        assert_eq!(diff["status"].before, json!("planned"));
        assert_eq!(diff["status"].after, json!("active"));
        assert_eq!(diff["rack"].after, Value::Null);
        assert_eq!(diff["serial"].before, Value::Null);
        assert!(!diff.contains_key("name"));
    }

    #[test]
    fn test_diff_create_reports_every_field() {
        let change = ObjectChange::new("ipam.prefix", "1", ChangeAction::Create)
            .with_postchange(map(json!({"prefix": "10.0.0.0/8"})));
        let diff = change.diff();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["prefix"].before, Value::Null);
    }

    #[test]
    fn test_object_ref() {
        let change = ObjectChange::new("dcim.site", "12", ChangeAction::Delete);
        assert_eq!(change.object_ref().to_string(), "dcim.site:12");
    }
}
