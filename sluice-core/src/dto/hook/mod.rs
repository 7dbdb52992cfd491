//! Job hook and job button DTOs

use serde::{Deserialize, Serialize};

use crate::domain::change::ChangeAction;
use crate::domain::job::ClassPath;
use crate::domain::log::ObjectRef;
use crate::domain::user::RequestUser;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobHook {
    pub name: String,
    pub class_path: ClassPath,
    pub content_types: Vec<String>,
    pub actions: Vec<ChangeAction>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobButton {
    pub name: String,
    pub class_path: ClassPath,
    pub content_types: Vec<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// A user clicked a job button on an object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobButton {
    pub object: ObjectRef,
    pub user: Option<RequestUser>,
}

fn enabled() -> bool {
    true
}
