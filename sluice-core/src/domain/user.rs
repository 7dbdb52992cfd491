//! Requesting user

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The user on whose behalf a job runs
///
/// Authentication happens outside this subsystem; the permission set is
/// whatever the caller resolved for the user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestUser {
    pub username: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl RequestUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn with_permission(mut self, perm: impl Into<String>) -> Self {
        self.permissions.insert(perm.into());
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    /// Permission names follow `app.action_model`, e.g. `dcim.change_device`
    pub fn has_perm(&self, perm: &str) -> bool {
        self.is_superuser || self.permissions.contains(perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_perm() {
        let user = RequestUser::new("alice").with_permission("dcim.change_device");
        assert!(user.has_perm("dcim.change_device"));
        assert!(!user.has_perm("dcim.delete_device"));
        assert!(RequestUser::new("root").superuser().has_perm("anything"));
    }
}
