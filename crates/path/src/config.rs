//! Task path configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Configuration for a [`TaskPath`](crate::TaskPath).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    /// Validate each task's step graph before its first step
    pub validate_on_load: bool,

    /// Stop running actions when the run is cancelled, keeping their results
    pub stop_actions_on_cancel: bool,

    /// Actions whose failure halts navigation
    #[serde(default)]
    pub critical_actions: BTreeSet<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            validate_on_load: true,
            stop_actions_on_cancel: true,
            critical_actions: BTreeSet::new(),
        }
    }
}

impl PathConfig {
    /// Whether a failure of `identifier` halts navigation.
    pub fn is_critical(&self, identifier: &str) -> bool {
        self.critical_actions.contains(identifier)
    }
}
