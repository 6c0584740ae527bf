//! Tasks and their JSON definitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stepkit_core::{SchemaInfo, TaskResult};
use stepkit_navigation::{ConditionalStepNavigator, NavigatorDefinition, TrackingRule};

use crate::action::AsyncActionConfiguration;
use crate::error::Result;

/// A navigable task.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task identifier
    pub identifier: String,

    /// Schema the results conform to
    pub schema_info: Option<SchemaInfo>,

    /// Step navigation
    pub navigator: Arc<ConditionalStepNavigator>,

    /// Recorders that run alongside the steps
    pub async_actions: Vec<AsyncActionConfiguration>,
}

impl Task {
    /// Create a task with no async actions.
    pub fn new(identifier: impl Into<String>, navigator: ConditionalStepNavigator) -> Self {
        Self {
            identifier: identifier.into(),
            schema_info: None,
            navigator: Arc::new(navigator),
            async_actions: Vec::new(),
        }
    }

    /// Set the schema info.
    pub fn with_schema_info(mut self, schema_info: SchemaInfo) -> Self {
        self.schema_info = Some(schema_info);
        self
    }

    /// Set the async actions.
    pub fn with_async_actions(mut self, actions: Vec<AsyncActionConfiguration>) -> Self {
        self.async_actions = actions;
        self
    }

    /// A fresh result for a run of this task.
    pub fn instantiate_task_result(&self) -> TaskResult {
        TaskResult::new(self.identifier.clone()).with_schema_info(self.schema_info.clone())
    }

    /// Check the step graph.
    pub fn validate(&self) -> Result<()> {
        self.navigator.validate()?;
        Ok(())
    }

    /// Actions that start when the path shows `step`.
    pub fn async_actions_to_start<'a>(
        &'a self,
        step: &'a stepkit_navigation::Step,
        is_first_step: bool,
    ) -> impl Iterator<Item = &'a AsyncActionConfiguration> + 'a {
        self.async_actions
            .iter()
            .filter(move |config| config.starts_at(step, is_first_step))
    }
}

/// Serialized task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Task identifier
    pub identifier: String,

    /// Schema the results conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_info: Option<SchemaInfo>,

    /// Steps and progress markers
    #[serde(flatten)]
    pub navigator: NavigatorDefinition,

    /// Recorders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub async_actions: Vec<AsyncActionConfiguration>,
}

impl TaskDefinition {
    /// Parse a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the task, injecting `tracking_rules` into every navigator.
    pub fn build(&self, tracking_rules: &[Arc<dyn TrackingRule>]) -> Result<Task> {
        Ok(Task {
            identifier: self.identifier.clone(),
            schema_info: self.schema_info.clone(),
            navigator: Arc::new(self.navigator.build(tracking_rules)?),
            async_actions: self.async_actions.clone(),
        })
    }
}
