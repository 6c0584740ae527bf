//! Async actions: recorders that run alongside the steps.
//!
//! An action is declared by an [`AsyncActionConfiguration`] on the task,
//! turned into a running [`AsyncAction`] by an [`AsyncActionFactory`], and
//! started and stopped at step boundaries by the task path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepkit_core::StepResult;
use stepkit_navigation::Step;

use crate::error::AsyncActionError;

/// Lifecycle of an async action.
///
/// Variants are ordered: every status after `Running` means the action is
/// winding down or done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AsyncActionStatus {
    /// Not started
    #[default]
    Idle,
    /// Waiting for the participant to grant access
    RequestingPermission,
    /// Access granted
    PermissionGranted,
    /// Starting up
    Starting,
    /// Collecting data
    Running,
    /// Told to stop, not yet stopping
    WaitingToStop,
    /// Turning collected data into a result
    ProcessingResults,
    /// Shutting down
    Stopping,
    /// Stopped with a result
    Finished,
    /// Cancelled without a result
    Cancelled,
    /// Failed
    Failed,
}

impl AsyncActionStatus {
    /// Whether the action has not yet begun to stop.
    pub fn is_active(self) -> bool {
        self <= Self::Running
    }
}

/// Declares when an async action starts and stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncActionConfiguration {
    /// Identifier of the action and of its result
    pub identifier: String,

    /// Step that starts the action; the first step of the task when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_step_identifier: Option<String>,

    /// Step that stops the action; the end of the task when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_step_identifier: Option<String>,

    /// Keep running while the app is in the background
    #[serde(default)]
    pub requires_background: bool,
}

impl AsyncActionConfiguration {
    /// Run for the whole task.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            start_step_identifier: None,
            stop_step_identifier: None,
            requires_background: false,
        }
    }

    /// Start at `identifier`.
    pub fn with_start_step(mut self, identifier: impl Into<String>) -> Self {
        self.start_step_identifier = Some(identifier.into());
        self
    }

    /// Stop at `identifier`.
    pub fn with_stop_step(mut self, identifier: impl Into<String>) -> Self {
        self.stop_step_identifier = Some(identifier.into());
        self
    }

    /// Whether the action starts when `step` is shown.
    pub fn starts_at(&self, step: &Step, is_first_step: bool) -> bool {
        match &self.start_step_identifier {
            Some(id) => *id == step.identifier,
            None => is_first_step,
        }
    }
}

/// A running recorder.
#[async_trait]
pub trait AsyncAction: Send + Sync {
    /// The configuration this action was made from.
    fn configuration(&self) -> &AsyncActionConfiguration;

    /// Current lifecycle status.
    fn status(&self) -> AsyncActionStatus;

    /// Begin collecting.
    async fn start(&mut self) -> Result<(), AsyncActionError>;

    /// Stop collecting, flush, and return the result.
    async fn stop(&mut self) -> Result<Option<StepResult>, AsyncActionError>;

    /// Abandon collection without a result.
    async fn cancel(&mut self);

    /// The path moved to `step`; `path` is the slash-separated path node.
    fn move_to(&mut self, step: &Step, path: &str);
}

/// Resolves configurations into runnable actions.
pub trait AsyncActionFactory: Send + Sync {
    /// Make an action for `configuration`.
    fn make_action(
        &self,
        configuration: &AsyncActionConfiguration,
    ) -> Result<Box<dyn AsyncAction>, AsyncActionError>;
}
