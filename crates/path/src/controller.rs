//! Collaborators of a task path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepkit_core::{TaskInfo, TaskResult};
use stepkit_navigation::{Step, StepDirection};
use tokio_util::sync::CancellationToken;

use crate::error::{PathError, Result};
use crate::task::Task;

/// Why a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishReason {
    /// Navigation reached the end of the task
    Completed,
    /// A rule named the exit identifier
    EarlyExit,
    /// The run was cancelled
    Cancelled,
    /// The run halted on an error
    Failed,
}

impl FinishReason {
    /// Whether the result should be archived.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed | Self::EarlyExit)
    }
}

/// Loads tasks named by subtask steps.
///
/// Retry policy, if any, belongs to the implementation.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Fetch the task described by `info`.
    ///
    /// Implementations should give up with [`PathError::Cancelled`] once
    /// `token` is cancelled.
    async fn fetch_task(&self, info: &TaskInfo, token: CancellationToken) -> Result<Task>;
}

/// Receives the events of a task run.
#[async_trait]
pub trait TaskController: Send + Sync {
    /// A task (the root or a subtask) is ready to navigate.
    async fn handle_task_loaded(&self, _task: &Task) {}

    /// A task could not be loaded or navigation halted.
    async fn handle_task_failure(&self, error: &PathError);

    /// The root result is final.
    async fn handle_task_result_ready(&self, result: &TaskResult);

    /// The run ended.
    async fn handle_task_did_finish(&self, reason: FinishReason);

    /// A step became the current step.
    async fn show_step(&self, _step: &Step, _direction: StepDirection) {}
}
