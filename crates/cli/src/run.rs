//! Scripted task runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepkit_archive::{archive_and_upload, ArchiveConfig, DirectoryArchiveManager};
use stepkit_core::{AnswerResult, TaskInfo, TaskResult};
use stepkit_navigation::{CohortTrackingRule, Step, StepDirection, TrackingRule};
use stepkit_path::{FinishReason, PathError, Task, TaskController, TaskDefinition, TaskPath, TaskRepository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A scripted run of a task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Task definition, relative to the run file
    pub task: PathBuf,

    /// Answers keyed by step identifier, or by `section/step` to pick
    /// a step inside a section or subtask
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,

    /// Directory the archives are written to
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Schedule the run belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_identifier: Option<String>,

    /// Subtasks archived separately from the main task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub split_tasks: Vec<String>,

    /// Cohorts the participant starts in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cohorts: Vec<String>,
}

fn default_output() -> PathBuf {
    PathBuf::from("archives")
}

impl RunConfig {
    /// Read a run file. Relative paths in it are resolved against its directory.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading run file {}", path.display()))?;
        let mut config: RunConfig =
            serde_json::from_str(&json).with_context(|| format!("parsing run file {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.task = base.join(&config.task);
            config.output = base.join(&config.output);
        }
        Ok(config)
    }

    fn answer_for(&self, root: &str, node_path: &str, step: &Step) -> Option<&Value> {
        let qualified = node_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|section| format!("{section}/{}", step.identifier));
        qualified
            .and_then(|key| self.answers.get(&key))
            .or_else(|| self.answers.get(&step.identifier))
    }
}

/// Outcome of a scripted run.
#[derive(Debug)]
pub struct RunSummary {
    /// How the run ended
    pub reason: Option<FinishReason>,
    /// Steps shown, by path
    pub steps: Vec<String>,
    /// The final result
    pub result: TaskResult,
    /// Number of archives written
    pub archives: usize,
}

/// Loads subtasks from `<identifier>.json` files next to the main definition.
pub struct DirectoryTaskRepository {
    dir: PathBuf,
    tracking_rules: Vec<Arc<dyn TrackingRule>>,
}

impl DirectoryTaskRepository {
    /// Create a repository reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>, tracking_rules: Vec<Arc<dyn TrackingRule>>) -> Self {
        Self {
            dir: dir.into(),
            tracking_rules,
        }
    }

    async fn load(&self, info: &TaskInfo) -> std::result::Result<Task, String> {
        let path = self.dir.join(format!("{}.json", info.identifier));
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;
        let definition = TaskDefinition::from_json(&json).map_err(|e| e.to_string())?;
        definition.build(&self.tracking_rules).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl TaskRepository for DirectoryTaskRepository {
    async fn fetch_task(&self, info: &TaskInfo, token: CancellationToken) -> stepkit_path::Result<Task> {
        debug!(task = %info.identifier, dir = %self.dir.display(), "Fetching subtask");
        tokio::select! {
            _ = token.cancelled() => Err(PathError::Cancelled),
            loaded = self.load(info) => loaded.map_err(|reason| PathError::Fetch {
                identifier: info.identifier.clone(),
                reason,
            }),
        }
    }
}

/// Logs the run and remembers how it ended.
#[derive(Default)]
struct RunController {
    reason: Mutex<Option<FinishReason>>,
}

#[async_trait]
impl TaskController for RunController {
    async fn handle_task_loaded(&self, task: &Task) {
        info!(task = %task.identifier, "Task loaded");
    }

    async fn handle_task_failure(&self, error: &PathError) {
        warn!(error = %error, "Task failure");
    }

    async fn handle_task_result_ready(&self, result: &TaskResult) {
        info!(task = %result.identifier, steps = result.step_history.len(), "Result ready");
    }

    async fn handle_task_did_finish(&self, reason: FinishReason) {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
    }

    async fn show_step(&self, step: &Step, direction: StepDirection) {
        debug!(step = %step.identifier, ?direction, "Showing step");
    }
}

/// Load and build the task at `path`.
pub async fn load_task(path: &Path, tracking_rules: &[Arc<dyn TrackingRule>]) -> Result<Task> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading task definition {}", path.display()))?;
    let definition = TaskDefinition::from_json(&json).context("parsing task definition")?;
    let task = definition.build(tracking_rules).context("building task")?;
    Ok(task)
}

/// Run the task with scripted answers and archive the result.
pub async fn run(config: &RunConfig) -> Result<RunSummary> {
    let tracking_rules: Vec<Arc<dyn TrackingRule>> = vec![Arc::new(CohortTrackingRule::new(config.cohorts.clone()))];
    let task = load_task(&config.task, &tracking_rules).await?;
    let root = task.identifier.clone();
    let task_dir = config.task.parent().map(Path::to_path_buf).unwrap_or_default();

    let controller = Arc::new(RunController::default());
    let mut path = TaskPath::new(task, controller.clone())
        .with_repository(Arc::new(DirectoryTaskRepository::new(task_dir, tracking_rules)));

    let mut steps = Vec::new();
    while let Some(step) = path.go_forward().await? {
        let node_path = path.current_path().to_string();
        steps.push(format!("{node_path}/{}", step.identifier));
        let (Some(answer_type), Some(json)) = (&step.answer_type, config.answer_for(&root, &node_path, &step)) else {
            continue;
        };
        let mut answer = AnswerResult::new(step.identifier.clone(), answer_type.clone());
        if let Some(value) = answer_type
            .decode(json)
            .with_context(|| format!("decoding answer for {}", step.identifier))?
        {
            answer = answer.with_value(value)?;
        }
        path.record_result(answer);
    }

    let reason = *controller.reason.lock().unwrap_or_else(|e| e.into_inner());
    let result = path.task_result().clone();
    let archives = match reason {
        Some(reason) if reason.is_completed() => {
            let manager = DirectoryArchiveManager::new(&config.output).with_split_tasks(config.split_tasks.clone());
            let archive_config = ArchiveConfig {
                app_name: "stepkit".to_string(),
                ..ArchiveConfig::default()
            };
            archive_and_upload(
                Arc::new(manager),
                result.clone(),
                config.schedule_identifier.as_deref(),
                archive_config,
            )
            .await
            .context("archiving result")?
        }
        _ => 0,
    };

    Ok(RunSummary {
        reason,
        steps,
        result,
        archives,
    })
}
