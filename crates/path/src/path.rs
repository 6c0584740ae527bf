//! The task path: a tree of path nodes driving navigators.
//!
//! Each node owns one [`TaskResult`] and drives one navigator. A section or
//! subtask step gets a child node, kept in `child_paths` under the step
//! identifier so that revisiting the step resumes the same state until the
//! child completes. A completed child's result is appended wholesale to the
//! parent's history.
//!
//! Running async actions live in a registry at the root. They are stopped,
//! moved, and started on every forward transition, and stopping is awaited
//! before the new step is returned.

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use chrono::Utc;
use stepkit_core::{ErrorResult, StepResult, TaskInfo, TaskResult, TaskRunId};
use stepkit_navigation::{ConditionalStepNavigator, Progress, Step, StepDirection, Subtask};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::AsyncActionFactory;
use crate::config::PathConfig;
use crate::controller::{FinishReason, TaskController, TaskRepository};
use crate::error::{AsyncActionError, PathError, Result};
use crate::registry::{ActionRegistry, StopOutcome, StopScope};
use crate::task::Task;

/// Outcome of moving a node forward.
enum Advance {
    Step(Step),
    Finished,
    Exited,
}

/// Outcome of moving a node back.
enum Back {
    Step(Step),
    AtStart,
    Locked,
}

/// Where a node's task comes from.
#[derive(Debug, Clone)]
enum TaskSource {
    /// Supplied up front
    Provided,
    /// The navigator of a section step
    Section,
    /// Fetched through the repository
    Repository(TaskInfo),
}

/// Services shared by every node of one path.
struct PathContext {
    controller: Arc<dyn TaskController>,
    repository: Option<Arc<dyn TaskRepository>>,
    factory: Option<Arc<dyn AsyncActionFactory>>,
    actions: ActionRegistry,
    config: PathConfig,
    token: CancellationToken,
    is_finished: bool,
}

impl PathContext {
    /// Record an action outcome in `result`. Returns the error when the
    /// action is critical.
    fn record(&self, outcome: StopOutcome, result: &mut TaskResult) -> Option<AsyncActionError> {
        match outcome {
            Ok(Some(action_result)) => {
                result.append_async_result(action_result);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(action = %e.identifier(), error = %e, "Async action failed");
                result.append_async_result(
                    ErrorResult::new(e.identifier(), e.to_string()).with_domain("AsyncAction"),
                );
                self.config.is_critical(e.identifier()).then_some(e)
            }
        }
    }

    fn record_all(&self, outcomes: Vec<StopOutcome>, result: &mut TaskResult) -> Result<()> {
        let mut critical = None;
        for outcome in outcomes {
            if let Some(e) = self.record(outcome, result) {
                critical.get_or_insert(e);
            }
        }
        match critical {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Coordinate actions for a forward move from `previous` to `step`.
    ///
    /// Actions whose stop step is `previous` stop once it is left; actions
    /// that stop at the last step of a node stop when the node finishes.
    async fn transition(
        &mut self,
        task: Option<&Task>,
        path: &str,
        previous: Option<&Step>,
        step: &Step,
        result: &mut TaskResult,
    ) -> Result<()> {
        let is_first_step = previous.is_none();
        let stop_result = match previous {
            Some(previous) => {
                let scope = StopScope::AtStep {
                    step: &previous.identifier,
                    path,
                };
                let stopped = self.actions.stop(scope).await;
                self.record_all(stopped, result)
            }
            None => Ok(()),
        };

        self.actions.move_to(step, path);

        let mut start_result = Ok(());
        if let Some(task) = task {
            for configuration in task.async_actions_to_start(step, is_first_step) {
                if self.actions.is_running(&configuration.identifier) {
                    continue;
                }
                let Some(factory) = self.factory.clone() else {
                    debug!(action = %configuration.identifier, "No action factory, not starting");
                    continue;
                };
                let outcome = self
                    .actions
                    .start(factory.as_ref(), configuration, path)
                    .await
                    .map(|()| None);
                if let Some(e) = self.record(outcome, result) {
                    if start_result.is_ok() {
                        start_result = Err(e.into());
                    }
                }
            }
        }
        stop_result.and(start_result)
    }
}

/// One node of the path tree.
struct PathNode {
    /// Slash-separated step identifiers from the root task
    path: String,
    source: TaskSource,
    task: Option<Task>,
    is_loaded: bool,
    result: TaskResult,
    current_step: Option<Step>,
    child_paths: HashMap<String, PathNode>,
    current_child: Option<String>,
    is_completed: bool,
}

impl PathNode {
    fn root(identifier: &str, source: TaskSource, task: Option<Task>) -> Self {
        let result = match &task {
            Some(task) => task.instantiate_task_result(),
            None => TaskResult::new(identifier),
        };
        Self {
            path: identifier.to_string(),
            source,
            task,
            is_loaded: false,
            result,
            current_step: None,
            child_paths: HashMap::new(),
            current_child: None,
            is_completed: false,
        }
    }

    /// Child node for a section or subtask step. `task` reuses a task
    /// already fetched for an earlier child at the same step.
    fn nested(parent_path: &str, step: &Step, task_run_id: TaskRunId, task: Option<Task>) -> Self {
        let (source, task) = match &step.subtask {
            Some(Subtask::Section(navigator)) => (
                TaskSource::Section,
                Some(Task {
                    identifier: step.identifier.clone(),
                    schema_info: None,
                    navigator: navigator.clone(),
                    async_actions: Vec::new(),
                }),
            ),
            Some(Subtask::Task(info)) => (TaskSource::Repository(info.clone()), task),
            None => (TaskSource::Section, None),
        };
        let mut result = TaskResult::new(step.identifier.clone());
        result.task_run_id = task_run_id;
        Self {
            path: format!("{parent_path}/{}", step.identifier),
            source,
            task,
            is_loaded: false,
            result,
            current_step: None,
            child_paths: HashMap::new(),
            current_child: None,
            is_completed: false,
        }
    }

    fn navigator(&self) -> Result<Arc<ConditionalStepNavigator>> {
        match &self.task {
            Some(task) => Ok(task.navigator.clone()),
            None => Err(PathError::NoRepository(self.result.identifier.clone())),
        }
    }

    fn active_child(&self) -> Option<&PathNode> {
        self.current_child.as_ref().and_then(|id| self.child_paths.get(id))
    }

    fn active(&self) -> &PathNode {
        match self.active_child() {
            Some(child) => child.active(),
            None => self,
        }
    }

    /// Fetch and validate the task before the first step.
    async fn prepare(&mut self, ctx: &mut PathContext) -> Result<()> {
        if self.is_loaded {
            return Ok(());
        }
        if self.task.is_none() {
            let TaskSource::Repository(info) = &self.source else {
                return Err(PathError::NoRepository(self.result.identifier.clone()));
            };
            let repository = ctx
                .repository
                .clone()
                .ok_or_else(|| PathError::NoRepository(info.identifier.clone()))?;
            info!(task = %info.identifier, path = %self.path, "Fetching task");
            let token = ctx.token.child_token();
            let task = tokio::select! {
                _ = ctx.token.cancelled() => return Err(PathError::Cancelled),
                fetched = repository.fetch_task(info, token) => fetched?,
            };
            self.task = Some(task);
        }
        if let Some(task) = &self.task {
            if !matches!(self.source, TaskSource::Section) {
                if ctx.config.validate_on_load {
                    task.validate()?;
                }
                self.result.schema_info = task.schema_info.clone();
                ctx.controller.handle_task_loaded(task).await;
            }
        }
        self.is_loaded = true;
        Ok(())
    }

    #[async_recursion]
    async fn go_forward(&mut self, ctx: &mut PathContext) -> Result<Advance> {
        if self.is_completed {
            return Ok(Advance::Finished);
        }
        self.prepare(ctx).await?;

        if let Some(child_id) = self.current_child.clone() {
            if let Some(child) = self.child_paths.get_mut(&child_id) {
                match child.go_forward(ctx).await? {
                    Advance::Step(step) => return Ok(Advance::Step(step)),
                    Advance::Finished => self.close_child(&child_id),
                    Advance::Exited => {
                        self.close_child(&child_id);
                        self.finish(ctx).await?;
                        return Ok(Advance::Exited);
                    }
                }
            }
        } else if let Some(step) = &self.current_step {
            if let Some(step_result) = self.result.find_result_mut(&step.identifier) {
                step_result.set_end_date(Utc::now());
            }
        }
        self.move_to_next_step(ctx).await
    }

    async fn move_to_next_step(&mut self, ctx: &mut PathContext) -> Result<Advance> {
        let navigator = self.navigator()?;
        loop {
            let navigation = navigator.step_after(self.current_step.as_ref(), &self.result)?;
            let Some(step) = navigation.step else {
                self.finish(ctx).await?;
                return Ok(if navigation.is_exit {
                    Advance::Exited
                } else {
                    Advance::Finished
                });
            };
            debug!(path = %self.path, step = %step.identifier, direction = ?navigation.direction, "Moving to step");
            if let Some(advance) = self.enter_step(step, navigation.direction, ctx).await? {
                return Ok(advance);
            }
        }
    }

    /// Make `step` current. Returns `None` when a nested step completed
    /// without showing anything, so navigation continues after it.
    async fn enter_step(
        &mut self,
        step: Step,
        direction: StepDirection,
        ctx: &mut PathContext,
    ) -> Result<Option<Advance>> {
        let previous = self.current_step.replace(step.clone());
        ctx.transition(self.task.as_ref(), &self.path, previous.as_ref(), &step, &mut self.result)
            .await?;

        if !step.is_nested() {
            let step_result = self
                .result
                .find_result(&step.identifier)
                .or_else(|| self.result.previous_result(&step.identifier))
                .cloned()
                .unwrap_or_else(|| step.instantiate_step_result());
            self.result.append_step_history(step_result);
            ctx.controller.show_step(&step, direction).await;
            return Ok(Some(Advance::Step(step)));
        }

        let id = step.identifier.clone();
        if self.child_paths.get(&id).map_or(true, |child| child.is_completed) {
            let task = self.child_paths.remove(&id).and_then(|child| child.task);
            let child = PathNode::nested(&self.path, &step, self.result.task_run_id, task);
            self.child_paths.insert(id.clone(), child);
        }
        self.current_child = Some(id.clone());

        let Some(child) = self.child_paths.get_mut(&id) else {
            return Ok(None);
        };
        let advance = match child.reopen(ctx, direction).await? {
            Some(resumed) => Advance::Step(resumed),
            None => child.go_forward(ctx).await?,
        };
        match advance {
            Advance::Step(shown) => Ok(Some(Advance::Step(shown))),
            Advance::Finished => {
                self.close_child(&id);
                Ok(None)
            }
            Advance::Exited => {
                self.close_child(&id);
                self.finish(ctx).await?;
                Ok(Some(Advance::Exited))
            }
        }
    }

    /// Append a finished child's result to this node's history.
    fn close_child(&mut self, id: &str) {
        if let Some(child) = self.child_paths.get(id) {
            self.result.append_step_history(child.result.clone());
        }
        self.current_child = None;
    }

    /// Show the current step again, descending into a child node kept for
    /// it. Returns `None` when there is nothing to show yet.
    #[async_recursion]
    async fn reopen(&mut self, ctx: &mut PathContext, direction: StepDirection) -> Result<Option<Step>> {
        let Some(step) = self.current_step.clone() else {
            return Ok(None);
        };
        self.is_completed = false;
        if step.is_nested() {
            let Some(child) = self.child_paths.get_mut(&step.identifier) else {
                return Ok(None);
            };
            self.result.remove_step_history_from(&step.identifier);
            self.current_child = Some(step.identifier.clone());
            return child.reopen(ctx, direction).await;
        }
        ctx.controller.show_step(&step, direction).await;
        Ok(Some(step))
    }

    #[async_recursion]
    async fn go_back(&mut self, ctx: &mut PathContext) -> Result<Back> {
        if let Some(child_id) = self.current_child.clone() {
            if let Some(child) = self.child_paths.get_mut(&child_id) {
                match child.go_back(ctx).await? {
                    Back::AtStart => {}
                    other => return Ok(other),
                }
            }
        }
        let Some(current) = self.current_step.clone() else {
            return Ok(Back::AtStart);
        };
        let navigator = self.navigator()?;
        if let Some(rule) = &current.back_rule {
            if !rule.allows_back_navigation(&self.result, navigator.conditional_rule.as_deref()) {
                debug!(step = %current.identifier, "Back navigation locked");
                return Ok(Back::Locked);
            }
        }
        let Some(previous) = navigator.step_before(&current, &self.result) else {
            return Ok(Back::AtStart);
        };

        debug!(path = %self.path, from = %current.identifier, to = %previous.identifier, "Going back");
        self.current_child = None;
        self.result.remove_step_history_from(&current.identifier);
        self.current_step = Some(previous.clone());
        ctx.actions.move_to(&previous, &self.path);
        Ok(match self.reopen(ctx, StepDirection::Reverse).await? {
            Some(step) => Back::Step(step),
            None => Back::AtStart,
        })
    }

    /// Stop the actions of this subtree and close the result. Idempotent.
    async fn finish(&mut self, ctx: &mut PathContext) -> Result<()> {
        if self.is_completed {
            return Ok(());
        }
        let stopped = ctx.actions.stop(StopScope::WithinPath(&self.path)).await;
        self.result.end_date = Utc::now();
        self.is_completed = true;
        debug!(path = %self.path, "Path completed");
        ctx.record_all(stopped, &mut self.result)
    }

    /// Replace or append a result in the active node.
    fn record_result(&mut self, step_result: StepResult) {
        if let Some(child) = self.current_child.as_ref().and_then(|id| self.child_paths.get_mut(id)) {
            return child.record_result(step_result);
        }
        match self.result.find_result_mut(step_result.identifier()) {
            Some(existing) => *existing = step_result,
            None => {
                self.result.append_step_history(step_result);
            }
        }
    }
}

/// Drives a task run over a tree of navigators.
pub struct TaskPath {
    root: PathNode,
    context: PathContext,
}

impl TaskPath {
    /// Run `task`, reporting to `controller`.
    pub fn new(task: Task, controller: Arc<dyn TaskController>) -> Self {
        let identifier = task.identifier.clone();
        Self::with_root(PathNode::root(&identifier, TaskSource::Provided, Some(task)), controller)
    }

    /// Run the task described by `info`, fetched on the first move forward.
    pub fn from_info(
        info: TaskInfo,
        repository: Arc<dyn TaskRepository>,
        controller: Arc<dyn TaskController>,
    ) -> Self {
        let identifier = info.identifier.clone();
        let root = PathNode::root(&identifier, TaskSource::Repository(info), None);
        Self::with_root(root, controller).with_repository(repository)
    }

    fn with_root(root: PathNode, controller: Arc<dyn TaskController>) -> Self {
        Self {
            root,
            context: PathContext {
                controller,
                repository: None,
                factory: None,
                actions: ActionRegistry::default(),
                config: PathConfig::default(),
                token: CancellationToken::new(),
                is_finished: false,
            },
        }
    }

    /// Set the repository used to fetch subtasks.
    pub fn with_repository(mut self, repository: Arc<dyn TaskRepository>) -> Self {
        self.context.repository = Some(repository);
        self
    }

    /// Set the factory for async actions.
    pub fn with_action_factory(mut self, factory: Arc<dyn AsyncActionFactory>) -> Self {
        self.context.factory = Some(factory);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: PathConfig) -> Self {
        self.context.config = config;
        self
    }

    /// Token cancelled when the run is cancelled; cancelling it from
    /// elsewhere interrupts a pending fetch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.token.clone()
    }

    /// Move to the next step.
    ///
    /// Returns the step now current, or `None` once the run has finished.
    pub async fn go_forward(&mut self) -> Result<Option<Step>> {
        if self.context.is_finished {
            return Ok(None);
        }
        let outcome = self.root.go_forward(&mut self.context).await;
        match outcome {
            Ok(Advance::Step(step)) => Ok(Some(step)),
            Ok(Advance::Finished) => {
                self.complete(FinishReason::Completed).await;
                Ok(None)
            }
            Ok(Advance::Exited) => {
                self.complete(FinishReason::EarlyExit).await;
                Ok(None)
            }
            Err(PathError::Cancelled) => {
                self.cancel().await;
                Err(PathError::Cancelled)
            }
            Err(e @ (PathError::Fetch { .. } | PathError::NoRepository(_))) => {
                error!(error = %e, "Failed to load task");
                self.context.controller.handle_task_failure(&e).await;
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Task halted");
                self.context.controller.handle_task_failure(&e).await;
                self.abort(FinishReason::Failed).await;
                Err(e)
            }
        }
    }

    /// Move back to the previous step.
    ///
    /// Returns `None` when there is no previous step or going back is not
    /// allowed; the current step stays current.
    pub async fn go_back(&mut self) -> Result<Option<Step>> {
        if self.context.is_finished {
            return Ok(None);
        }
        Ok(match self.root.go_back(&mut self.context).await? {
            Back::Step(step) => Some(step),
            Back::AtStart | Back::Locked => None,
        })
    }

    /// Cancel the run.
    ///
    /// Running actions are stopped (and their stops awaited) or cancelled,
    /// per [`PathConfig::stop_actions_on_cancel`].
    pub async fn cancel(&mut self) {
        self.abort(FinishReason::Cancelled).await;
    }

    async fn abort(&mut self, reason: FinishReason) {
        if self.context.is_finished {
            return;
        }
        self.context.token.cancel();
        if self.context.config.stop_actions_on_cancel {
            let stopped = self.context.actions.stop(StopScope::All).await;
            for outcome in stopped {
                self.context.record(outcome, &mut self.root.result);
            }
        } else {
            self.context.actions.cancel_all().await;
        }
        self.root.result.end_date = Utc::now();
        self.context.is_finished = true;
        info!(task = %self.root.result.identifier, ?reason, "Task ended");
        self.context.controller.handle_task_did_finish(reason).await;
    }

    async fn complete(&mut self, reason: FinishReason) {
        if self.context.is_finished {
            return;
        }
        self.context.is_finished = true;
        info!(task = %self.root.result.identifier, ?reason, "Task finished");
        self.context.controller.handle_task_result_ready(&self.root.result).await;
        self.context.controller.handle_task_did_finish(reason).await;
    }

    /// Record the participant's result for the current step.
    pub fn record_result(&mut self, result: impl Into<StepResult>) {
        self.root.record_result(result.into());
    }

    /// The current step, in the deepest active node.
    pub fn current_step(&self) -> Option<&Step> {
        self.root.active().current_step.as_ref()
    }

    /// Slash-separated path of the active node.
    pub fn current_path(&self) -> &str {
        &self.root.active().path
    }

    /// The root result.
    pub fn task_result(&self) -> &TaskResult {
        &self.root.result
    }

    /// The result owned by the active node.
    pub fn current_result(&self) -> &TaskResult {
        &self.root.active().result
    }

    /// The result `identifier` held before it was displaced, in the
    /// active node.
    pub fn previous_result(&self, identifier: &str) -> Option<&StepResult> {
        self.current_result().previous_result(identifier)
    }

    /// Progress of the current step within the active node.
    pub fn progress(&self) -> Option<Progress> {
        let node = self.root.active();
        let step = node.current_step.as_ref()?;
        node.task.as_ref()?.navigator.progress(step, &node.result)
    }

    /// Whether the active node allows going back from the current step.
    pub fn can_go_back(&self) -> bool {
        let node = self.root.active();
        match (&node.current_step, &node.task) {
            (Some(step), Some(task)) => task.navigator.has_step_before(step, &node.result),
            _ => false,
        }
    }

    /// Number of async actions still collecting.
    pub fn running_action_count(&self) -> usize {
        self.context.actions.active_count()
    }

    /// Whether the run has finished, for any reason.
    pub fn is_finished(&self) -> bool {
        self.context.is_finished
    }

    /// Whether navigation reached the end of the root task.
    pub fn is_task_complete(&self) -> bool {
        self.root.is_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{AsyncAction, AsyncActionConfiguration, AsyncActionStatus};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use stepkit_core::{AnswerResult, AnswerResultType, AnswerValue, BasicResult};
    use stepkit_navigation::DirectNavigationRule;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn all(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, event: &str) -> usize {
            self.all().iter().filter(|e| *e == event).count()
        }
    }

    #[derive(Default)]
    struct MockController {
        events: Events,
        async_results_when_ready: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskController for MockController {
        async fn handle_task_loaded(&self, task: &Task) {
            self.events.push(format!("loaded:{}", task.identifier));
        }

        async fn handle_task_failure(&self, _error: &PathError) {
            self.events.push("failure");
        }

        async fn handle_task_result_ready(&self, result: &TaskResult) {
            self.events.push("ready");
            *self.async_results_when_ready.lock().unwrap() =
                result.async_results.iter().map(|r| r.identifier().to_string()).collect();
        }

        async fn handle_task_did_finish(&self, reason: FinishReason) {
            self.events.push(format!("finish:{reason:?}"));
        }

        async fn show_step(&self, step: &Step, direction: StepDirection) {
            self.events.push(format!("show:{}:{direction:?}", step.identifier));
        }
    }

    struct MockRepository {
        fail: bool,
    }

    #[async_trait]
    impl TaskRepository for MockRepository {
        async fn fetch_task(&self, info: &TaskInfo, _token: CancellationToken) -> Result<Task> {
            if self.fail {
                return Err(PathError::Fetch {
                    identifier: info.identifier.clone(),
                    reason: "offline".into(),
                });
            }
            Ok(Task::new(info.identifier.clone(), linear(&["x", "y"])))
        }
    }

    struct PendingRepository;

    #[async_trait]
    impl TaskRepository for PendingRepository {
        async fn fetch_task(&self, _info: &TaskInfo, token: CancellationToken) -> Result<Task> {
            token.cancelled().await;
            Err(PathError::Cancelled)
        }
    }

    struct MockRecorder {
        configuration: AsyncActionConfiguration,
        status: AsyncActionStatus,
        log: Arc<Events>,
    }

    #[async_trait]
    impl AsyncAction for MockRecorder {
        fn configuration(&self) -> &AsyncActionConfiguration {
            &self.configuration
        }

        fn status(&self) -> AsyncActionStatus {
            self.status
        }

        async fn start(&mut self) -> std::result::Result<(), AsyncActionError> {
            self.log.push(format!("start:{}", self.configuration.identifier));
            self.status = AsyncActionStatus::Running;
            Ok(())
        }

        async fn stop(&mut self) -> std::result::Result<Option<StepResult>, AsyncActionError> {
            self.log.push(format!("stop:{}", self.configuration.identifier));
            self.status = AsyncActionStatus::Finished;
            Ok(Some(BasicResult::new(self.configuration.identifier.clone()).into()))
        }

        async fn cancel(&mut self) {
            self.log.push(format!("cancel:{}", self.configuration.identifier));
            self.status = AsyncActionStatus::Cancelled;
        }

        fn move_to(&mut self, step: &Step, _path: &str) {
            self.log.push(format!("move:{}:{}", self.configuration.identifier, step.identifier));
        }
    }

    #[derive(Default)]
    struct MockFactory {
        log: Arc<Events>,
        fail_to_start: HashSet<String>,
    }

    impl AsyncActionFactory for MockFactory {
        fn make_action(
            &self,
            configuration: &AsyncActionConfiguration,
        ) -> std::result::Result<Box<dyn AsyncAction>, AsyncActionError> {
            if self.fail_to_start.contains(&configuration.identifier) {
                return Err(AsyncActionError::Start {
                    identifier: configuration.identifier.clone(),
                    reason: "permission denied".into(),
                });
            }
            Ok(Box::new(MockRecorder {
                configuration: configuration.clone(),
                status: AsyncActionStatus::Idle,
                log: self.log.clone(),
            }))
        }
    }

    fn linear(ids: &[&str]) -> ConditionalStepNavigator {
        ConditionalStepNavigator::new(ids.iter().map(|id| Step::instruction(*id)).collect())
    }

    fn path_for(navigator: ConditionalStepNavigator) -> (TaskPath, Arc<MockController>) {
        let controller = Arc::new(MockController::default());
        let path = TaskPath::new(Task::new("task", navigator), controller.clone());
        (path, controller)
    }

    async fn forward_id(path: &mut TaskPath) -> Option<String> {
        path.go_forward().await.unwrap().map(|s| s.identifier)
    }

    async fn back_id(path: &mut TaskPath) -> Option<String> {
        path.go_back().await.unwrap().map(|s| s.identifier)
    }

    fn history(result: &TaskResult) -> Vec<&str> {
        result.step_history.iter().map(|r| r.identifier()).collect()
    }

    #[tokio::test]
    async fn test_linear_run_finishes_once() {
        let (mut path, controller) = path_for(linear(&["a", "b", "c"]));

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("a"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("b"));
        assert_eq!(path.progress().unwrap().current, 2);
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("c"));
        assert_eq!(forward_id(&mut path).await, None);
        assert_eq!(forward_id(&mut path).await, None);

        assert!(path.is_task_complete());
        assert_eq!(history(path.task_result()), vec!["a", "b", "c"]);
        assert_eq!(controller.events.count("ready"), 1);
        assert_eq!(controller.events.count("finish:Completed"), 1);
        assert_eq!(controller.events.all()[0], "loaded:task");
    }

    #[tokio::test]
    async fn test_back_truncates_and_restores_previous_result() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("a"),
            Step::question("b", AnswerResultType::string()),
            Step::instruction("c"),
        ]);
        let (mut path, controller) = path_for(navigator);
        forward_id(&mut path).await;
        forward_id(&mut path).await;
        path.record_result(AnswerResult::new("b", AnswerResultType::string()).with_value("x").unwrap());
        forward_id(&mut path).await;

        assert_eq!(back_id(&mut path).await.as_deref(), Some("b"));
        assert_eq!(history(path.task_result()), vec!["a", "b"]);
        assert!(path.previous_result("c").is_some());
        assert!(controller.events.all().contains(&"show:b:Reverse".to_string()));

        assert_eq!(back_id(&mut path).await.as_deref(), Some("a"));
        assert_eq!(back_id(&mut path).await, None);
        assert_eq!(path.current_step().unwrap().identifier, "a");

        forward_id(&mut path).await;
        let answer = path.task_result().find_answer_result("b").unwrap();
        assert_eq!(answer.value, Some(AnswerValue::from("x")));
    }

    #[tokio::test]
    async fn test_section_result_is_nested() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("intro"),
            Step::section("section", linear(&["s1", "s2"])),
            Step::completion("done"),
        ]);
        let (mut path, _controller) = path_for(navigator);

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("intro"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s1"));
        assert_eq!(path.current_path(), "task/section");
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s2"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("done"));
        assert_eq!(forward_id(&mut path).await, None);

        let result = path.task_result();
        assert_eq!(history(result), vec!["intro", "section", "done"]);
        let section = result.find_result("section").unwrap().as_task().unwrap();
        assert_eq!(history(section), vec!["s1", "s2"]);
        assert_eq!(section.task_run_id, result.task_run_id);
    }

    #[tokio::test]
    async fn test_back_into_completed_section_reopens_last_step() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("intro"),
            Step::section("section", linear(&["s1", "s2"])),
            Step::completion("done"),
        ]);
        let (mut path, _controller) = path_for(navigator);
        for _ in 0..4 {
            forward_id(&mut path).await;
        }
        assert_eq!(path.current_step().unwrap().identifier, "done");

        assert_eq!(back_id(&mut path).await.as_deref(), Some("s2"));
        assert_eq!(history(path.task_result()), vec!["intro"]);
        assert_eq!(history(path.current_result()), vec!["s1", "s2"]);

        assert_eq!(back_id(&mut path).await.as_deref(), Some("s1"));
        assert_eq!(back_id(&mut path).await.as_deref(), Some("intro"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_reentering_section_resumes_child_state() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("intro"),
            Step::section(
                "section",
                ConditionalStepNavigator::new(vec![Step::question("s1", AnswerResultType::integer())]),
            ),
        ]);
        let (mut path, _controller) = path_for(navigator);
        forward_id(&mut path).await;
        forward_id(&mut path).await;
        path.record_result(AnswerResult::new("s1", AnswerResultType::integer()).with_value(4).unwrap());

        assert_eq!(back_id(&mut path).await.as_deref(), Some("intro"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s1"));
        let answer = path.current_result().find_answer_result("s1").unwrap();
        assert_eq!(answer.value, Some(AnswerValue::from(4)));
    }

    #[tokio::test]
    async fn test_subtask_is_fetched() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("intro"),
            Step::subtask("sub", TaskInfo::new("heartRate")),
            Step::completion("done"),
        ]);
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::new(Task::new("task", navigator), controller.clone())
            .with_repository(Arc::new(MockRepository { fail: false }));

        let mut visited = Vec::new();
        while let Some(step) = path.go_forward().await.unwrap() {
            visited.push(step.identifier);
        }
        assert_eq!(visited, vec!["intro", "x", "y", "done"]);
        assert!(controller.events.all().contains(&"loaded:heartRate".to_string()));
        let sub = path.task_result().find_result("sub").unwrap().as_task().unwrap();
        assert_eq!(history(sub), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_halts_without_finishing() {
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::from_info(
            TaskInfo::new("remote"),
            Arc::new(MockRepository { fail: true }),
            controller.clone(),
        );

        assert!(matches!(path.go_forward().await, Err(PathError::Fetch { .. })));
        assert_eq!(controller.events.all(), vec!["failure"]);
        assert!(!path.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_fetch() {
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::from_info(TaskInfo::new("remote"), Arc::new(PendingRepository), controller.clone());
        let token = path.cancellation_token();
        tokio::spawn(async move { token.cancel() });

        assert!(matches!(path.go_forward().await, Err(PathError::Cancelled)));
        assert!(path.is_finished());
        assert_eq!(controller.events.count("finish:Cancelled"), 1);
        assert_eq!(path.go_forward().await.unwrap().map(|s| s.identifier), None);
    }

    #[tokio::test]
    async fn test_exit_rule_finishes_early() {
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("a").with_navigation_rule(Arc::new(DirectNavigationRule::new("exit"))),
            Step::instruction("b"),
        ]);
        let (mut path, controller) = path_for(navigator);
        forward_id(&mut path).await;
        assert_eq!(forward_id(&mut path).await, None);
        assert_eq!(controller.events.count("finish:EarlyExit"), 1);
        assert_eq!(history(path.task_result()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_skip_cycle_fails_the_run() {
        #[derive(Debug)]
        struct Always;
        impl stepkit_navigation::NavigationSkipRule for Always {
            fn should_skip_step(
                &self,
                _result: &TaskResult,
                _conditional_rule: Option<&dyn stepkit_navigation::ConditionalRule>,
                _is_peeking: bool,
            ) -> bool {
                true
            }
        }
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("a"),
            Step::instruction("b")
                .with_skip_rule(Arc::new(Always))
                .with_navigation_rule(Arc::new(DirectNavigationRule::new("c"))),
            Step::instruction("c")
                .with_skip_rule(Arc::new(Always))
                .with_navigation_rule(Arc::new(DirectNavigationRule::new("b"))),
        ]);
        let (mut path, controller) = path_for(navigator);
        forward_id(&mut path).await;

        assert!(matches!(path.go_forward().await, Err(PathError::Navigation(_))));
        assert_eq!(controller.events.count("failure"), 1);
        assert_eq!(controller.events.count("finish:Failed"), 1);
    }

    fn recorded_task(actions: Vec<AsyncActionConfiguration>) -> Task {
        Task::new("task", linear(&["intro", "walk", "rest", "done"])).with_async_actions(actions)
    }

    #[tokio::test]
    async fn test_actions_start_move_and_stop_at_steps() {
        let factory = Arc::new(MockFactory::default());
        let log = factory.log.clone();
        let controller = Arc::new(MockController::default());
        let task = recorded_task(vec![AsyncActionConfiguration::new("motion")
            .with_start_step("walk")
            .with_stop_step("rest")]);
        let mut path = TaskPath::new(task, controller.clone()).with_action_factory(factory);

        forward_id(&mut path).await;
        forward_id(&mut path).await;
        assert_eq!(path.running_action_count(), 1);
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("rest"));
        assert_eq!(path.running_action_count(), 1);
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("done"));
        assert_eq!(path.running_action_count(), 0);

        assert_eq!(
            log.all(),
            vec!["start:motion", "move:motion:rest", "stop:motion"]
        );
        assert!(path.task_result().async_results.iter().any(|r| r.identifier() == "motion"));
    }

    #[tokio::test]
    async fn test_action_stopping_at_last_step_runs_until_finish() {
        let factory = Arc::new(MockFactory::default());
        let log = factory.log.clone();
        let controller = Arc::new(MockController::default());
        let task = recorded_task(vec![AsyncActionConfiguration::new("motion")
            .with_start_step("walk")
            .with_stop_step("done")]);
        let mut path = TaskPath::new(task, controller.clone()).with_action_factory(factory);

        for _ in 0..4 {
            forward_id(&mut path).await;
        }
        assert_eq!(path.current_step().unwrap().identifier, "done");
        assert_eq!(path.running_action_count(), 1);
        assert_eq!(forward_id(&mut path).await, None);

        assert_eq!(
            log.all(),
            vec!["start:motion", "move:motion:rest", "move:motion:done", "stop:motion"]
        );
        assert_eq!(*controller.async_results_when_ready.lock().unwrap(), vec!["motion".to_string()]);
    }

    #[tokio::test]
    async fn test_section_step_does_not_stop_root_action_with_same_identifier() {
        let factory = Arc::new(MockFactory::default());
        let log = factory.log.clone();
        let controller = Arc::new(MockController::default());
        let navigator = ConditionalStepNavigator::new(vec![
            Step::instruction("intro"),
            Step::section("section", linear(&["s1", "done", "s2"])),
            Step::instruction("done"),
            Step::completion("outro"),
        ]);
        let task = Task::new("task", navigator).with_async_actions(vec![AsyncActionConfiguration::new("motion")
            .with_start_step("intro")
            .with_stop_step("done")]);
        let mut path = TaskPath::new(task, controller.clone()).with_action_factory(factory);

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("intro"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s1"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("done"));
        assert_eq!(forward_id(&mut path).await.as_deref(), Some("s2"));
        assert_eq!(path.current_path(), "task/section");
        assert_eq!(path.running_action_count(), 1);

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("done"));
        assert_eq!(path.current_path(), "task");
        assert_eq!(path.running_action_count(), 1);

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("outro"));
        assert_eq!(path.running_action_count(), 0);
        assert_eq!(log.count("stop:motion"), 1);
        assert_eq!(log.all().last().map(String::as_str), Some("stop:motion"));
    }

    #[tokio::test]
    async fn test_whole_task_action_stops_before_result_is_ready() {
        let factory = Arc::new(MockFactory::default());
        let log = factory.log.clone();
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::new(recorded_task(vec![AsyncActionConfiguration::new("audio")]), controller.clone())
            .with_action_factory(factory);

        while path.go_forward().await.unwrap().is_some() {}

        assert_eq!(log.all().first().map(String::as_str), Some("start:audio"));
        assert_eq!(log.all().last().map(String::as_str), Some("stop:audio"));
        assert_eq!(*controller.async_results_when_ready.lock().unwrap(), vec!["audio".to_string()]);
    }

    #[tokio::test]
    async fn test_noncritical_start_failure_is_recorded() {
        let factory = Arc::new(MockFactory {
            fail_to_start: HashSet::from(["audio".to_string()]),
            ..Default::default()
        });
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::new(recorded_task(vec![AsyncActionConfiguration::new("audio")]), controller)
            .with_action_factory(factory);

        assert_eq!(forward_id(&mut path).await.as_deref(), Some("intro"));
        let error = path.task_result().async_results.first().unwrap();
        assert!(matches!(error, StepResult::Error(_)));
    }

    #[tokio::test]
    async fn test_critical_start_failure_halts() {
        let factory = Arc::new(MockFactory {
            fail_to_start: HashSet::from(["audio".to_string()]),
            ..Default::default()
        });
        let controller = Arc::new(MockController::default());
        let mut config = PathConfig::default();
        config.critical_actions.insert("audio".into());
        let mut path = TaskPath::new(recorded_task(vec![AsyncActionConfiguration::new("audio")]), controller.clone())
            .with_action_factory(factory)
            .with_config(config);

        assert!(matches!(path.go_forward().await, Err(PathError::AsyncAction(_))));
        assert_eq!(controller.events.count("finish:Failed"), 1);
    }

    #[tokio::test]
    async fn test_cancel_drains_running_actions() {
        let factory = Arc::new(MockFactory::default());
        let log = factory.log.clone();
        let controller = Arc::new(MockController::default());
        let mut path = TaskPath::new(recorded_task(vec![AsyncActionConfiguration::new("audio")]), controller.clone())
            .with_action_factory(factory);
        forward_id(&mut path).await;

        path.cancel().await;
        path.cancel().await;

        assert_eq!(log.all(), vec!["start:audio", "stop:audio"]);
        assert_eq!(controller.events.count("finish:Cancelled"), 1);
        assert_eq!(controller.events.count("ready"), 0);
        assert!(path.task_result().async_results.iter().any(|r| r.identifier() == "audio"));
    }
}
