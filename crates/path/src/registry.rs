//! Running async actions, held by the root of a task path.

use futures::future::join_all;
use stepkit_core::StepResult;
use stepkit_navigation::Step;
use tracing::{debug, info};

use crate::action::{AsyncAction, AsyncActionConfiguration, AsyncActionFactory};
use crate::error::AsyncActionError;

/// Outcome of stopping one action.
pub(crate) type StopOutcome = Result<Option<StepResult>, AsyncActionError>;

/// Which running actions to stop.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StopScope<'a> {
    /// Actions whose stop step is `step`, started by the node at `path`
    /// or one of its descendants
    AtStep {
        /// Step being left
        step: &'a str,
        /// Path of the node leaving it
        path: &'a str,
    },
    /// Actions started by this path node or its descendants
    WithinPath(&'a str),
    /// Every running action
    All,
}

struct RunningAction {
    owner: String,
    action: Box<dyn AsyncAction>,
}

impl RunningAction {
    fn identifier(&self) -> &str {
        &self.action.configuration().identifier
    }

    fn is_owned_within(&self, path: &str) -> bool {
        self.owner == path
            || self
                .owner
                .strip_prefix(path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn in_scope(&self, scope: StopScope<'_>) -> bool {
        match scope {
            StopScope::AtStep { step, path } => {
                self.action.configuration().stop_step_identifier.as_deref() == Some(step)
                    && self.is_owned_within(path)
            }
            StopScope::WithinPath(path) => self.is_owned_within(path),
            StopScope::All => true,
        }
    }
}

/// Actions started by a task path.
#[derive(Default)]
pub(crate) struct ActionRegistry {
    running: Vec<RunningAction>,
}

impl ActionRegistry {
    /// Whether an action with `identifier` has not yet begun to stop.
    pub fn is_running(&self, identifier: &str) -> bool {
        self.running
            .iter()
            .any(|r| r.identifier() == identifier && r.action.status().is_active())
    }

    /// Number of actions still collecting.
    pub fn active_count(&self) -> usize {
        self.running.iter().filter(|r| r.action.status().is_active()).count()
    }

    /// Tell active actions that the path moved to `step`.
    pub fn move_to(&mut self, step: &Step, path: &str) {
        for running in self.running.iter_mut().filter(|r| r.action.status().is_active()) {
            running.action.move_to(step, path);
        }
    }

    /// Make and start the action for `configuration`, owned by the node at `owner`.
    pub async fn start(
        &mut self,
        factory: &dyn AsyncActionFactory,
        configuration: &AsyncActionConfiguration,
        owner: &str,
    ) -> Result<(), AsyncActionError> {
        let mut action = factory.make_action(configuration)?;
        action.start().await?;
        info!(action = %configuration.identifier, path = %owner, "Started async action");
        self.running.push(RunningAction {
            owner: owner.to_string(),
            action,
        });
        Ok(())
    }

    /// Stop the active actions in `scope` and wait for all of them.
    ///
    /// Stopped actions leave the registry, so a later visit to their start
    /// step starts them again.
    pub async fn stop(&mut self, scope: StopScope<'_>) -> Vec<StopOutcome> {
        let (stopping, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|r| r.in_scope(scope));
        self.running = keep;

        let stopping: Vec<_> = stopping
            .into_iter()
            .filter(|r| r.action.status().is_active())
            .collect();
        if stopping.is_empty() {
            return Vec::new();
        }
        debug!(count = stopping.len(), "Stopping async actions");
        join_all(stopping.into_iter().map(|mut running| async move { running.action.stop().await })).await
    }

    /// Cancel every action without collecting results.
    pub async fn cancel_all(&mut self) {
        for mut running in self.running.drain(..) {
            if running.action.status().is_active() {
                running.action.cancel().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AsyncActionStatus;
    use async_trait::async_trait;
    use stepkit_core::BasicResult;

    struct Counter {
        configuration: AsyncActionConfiguration,
        status: AsyncActionStatus,
    }

    #[async_trait]
    impl AsyncAction for Counter {
        fn configuration(&self) -> &AsyncActionConfiguration {
            &self.configuration
        }

        fn status(&self) -> AsyncActionStatus {
            self.status
        }

        async fn start(&mut self) -> Result<(), AsyncActionError> {
            self.status = AsyncActionStatus::Running;
            Ok(())
        }

        async fn stop(&mut self) -> Result<Option<StepResult>, AsyncActionError> {
            self.status = AsyncActionStatus::Finished;
            Ok(Some(BasicResult::new(self.configuration.identifier.clone()).into()))
        }

        async fn cancel(&mut self) {
            self.status = AsyncActionStatus::Cancelled;
        }

        fn move_to(&mut self, _step: &Step, _path: &str) {}
    }

    struct Factory;

    impl AsyncActionFactory for Factory {
        fn make_action(
            &self,
            configuration: &AsyncActionConfiguration,
        ) -> Result<Box<dyn AsyncAction>, AsyncActionError> {
            Ok(Box::new(Counter {
                configuration: configuration.clone(),
                status: AsyncActionStatus::Idle,
            }))
        }
    }

    #[tokio::test]
    async fn test_stop_by_path_scope() {
        let mut registry = ActionRegistry::default();
        let config = |id: &str| AsyncActionConfiguration::new(id);
        registry.start(&Factory, &config("root"), "task").await.unwrap();
        registry.start(&Factory, &config("nested"), "task/section").await.unwrap();
        registry.start(&Factory, &config("sibling"), "task/sectionB").await.unwrap();
        assert!(registry.is_running("nested"));

        let outcomes = registry.stop(StopScope::WithinPath("task/section")).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].as_ref().unwrap().as_ref().unwrap().identifier(), "nested");
        assert!(!registry.is_running("nested"));
        assert_eq!(registry.active_count(), 2);

        let outcomes = registry.stop(StopScope::All).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_at_step() {
        let mut registry = ActionRegistry::default();
        let config = AsyncActionConfiguration::new("motion").with_stop_step("rest");
        registry.start(&Factory, &config, "task").await.unwrap();

        let at = |step| StopScope::AtStep { step, path: "task" };
        assert!(registry.stop(at("walk")).await.is_empty());
        assert_eq!(registry.stop(at("rest")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_at_step_ignores_actions_of_enclosing_paths() {
        let mut registry = ActionRegistry::default();
        let config = AsyncActionConfiguration::new("motion").with_stop_step("done");
        registry.start(&Factory, &config, "task").await.unwrap();

        let nested = StopScope::AtStep { step: "done", path: "task/section" };
        assert!(registry.stop(nested).await.is_empty());
        assert!(registry.is_running("motion"));

        let root = StopScope::AtStep { step: "done", path: "task" };
        assert_eq!(registry.stop(root).await.len(), 1);
    }
}
