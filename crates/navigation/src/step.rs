//! Step definitions.
//!
//! A [`Step`] is a plain value. Navigation behavior is attached by
//! composition: optional rule objects, optional cohort rules, and an
//! optional nested navigator or task reference for section and subtask
//! steps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stepkit_core::{AnswerResult, AnswerResultType, BasicResult, CollectionResult, StepResult, TaskInfo, TaskResult};

use crate::cohort::{CohortAssignment, CohortNavigationRule};
use crate::navigator::ConditionalStepNavigator;
use crate::rules::{NavigationBackRule, NavigationRule, NavigationSkipRule};

/// Kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepType {
    /// Text only
    Instruction,
    /// A single question
    Question,
    /// Several questions answered together
    Form,
    /// Runs recorders while shown
    Active,
    /// Counts down before an active step
    Countdown,
    /// Final step of a task
    Completion,
    /// Inline group of steps with its own navigator
    Section,
    /// A separate task fetched on demand
    Subtask,
}

/// Extra fields for steps that run for a period of time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStepExtras {
    /// Run time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Keep recording when the app moves to the background
    #[serde(default)]
    pub requires_background_audio: bool,

    /// End the step if it is interrupted
    #[serde(default)]
    pub should_end_on_interrupt: bool,
}

/// Nested content of a section or subtask step.
#[derive(Debug, Clone)]
pub enum Subtask {
    /// Steps navigated inline with their own navigator
    Section(Arc<ConditionalStepNavigator>),
    /// A task loaded through the task repository
    Task(TaskInfo),
}

/// One unit of a task.
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique within the navigator that holds the step
    pub identifier: String,

    /// Kind of step
    pub step_type: StepType,

    /// Display title
    pub title: Option<String>,

    /// Display text
    pub text: Option<String>,

    /// Answer type for question steps
    pub answer_type: Option<AnswerResultType>,

    /// Timing extras for active steps
    pub active: Option<ActiveStepExtras>,

    /// Explicit next-step rule
    pub navigation_rule: Option<Arc<dyn NavigationRule>>,

    /// Skip rule evaluated before the step is shown
    pub skip_rule: Option<Arc<dyn NavigationSkipRule>>,

    /// Back navigation rule
    pub back_rule: Option<Arc<dyn NavigationBackRule>>,

    /// Cohort changes applied after the step
    pub cohort_assignment: Option<Arc<dyn CohortAssignment>>,

    /// Cohort rules checked before the step is shown
    pub before_cohort_rules: Vec<CohortNavigationRule>,

    /// Cohort rules checked after the step
    pub after_cohort_rules: Vec<CohortNavigationRule>,

    /// Nested steps for section and subtask steps
    pub subtask: Option<Subtask>,
}

impl Step {
    /// Create a step with no rules attached.
    pub fn new(identifier: impl Into<String>, step_type: StepType) -> Self {
        Self {
            identifier: identifier.into(),
            step_type,
            title: None,
            text: None,
            answer_type: None,
            active: None,
            navigation_rule: None,
            skip_rule: None,
            back_rule: None,
            cohort_assignment: None,
            before_cohort_rules: Vec::new(),
            after_cohort_rules: Vec::new(),
            subtask: None,
        }
    }

    /// An instruction step.
    pub fn instruction(identifier: impl Into<String>) -> Self {
        Self::new(identifier, StepType::Instruction)
    }

    /// A question step answered with `answer_type`.
    pub fn question(identifier: impl Into<String>, answer_type: AnswerResultType) -> Self {
        let mut step = Self::new(identifier, StepType::Question);
        step.answer_type = Some(answer_type);
        step
    }

    /// A form step collecting several answers.
    pub fn form(identifier: impl Into<String>) -> Self {
        Self::new(identifier, StepType::Form)
    }

    /// A completion step.
    pub fn completion(identifier: impl Into<String>) -> Self {
        Self::new(identifier, StepType::Completion)
    }

    /// A section navigated inline.
    pub fn section(identifier: impl Into<String>, navigator: ConditionalStepNavigator) -> Self {
        let mut step = Self::new(identifier, StepType::Section);
        step.subtask = Some(Subtask::Section(Arc::new(navigator)));
        step
    }

    /// A subtask loaded on demand.
    pub fn subtask(identifier: impl Into<String>, info: TaskInfo) -> Self {
        let mut step = Self::new(identifier, StepType::Subtask);
        step.subtask = Some(Subtask::Task(info));
        step
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attach active step extras.
    pub fn with_active(mut self, extras: ActiveStepExtras) -> Self {
        self.active = Some(extras);
        self
    }

    /// Attach a navigation rule.
    pub fn with_navigation_rule(mut self, rule: Arc<dyn NavigationRule>) -> Self {
        self.navigation_rule = Some(rule);
        self
    }

    /// Attach a skip rule.
    pub fn with_skip_rule(mut self, rule: Arc<dyn NavigationSkipRule>) -> Self {
        self.skip_rule = Some(rule);
        self
    }

    /// Attach a back rule.
    pub fn with_back_rule(mut self, rule: Arc<dyn NavigationBackRule>) -> Self {
        self.back_rule = Some(rule);
        self
    }

    /// Attach a cohort assignment.
    pub fn with_cohort_assignment(mut self, assignment: Arc<dyn CohortAssignment>) -> Self {
        self.cohort_assignment = Some(assignment);
        self
    }

    /// Set cohort rules checked before and after the step.
    pub fn with_cohort_rules(
        mut self,
        before: Vec<CohortNavigationRule>,
        after: Vec<CohortNavigationRule>,
    ) -> Self {
        self.before_cohort_rules = before;
        self.after_cohort_rules = after;
        self
    }

    /// Copy this step under a new identifier, keeping every rule.
    pub fn copy_with_identifier(&self, identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..self.clone()
        }
    }

    /// The inline navigator of a section step.
    pub fn navigator(&self) -> Option<&ConditionalStepNavigator> {
        match &self.subtask {
            Some(Subtask::Section(navigator)) => Some(navigator),
            _ => None,
        }
    }

    /// The task reference of a subtask step.
    pub fn task_info(&self) -> Option<&TaskInfo> {
        match &self.subtask {
            Some(Subtask::Task(info)) => Some(info),
            _ => None,
        }
    }

    /// Whether the step owns nested steps.
    pub fn is_nested(&self) -> bool {
        self.subtask.is_some()
    }

    /// Whether this is a completion step.
    pub fn is_completion(&self) -> bool {
        self.step_type == StepType::Completion
    }

    /// The empty result recorded when the step is shown.
    pub fn instantiate_step_result(&self) -> StepResult {
        if self.is_nested() {
            return TaskResult::new(self.identifier.clone()).into();
        }
        if let Some(answer_type) = &self.answer_type {
            return AnswerResult::new(self.identifier.clone(), answer_type.clone()).into();
        }
        match self.step_type {
            StepType::Form => CollectionResult::new(self.identifier.clone()).into(),
            _ => BasicResult::new(self.identifier.clone()).into(),
        }
    }
}
