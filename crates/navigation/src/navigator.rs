//! Conditional step navigation.
//!
//! [`ConditionalStepNavigator`] walks an ordered list of steps. The next
//! step is positional unless a section, a step's navigation rule, a
//! tracking rule, or the navigator's conditional rule names another one.
//! Candidate steps may then be skipped; skipping repeats the resolution
//! from the skipped step.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stepkit_core::{reserved, TaskResult};
use tracing::{debug, warn};

use crate::error::{NavigationError, Result};
use crate::progress::{estimated_progress, marker_progress, Progress};
use crate::rules::{ConditionalRule, TrackingRule};
use crate::step::Step;

/// Navigator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorConfig {
    /// Upper bound on skipped steps in one resolution
    pub max_skip_iterations: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_skip_iterations: 256,
        }
    }
}

/// Direction of a step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepDirection {
    /// Moving to a step not yet answered
    Forward,
    /// Moving to a step that already has a result
    Reverse,
    /// No movement
    None,
}

/// Outcome of [`ConditionalStepNavigator::step_after`].
#[derive(Debug, Clone)]
pub struct Navigation {
    /// The next step, `None` at the end of the task
    pub step: Option<Step>,
    /// Direction of the move
    pub direction: StepDirection,
    /// Set when a rule named the exit identifier
    pub is_exit: bool,
}

impl Navigation {
    fn exit() -> Self {
        Self {
            step: None,
            direction: StepDirection::Forward,
            is_exit: true,
        }
    }
}

/// Navigates an ordered list of steps with conditional rules.
#[derive(Debug, Clone, Default)]
pub struct ConditionalStepNavigator {
    /// Steps in display order
    pub steps: Vec<Step>,

    /// Navigator-wide rule
    pub conditional_rule: Option<Arc<dyn ConditionalRule>>,

    /// Curated identifiers used for progress
    pub progress_markers: Option<Vec<String>>,

    /// Injected tracking rules, consulted before the conditional rule
    pub tracking_rules: Vec<Arc<dyn TrackingRule>>,

    /// Configuration
    pub config: NavigatorConfig,
}

impl ConditionalStepNavigator {
    /// Navigate `steps` with no rules.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Set the conditional rule.
    pub fn with_conditional_rule(mut self, rule: Arc<dyn ConditionalRule>) -> Self {
        self.conditional_rule = Some(rule);
        self
    }

    /// Set the tracking rules.
    pub fn with_tracking_rules(mut self, rules: Vec<Arc<dyn TrackingRule>>) -> Self {
        self.tracking_rules = rules;
        self
    }

    /// Set the progress markers.
    pub fn with_progress_markers(mut self, markers: Vec<String>) -> Self {
        self.progress_markers = Some(markers);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: NavigatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Find a step at this level.
    pub fn step(&self, identifier: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.identifier == identifier)
    }

    /// Restore every tracking rule, here and in sections, to its initial state.
    pub fn reset_tracking_rules(&self) {
        for rule in &self.tracking_rules {
            rule.reset();
        }
        for navigator in self.steps.iter().filter_map(Step::navigator) {
            navigator.reset_tracking_rules();
        }
    }

    fn conditional(&self) -> Option<&dyn ConditionalRule> {
        self.conditional_rule.as_deref()
    }

    fn positional_step_after(&self, step: Option<&Step>) -> Option<&Step> {
        match step {
            Some(previous) => {
                let idx = self.steps.iter().position(|s| s.identifier == previous.identifier)?;
                self.steps.get(idx + 1)
            }
            None => self.steps.first(),
        }
    }

    fn check_conditional_rules(&self, after: Option<&Step>, result: &TaskResult, is_peeking: bool) -> Option<String> {
        for rule in &self.tracking_rules {
            if let Some(identifier) = rule.next_step_identifier(after, result, is_peeking) {
                return Some(identifier);
            }
        }
        self.conditional_rule
            .as_ref()?
            .next_step_identifier(after, result, is_peeking)
    }

    fn check_conditional_skip_rules(&self, before: &Step, result: &TaskResult, is_peeking: bool) -> Option<String> {
        for rule in &self.tracking_rules {
            if let Some(identifier) = rule.skip_to_step_identifier(before, result, is_peeking) {
                return Some(identifier);
            }
        }
        self.conditional_rule
            .as_ref()?
            .skip_to_step_identifier(before, result, is_peeking)
    }

    /// Next identifier named from inside a section, looked up in the
    /// section's result within `parent_result`.
    fn section_next_identifier(&self, section: &str, parent_result: &TaskResult, is_peeking: bool) -> Option<String> {
        let child = parent_result.find_result(section)?.as_task()?;
        let previous = self.step(child.last_identifier()?)?;
        self.next_step_identifier(Some(previous), child, is_peeking)
            .filter(|id| id != reserved::NEXT_STEP && id != reserved::NEXT_SECTION)
    }

    /// The identifier named by rules after `after`, or `None` for
    /// positional navigation.
    pub fn next_step_identifier(&self, after: Option<&Step>, result: &TaskResult, is_peeking: bool) -> Option<String> {
        if let Some(step) = after {
            if let Some(identifier) = step
                .navigator()
                .and_then(|section| section.section_next_identifier(&step.identifier, result, is_peeking))
            {
                return Some(identifier);
            }
            if let Some(identifier) = step
                .navigation_rule
                .as_ref()
                .and_then(|rule| rule.next_step_identifier(result, self.conditional(), is_peeking))
            {
                return Some(identifier);
            }
        }
        self.check_conditional_rules(after, result, is_peeking)
    }

    /// Whether the rules after `step` ask to exit the task.
    pub fn should_exit(&self, step: Option<&Step>, result: &TaskResult) -> bool {
        self.next_step_identifier(step, result, false).as_deref() == Some(reserved::EXIT)
    }

    /// Whether a step follows `step`, without applying rule side effects.
    pub fn has_step_after(&self, step: Option<&Step>, result: &TaskResult) -> bool {
        match self.resolve_step_after(step, result, true) {
            Ok(navigation) => navigation.is_some_and(|n| n.step.is_some()),
            Err(e) => {
                warn!(error = %e, "Cannot resolve next step");
                false
            }
        }
    }

    /// Whether a step precedes `step`.
    pub fn has_step_before(&self, step: &Step, result: &TaskResult) -> bool {
        self.step_before(step, result).is_some()
    }

    /// The step to show after `step` (or the first step when `None`).
    ///
    /// A `None` step in the returned navigation ends the task. Fails only
    /// when skip rules cycle.
    pub fn step_after(&self, step: Option<&Step>, result: &TaskResult) -> Result<Navigation> {
        Ok(self
            .resolve_step_after(step, result, false)?
            .unwrap_or_else(Navigation::exit))
    }

    /// `Ok(None)` means the rules asked to exit.
    fn resolve_step_after(&self, step: Option<&Step>, result: &TaskResult, is_peeking: bool) -> Result<Option<Navigation>> {
        let mut direction = StepDirection::Forward;
        let mut previous = step;
        let mut candidate: Option<&Step>;
        let mut skipped: HashSet<&str> = HashSet::new();

        loop {
            candidate = match self.next_step_identifier(previous, result, is_peeking) {
                Some(id) if id == reserved::EXIT => {
                    debug!(after = ?previous.map(|s| &s.identifier), "Exit requested");
                    return Ok(None);
                }
                Some(id) if id == reserved::NEXT_SECTION => None,
                Some(id) if id != reserved::NEXT_STEP => {
                    if result.find_result(&id).is_some() {
                        direction = StepDirection::Reverse;
                    }
                    self.step(&id)
                }
                _ => self.positional_step_after(previous),
            };

            let mut should_skip = false;
            if let Some(step) = candidate {
                match self.check_conditional_skip_rules(step, result, is_peeking) {
                    Some(id) if id == reserved::NEXT_STEP => should_skip = true,
                    Some(id) => candidate = self.step(&id),
                    None => {}
                }
            }
            if !should_skip {
                if let Some(rule) = candidate.and_then(|s| s.skip_rule.as_ref()) {
                    should_skip = rule.should_skip_step(result, self.conditional(), is_peeking);
                }
            }

            let Some(step) = candidate.filter(|_| should_skip) else {
                break;
            };
            if !skipped.insert(step.identifier.as_str()) || skipped.len() > self.config.max_skip_iterations {
                return Err(NavigationError::SkipCycle {
                    identifier: step.identifier.clone(),
                });
            }
            debug!(step = %step.identifier, "Skipping step");
            previous = Some(step);
        }

        let mut next = candidate.cloned();
        if let Some(replacement) = self.conditional_rule.as_ref().and_then(|rule| rule.as_replacement()) {
            next = replacement.replacement_step(next, result);
        }
        Ok(Some(Navigation {
            step: next,
            direction,
            is_exit: false,
        }))
    }

    /// The step to show when going back from `step`.
    ///
    /// Uses the entry preceding `step` in the history (the last entry when
    /// `step` has no result yet), falling back to the positional
    /// predecessor.
    pub fn step_before(&self, step: &Step, result: &TaskResult) -> Option<Step> {
        if let Some(rule) = &step.back_rule {
            if !rule.allows_back_navigation(result, self.conditional()) {
                return None;
            }
        }
        let history = &result.step_history;
        let previous_idx = match history.iter().position(|r| r.identifier() == step.identifier) {
            Some(idx) => idx.checked_sub(1),
            None => history.len().checked_sub(1),
        };
        let from_history = previous_idx.and_then(|idx| self.step(history[idx].identifier()));
        if let Some(previous) = from_history {
            return Some(previous.clone());
        }
        let idx = self.steps.iter().position(|s| s.identifier == step.identifier)?;
        idx.checked_sub(1).map(|i| self.steps[i].clone())
    }

    /// Progress of `step` given the steps shown so far.
    pub fn progress(&self, step: &Step, result: &TaskResult) -> Option<Progress> {
        let history: Vec<&str> = result.step_history.iter().map(|r| r.identifier()).collect();
        match &self.progress_markers {
            Some(markers) => marker_progress(markers, &history, &step.identifier),
            None => Some(estimated_progress(
                self.steps.iter().map(|s| s.identifier.as_str()),
                &history,
                &step.identifier,
            )),
        }
    }
}
