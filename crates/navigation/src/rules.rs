//! Pluggable decision points consulted by the navigator.
//!
//! A [`Step`] carries the step-level rules as optional capability objects.
//! The navigator itself holds one optional [`ConditionalRule`] and a list of
//! injected [`TrackingRule`]s.

use std::fmt;

use stepkit_core::TaskResult;

use crate::step::Step;

/// A step that can name the step to go to after it.
pub trait NavigationRule: fmt::Debug + Send + Sync {
    /// Identifier of the next step, or `None` for positional navigation.
    ///
    /// `is_peeking` is set when the caller only wants to know whether a next
    /// step exists; rules with side effects should not apply them then.
    fn next_step_identifier(
        &self,
        result: &TaskResult,
        conditional_rule: Option<&dyn ConditionalRule>,
        is_peeking: bool,
    ) -> Option<String>;

    /// Identifiers this rule may return, used by validation.
    fn target_identifiers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A step that can ask to be skipped.
pub trait NavigationSkipRule: fmt::Debug + Send + Sync {
    /// Whether the step should be skipped for the current result.
    fn should_skip_step(
        &self,
        result: &TaskResult,
        conditional_rule: Option<&dyn ConditionalRule>,
        is_peeking: bool,
    ) -> bool;

    /// Answers this rule reads that must name a step, used by validation.
    fn referenced_identifiers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A step that can forbid going back from it.
pub trait NavigationBackRule: fmt::Debug + Send + Sync {
    /// Whether backward navigation is allowed from this step.
    fn allows_back_navigation(
        &self,
        result: &TaskResult,
        conditional_rule: Option<&dyn ConditionalRule>,
    ) -> bool;
}

/// Navigator-wide overrides for skip and next identifiers.
pub trait ConditionalRule: fmt::Debug + Send + Sync {
    /// Consulted before `step` is shown. `nextStep` skips the step, any
    /// other identifier jumps to that step.
    fn skip_to_step_identifier(&self, before: &Step, result: &TaskResult, is_peeking: bool) -> Option<String>;

    /// Consulted after `after` is shown to override the next identifier.
    fn next_step_identifier(&self, after: Option<&Step>, result: &TaskResult, is_peeking: bool) -> Option<String>;

    /// The replacement capability, if this rule has one.
    fn as_replacement(&self) -> Option<&dyn ConditionalReplacementRule> {
        None
    }
}

/// A conditional rule that can substitute the resolved step.
pub trait ConditionalReplacementRule: ConditionalRule {
    /// The step to show in place of `step`.
    fn replacement_step(&self, step: Option<Step>, result: &TaskResult) -> Option<Step>;
}

/// A stateful conditional rule injected into the navigator, e.g. cohort
/// tracking. Tracking rules are consulted before the navigator's own
/// conditional rule.
pub trait TrackingRule: ConditionalRule {
    /// Restore the initial state for a new run.
    fn reset(&self) {}
}
