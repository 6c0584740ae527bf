//! Built-in step rules.

use stepkit_core::{AnswerResult, StepResult, TaskResult};

use crate::rules::{ConditionalRule, NavigationBackRule, NavigationRule, NavigationSkipRule};
use crate::survey::SurveyRule;

/// Always go to a fixed step next.
#[derive(Debug, Clone)]
pub struct DirectNavigationRule {
    /// Target step, or a reserved identifier
    pub next_step_identifier: String,
}

impl DirectNavigationRule {
    /// Go to `identifier` next.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            next_step_identifier: identifier.into(),
        }
    }
}

impl NavigationRule for DirectNavigationRule {
    fn next_step_identifier(
        &self,
        _result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
        _is_peeking: bool,
    ) -> Option<String> {
        Some(self.next_step_identifier.clone())
    }

    fn target_identifiers(&self) -> Vec<String> {
        vec![self.next_step_identifier.clone()]
    }
}

/// Skip the step when a survey rule matches the answer to another question.
///
/// `AnswerSkipRule::new("q1", vec![SurveyRule::equal("no")])` skips the step
/// whenever q1 was answered "no".
#[derive(Debug, Clone)]
pub struct AnswerSkipRule {
    /// Identifier of the answer to test
    pub identifier: String,
    /// Any match skips the step
    pub rules: Vec<SurveyRule>,
}

impl AnswerSkipRule {
    /// Skip based on the answer `identifier`.
    pub fn new(identifier: impl Into<String>, rules: Vec<SurveyRule>) -> Self {
        Self {
            identifier: identifier.into(),
            rules,
        }
    }
}

impl NavigationSkipRule for AnswerSkipRule {
    fn should_skip_step(
        &self,
        result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
        _is_peeking: bool,
    ) -> bool {
        let answer = result.find_answer_result(&self.identifier);
        self.rules.iter().any(|rule| rule.evaluate(answer).is_some())
    }

    fn referenced_identifiers(&self) -> Vec<String> {
        vec![self.identifier.clone()]
    }
}

/// Skip the step when it already has a non-nil answer, e.g. data carried
/// over from an earlier run.
#[derive(Debug, Clone)]
pub struct SkipIfAnswered {
    /// Identifier of the answer to test
    pub identifier: String,
}

impl NavigationSkipRule for SkipIfAnswered {
    fn should_skip_step(
        &self,
        result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
        _is_peeking: bool,
    ) -> bool {
        result
            .find_answer_result(&self.identifier)
            .is_some_and(|answer| answer.value.is_some())
    }
}

/// Skip the step when every listed answer is missing or nil.
///
/// With no identifiers the answers of the collection result named
/// `collection` are tested instead.
#[derive(Debug, Clone, Default)]
pub struct SkipIfAllNil {
    /// Answers to test
    pub identifiers: Vec<String>,
    /// Collection whose inputs are tested when `identifiers` is empty
    pub collection: Option<String>,
}

impl NavigationSkipRule for SkipIfAllNil {
    fn should_skip_step(
        &self,
        result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
        _is_peeking: bool,
    ) -> bool {
        let answered = |answer: Option<&AnswerResult>| answer.is_some_and(|a| a.value.is_some());
        if !self.identifiers.is_empty() {
            return !self
                .identifiers
                .iter()
                .any(|id| answered(result.find_answer_result(id)));
        }
        let Some(collection) = self
            .collection
            .as_deref()
            .and_then(|id| result.find_result(id))
            .and_then(StepResult::as_collection)
        else {
            return true;
        };
        !collection
            .input_results
            .iter()
            .any(|input| answered(input.as_answer()))
    }
}

/// Forbids going back from the step.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackNavigationLock;

impl NavigationBackRule for BackNavigationLock {
    fn allows_back_navigation(
        &self,
        _result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
    ) -> bool {
        false
    }
}
