//! Survey rules: compare an answer against an expected value and name the
//! step to go to when they match.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use stepkit_core::{reserved, AnswerResult, AnswerValue, BaseValue, TaskResult};

use crate::cohort::{CohortAssignment, CohortChange};
use crate::rules::{ConditionalRule, NavigationRule};

/// Comparison applied by a [`SurveyRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurveyRuleOperator {
    /// Matches only when the answer is nil
    #[serde(rename = "de")]
    Skip,
    /// Equal, or "any of" for array answers
    #[serde(rename = "eq")]
    Equal,
    /// Not equal
    #[serde(rename = "ne")]
    NotEqual,
    /// Less than
    #[serde(rename = "lt")]
    LessThan,
    /// Greater than
    #[serde(rename = "gt")]
    GreaterThan,
    /// Less than or equal
    #[serde(rename = "le")]
    LessThanEqual,
    /// Greater than or equal
    #[serde(rename = "ge")]
    GreaterThanEqual,
    /// Not equal, or "none of" for array answers
    #[serde(rename = "ot")]
    OtherThan,
}

/// One rule attached to a question.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurveyRule {
    /// Where to go on a match; `exit` when absent
    pub skip_to_identifier: Option<String>,
    /// Value to compare the answer against
    pub matching_answer: Option<AnswerValue>,
    /// Comparison; `eq` when absent unless there is no matching answer
    pub rule_operator: Option<SurveyRuleOperator>,
    /// Cohort added on a match and removed otherwise
    pub cohort: Option<String>,
}

impl SurveyRule {
    /// A rule matching `value` with `operator`.
    pub fn new(operator: SurveyRuleOperator, value: impl Into<AnswerValue>) -> Self {
        Self {
            matching_answer: Some(value.into()),
            rule_operator: Some(operator),
            ..Default::default()
        }
    }

    /// A rule matching answers equal to `value`.
    pub fn equal(value: impl Into<AnswerValue>) -> Self {
        Self::new(SurveyRuleOperator::Equal, value)
    }

    /// A rule matching nil answers.
    pub fn skip() -> Self {
        Self {
            rule_operator: Some(SurveyRuleOperator::Skip),
            ..Default::default()
        }
    }

    /// Set the step to go to on a match.
    pub fn with_skip_to(mut self, identifier: impl Into<String>) -> Self {
        self.skip_to_identifier = Some(identifier.into());
        self
    }

    /// Set the cohort.
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// The operator in effect.
    pub fn operator(&self) -> SurveyRuleOperator {
        match (self.rule_operator, &self.matching_answer) {
            (Some(op), _) => op,
            (None, None) => SurveyRuleOperator::Skip,
            (None, Some(_)) => SurveyRuleOperator::Equal,
        }
    }

    fn target(&self) -> String {
        self.skip_to_identifier
            .clone()
            .unwrap_or_else(|| reserved::EXIT.to_string())
    }

    /// The skip target when `answer` matches this rule.
    pub fn evaluate(&self, answer: Option<&AnswerResult>) -> Option<String> {
        let op = self.operator();
        let Some(value) = answer.and_then(|a| a.value.as_ref()) else {
            return (op == SurveyRuleOperator::Skip).then(|| self.target());
        };
        if op == SurveyRuleOperator::Skip {
            return None;
        }
        let matching = self.matching_answer.as_ref()?;
        let is_array = matches!(value, AnswerValue::Array(_));

        let matched = match op {
            SurveyRuleOperator::Skip => false,
            SurveyRuleOperator::Equal if is_array => any_in(matching, value),
            SurveyRuleOperator::Equal => values_equal(value, matching),
            SurveyRuleOperator::NotEqual => !values_equal(value, matching),
            SurveyRuleOperator::OtherThan if is_array => !any_in(matching, value),
            SurveyRuleOperator::OtherThan => !values_equal(value, matching),
            SurveyRuleOperator::LessThan => compare(value, matching) == Some(Ordering::Less),
            SurveyRuleOperator::GreaterThan => compare(value, matching) == Some(Ordering::Greater),
            SurveyRuleOperator::LessThanEqual => {
                matches!(compare(value, matching), Some(Ordering::Less | Ordering::Equal))
            }
            SurveyRuleOperator::GreaterThanEqual => {
                matches!(compare(value, matching), Some(Ordering::Greater | Ordering::Equal))
            }
        };
        matched.then(|| self.target())
    }

    /// Cohort change implied by `answer`, if the rule names a cohort.
    pub fn evaluate_cohorts(&self, answer: Option<&AnswerResult>) -> Option<CohortChange> {
        let cohort = self.cohort.clone()?;
        let mut change = CohortChange::default();
        if self.evaluate(answer).is_some() {
            change.add.insert(cohort);
        } else {
            change.remove.insert(cohort);
        }
        Some(change)
    }
}

/// Any of the matching values is contained in the answer.
fn any_in(matching: &AnswerValue, answer: &AnswerValue) -> bool {
    let answers = answer.elements();
    matching
        .elements()
        .into_iter()
        .any(|m| answers.iter().any(|a| a.matches(m)))
}

fn values_equal(a: &AnswerValue, b: &AnswerValue) -> bool {
    let (left, right) = (a.elements(), b.elements());
    left.len() == right.len() && left.iter().zip(right.iter()).all(|(x, y)| x.matches(y))
}

fn compare(a: &AnswerValue, b: &AnswerValue) -> Option<Ordering> {
    match (a.as_single()?, b.as_single()?) {
        (BaseValue::String(x), BaseValue::String(y)) => Some(x.cmp(y)),
        (x, y) => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

/// Navigation driven by the survey rules of one question.
#[derive(Debug, Clone, Default)]
pub struct SurveyNavigationRule {
    /// Identifier of the answer to evaluate
    pub identifier: String,
    /// Where to go when there is no answer result at all
    pub skip_to_if_nil: Option<String>,
    /// Rules evaluated against the answer
    pub rules: Vec<SurveyRule>,
}

impl SurveyNavigationRule {
    /// Rules for the answer `identifier`.
    pub fn new(identifier: impl Into<String>, rules: Vec<SurveyRule>) -> Self {
        Self {
            identifier: identifier.into(),
            skip_to_if_nil: None,
            rules,
        }
    }

    /// Set the nil-answer target.
    pub fn with_skip_to_if_nil(mut self, identifier: impl Into<String>) -> Self {
        self.skip_to_if_nil = Some(identifier.into());
        self
    }
}

impl NavigationRule for SurveyNavigationRule {
    fn next_step_identifier(
        &self,
        result: &TaskResult,
        _conditional_rule: Option<&dyn ConditionalRule>,
        is_peeking: bool,
    ) -> Option<String> {
        if is_peeking {
            return None;
        }
        let Some(answer) = result.find_answer_result(&self.identifier) else {
            return self.skip_to_if_nil.clone();
        };
        let mut targets: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(Some(answer)))
            .collect();
        if targets.len() == 1 {
            targets.pop()
        } else {
            None
        }
    }

    fn target_identifiers(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|rule| rule.skip_to_identifier.clone())
            .chain(self.skip_to_if_nil.clone())
            .collect()
    }
}

impl CohortAssignment for SurveyNavigationRule {
    fn cohorts_to_apply(&self, result: &TaskResult) -> Option<CohortChange> {
        let answer = result.find_answer_result(&self.identifier);
        let mut change = CohortChange::default();
        for rule in &self.rules {
            if let Some(rule_change) = rule.evaluate_cohorts(answer) {
                change.add.extend(rule_change.add);
                change.remove.extend(rule_change.remove);
            }
        }
        (!change.is_empty()).then_some(change)
    }
}
