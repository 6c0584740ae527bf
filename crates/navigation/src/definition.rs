//! JSON step definitions.
//!
//! Definitions are the serialized form of a step graph. Building a
//! definition attaches the concrete rules each step declares and the
//! injected tracking rules.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepkit_core::{AnswerResultType, AnswerValue, BaseValue, TaskInfo};
use tracing::debug;

use crate::cohort::{CohortAssignment, CohortNavigationRule};
use crate::error::{NavigationError, Result};
use crate::navigator::{ConditionalStepNavigator, NavigatorConfig};
use crate::rules::TrackingRule;
use crate::skip::{AnswerSkipRule, BackNavigationLock, DirectNavigationRule, SkipIfAnswered};
use crate::step::{ActiveStepExtras, Step, StepType, Subtask};
use crate::survey::{SurveyNavigationRule, SurveyRule, SurveyRuleOperator};

/// Serialized navigator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorDefinition {
    /// Steps in display order
    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    /// Curated identifiers used for progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_markers: Option<Vec<String>>,
}

/// Serialized survey rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRuleDefinition {
    /// Where to go on a match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_to_identifier: Option<String>,

    /// Expected answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_answer: Option<Value>,

    /// Comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_operator: Option<SurveyRuleOperator>,

    /// Cohort to assign
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
}

/// Skip a step based on another question's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipDefinition {
    /// Question to test
    pub identifier: String,
    /// Any match skips the step
    pub rules: Vec<SurveyRuleDefinition>,
}

/// Serialized step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Step identifier
    pub identifier: String,

    /// Step type name; unknown types are omitted when building
    #[serde(rename = "type")]
    pub step_type: String,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Display text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Answer type of a question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<AnswerResultType>,

    /// Active step extras
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveStepExtras>,

    /// Fixed next step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_identifier: Option<String>,

    /// Survey rules evaluated against this question's answer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub survey_rules: Vec<SurveyRuleDefinition>,

    /// Target when this question has no answer result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_to_if_nil: Option<String>,

    /// Skip when another answer matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<SkipDefinition>,

    /// Skip when this question already has an answer
    #[serde(default)]
    pub skip_if_answered: bool,

    /// Set to false to forbid going back from this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_back: Option<bool>,

    /// Cohort rules checked before the step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_cohort_rules: Vec<CohortNavigationRule>,

    /// Cohort rules checked after the step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_cohort_rules: Vec<CohortNavigationRule>,

    /// Nested steps of a section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<NavigatorDefinition>,

    /// Task loaded by a subtask step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_info: Option<TaskInfo>,
}

fn parse_step_type(name: &str) -> Option<StepType> {
    serde_json::from_value(Value::String(name.to_string())).ok()
}

/// Interpret a matching answer, using the question's type when known.
///
/// Sequence wrappers are stripped from the question's type: a JSON array
/// is decoded element by element into an array matching value.
fn matching_value(json: &Value, answer_type: Option<&AnswerResultType>) -> Result<AnswerValue> {
    let Some(answer_type) = answer_type else {
        return infer_value(json)
            .ok_or_else(|| NavigationError::Definition(format!("unsupported matching answer {json}")));
    };
    let scalar = AnswerResultType {
        sequence_type: None,
        sequence_separator: None,
        ..answer_type.clone()
    };
    let decode = |item: &Value| -> Result<BaseValue> {
        scalar
            .decode(item)
            .map_err(|e| NavigationError::Definition(e.to_string()))?
            .and_then(|value| value.as_single().cloned())
            .ok_or_else(|| NavigationError::Definition(format!("invalid matching answer {item}")))
    };
    match json {
        Value::Array(items) => Ok(AnswerValue::Array(items.iter().map(decode).collect::<Result<_>>()?)),
        other => decode(other).map(AnswerValue::Single),
    }
}

fn infer_base(json: &Value) -> Option<BaseValue> {
    Some(match json {
        Value::Bool(b) => BaseValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BaseValue::Integer(i),
            None => BaseValue::Decimal(n.as_f64()?),
        },
        Value::String(s) => BaseValue::String(s.clone()),
        Value::Null => return None,
        other => BaseValue::Codable(other.clone()),
    })
}

fn infer_value(json: &Value) -> Option<AnswerValue> {
    match json {
        Value::Array(items) => items.iter().map(infer_base).collect::<Option<Vec<_>>>().map(AnswerValue::Array),
        other => infer_base(other).map(AnswerValue::Single),
    }
}

impl SurveyRuleDefinition {
    fn build(&self, answer_type: Option<&AnswerResultType>) -> Result<SurveyRule> {
        let matching_answer = self
            .matching_answer
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| matching_value(v, answer_type))
            .transpose()?;
        Ok(SurveyRule {
            skip_to_identifier: self.skip_to_identifier.clone(),
            matching_answer,
            rule_operator: self.rule_operator,
            cohort: self.cohort.clone(),
        })
    }
}

impl StepDefinition {
    /// Build the step, or `None` for an unknown step type.
    pub fn build(
        &self,
        siblings: &[StepDefinition],
        tracking_rules: &[Arc<dyn TrackingRule>],
    ) -> Result<Option<Step>> {
        let Some(step_type) = parse_step_type(&self.step_type) else {
            debug!(step = %self.identifier, step_type = %self.step_type, "Omitting step of unknown type");
            return Ok(None);
        };
        let mut step = Step::new(self.identifier.clone(), step_type);
        step.title = self.title.clone();
        step.text = self.text.clone();
        step.answer_type = self.answer_type.clone();
        step.active = self.active.clone();
        step.before_cohort_rules = self.before_cohort_rules.clone();
        step.after_cohort_rules = self.after_cohort_rules.clone();

        if let Some(next) = &self.next_step_identifier {
            step.navigation_rule = Some(Arc::new(DirectNavigationRule::new(next.clone())));
        } else if !self.survey_rules.is_empty() || self.skip_to_if_nil.is_some() {
            let rules = self
                .survey_rules
                .iter()
                .map(|rule| rule.build(self.answer_type.as_ref()))
                .collect::<Result<Vec<_>>>()?;
            let mut survey = SurveyNavigationRule::new(self.identifier.clone(), rules);
            survey.skip_to_if_nil = self.skip_to_if_nil.clone();
            let survey = Arc::new(survey);
            if survey.rules.iter().any(|rule| rule.cohort.is_some()) {
                let assignment: Arc<dyn CohortAssignment> = survey.clone();
                step.cohort_assignment = Some(assignment);
            }
            step.navigation_rule = Some(survey);
        }

        if let Some(skip) = &self.skip_if {
            let answer_type = siblings
                .iter()
                .find(|s| s.identifier == skip.identifier)
                .and_then(|s| s.answer_type.as_ref());
            let rules = skip
                .rules
                .iter()
                .map(|rule| rule.build(answer_type))
                .collect::<Result<Vec<_>>>()?;
            step.skip_rule = Some(Arc::new(AnswerSkipRule::new(skip.identifier.clone(), rules)));
        } else if self.skip_if_answered {
            step.skip_rule = Some(Arc::new(SkipIfAnswered {
                identifier: self.identifier.clone(),
            }));
        }

        if self.allows_back == Some(false) {
            step.back_rule = Some(Arc::new(BackNavigationLock));
        }

        match (step_type, &self.section, &self.task_info) {
            (StepType::Section, Some(section), _) => {
                return Ok(Some(Step {
                    subtask: Some(Subtask::Section(Arc::new(section.build(tracking_rules)?))),
                    ..step
                }));
            }
            (StepType::Subtask, _, Some(info)) => {
                step.subtask = Some(Subtask::Task(info.clone()));
            }
            (StepType::Section | StepType::Subtask, _, _) => {
                return Err(NavigationError::Definition(format!(
                    "step '{}' has no nested steps",
                    self.identifier
                )));
            }
            _ => {}
        }
        Ok(Some(step))
    }
}

impl NavigatorDefinition {
    /// Build the navigator, injecting `tracking_rules` at every level.
    pub fn build(&self, tracking_rules: &[Arc<dyn TrackingRule>]) -> Result<ConditionalStepNavigator> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for definition in &self.steps {
            if let Some(step) = definition.build(&self.steps, tracking_rules)? {
                steps.push(step);
            }
        }
        Ok(ConditionalStepNavigator {
            steps,
            conditional_rule: None,
            progress_markers: self.progress_markers.clone(),
            tracking_rules: tracking_rules.to_vec(),
            config: NavigatorConfig::default(),
        })
    }
}
