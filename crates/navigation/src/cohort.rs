//! Cohort tracking.
//!
//! A [`CohortTrackingRule`] remembers which cohorts the participant belongs
//! to. Steps change the set through a [`CohortAssignment`] and react to it
//! with before/after [`CohortNavigationRule`] lists.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use stepkit_core::{reserved, TaskResult};
use tracing::debug;

use crate::rules::{ConditionalRule, TrackingRule};
use crate::step::Step;

/// How required cohorts are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CohortRuleOperator {
    /// Every required cohort must be present
    #[default]
    All,
    /// At least one required cohort must be present
    Any,
}

/// Skip rule keyed on cohort membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortNavigationRule {
    /// Cohorts tested by the rule; an empty set never applies
    pub required_cohorts: BTreeSet<String>,

    /// Combination of the required cohorts, `all` when absent
    #[serde(default, rename = "operator", skip_serializing_if = "Option::is_none")]
    pub cohort_operator: Option<CohortRuleOperator>,

    /// Target when the rule applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_to_identifier: Option<String>,
}

impl CohortNavigationRule {
    /// A rule requiring `cohorts`.
    pub fn new<I, S>(cohorts: I, operator: CohortRuleOperator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_cohorts: cohorts.into_iter().map(Into::into).collect(),
            cohort_operator: Some(operator),
            skip_to_identifier: None,
        }
    }

    /// Set the target.
    pub fn with_skip_to(mut self, identifier: impl Into<String>) -> Self {
        self.skip_to_identifier = Some(identifier.into());
        self
    }

    fn applies_to(&self, cohorts: &BTreeSet<String>) -> bool {
        if self.required_cohorts.is_empty() {
            return false;
        }
        let present = self.required_cohorts.intersection(cohorts).count();
        match self.cohort_operator.unwrap_or_default() {
            CohortRuleOperator::All => present == self.required_cohorts.len(),
            CohortRuleOperator::Any => present > 0,
        }
    }
}

/// Cohorts to add and remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortChange {
    /// Cohorts joined
    pub add: BTreeSet<String>,
    /// Cohorts left
    pub remove: BTreeSet<String>,
}

impl CohortChange {
    /// Whether the change does nothing.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// A step capability that changes cohort membership after the step.
pub trait CohortAssignment: fmt::Debug + Send + Sync {
    /// Cohort change implied by `result`.
    fn cohorts_to_apply(&self, result: &TaskResult) -> Option<CohortChange>;
}

/// Tracks cohort membership across a run.
#[derive(Debug, Default)]
pub struct CohortTrackingRule {
    initial_cohorts: BTreeSet<String>,
    current_cohorts: RwLock<BTreeSet<String>>,
}

impl CohortTrackingRule {
    /// Start with `initial` cohorts.
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let initial_cohorts: BTreeSet<String> = initial.into_iter().map(Into::into).collect();
        Self {
            current_cohorts: RwLock::new(initial_cohorts.clone()),
            initial_cohorts,
        }
    }

    /// Current cohorts.
    pub fn current_cohorts(&self) -> BTreeSet<String> {
        self.current_cohorts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply(&self, change: CohortChange) {
        debug!(add = ?change.add, remove = ?change.remove, "Applying cohort change");
        let mut cohorts = self
            .current_cohorts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cohorts.extend(change.add);
        cohorts.retain(|c| !change.remove.contains(c));
    }

    fn apply_rules(&self, rules: &[CohortNavigationRule], is_before: bool) -> Option<String> {
        let cohorts = self.current_cohorts();
        let rule = rules.iter().find(|rule| rule.applies_to(&cohorts))?;
        Some(match &rule.skip_to_identifier {
            Some(identifier) => identifier.clone(),
            None if is_before => reserved::NEXT_STEP.to_string(),
            None => reserved::NEXT_SECTION.to_string(),
        })
    }
}

impl ConditionalRule for CohortTrackingRule {
    fn skip_to_step_identifier(&self, before: &Step, _result: &TaskResult, _is_peeking: bool) -> Option<String> {
        self.apply_rules(&before.before_cohort_rules, true)
    }

    fn next_step_identifier(&self, after: Option<&Step>, result: &TaskResult, is_peeking: bool) -> Option<String> {
        if is_peeking {
            return None;
        }
        let step = after?;
        if let Some(change) = step
            .cohort_assignment
            .as_ref()
            .and_then(|assignment| assignment.cohorts_to_apply(result))
        {
            self.apply(change);
        }
        self.apply_rules(&step.after_cohort_rules, false)
    }
}

impl TrackingRule for CohortTrackingRule {
    fn reset(&self) {
        *self
            .current_cohorts
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.initial_cohorts.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Assign(&'static str);

    impl CohortAssignment for Assign {
        fn cohorts_to_apply(&self, _result: &TaskResult) -> Option<CohortChange> {
            let mut change = CohortChange::default();
            change.add.insert(self.0.to_string());
            Some(change)
        }
    }

    #[test]
    fn test_all_and_any_operators() {
        let cohorts: BTreeSet<String> = ["a".to_string()].into();
        assert!(!CohortNavigationRule::new(["a", "b"], CohortRuleOperator::All).applies_to(&cohorts));
        assert!(CohortNavigationRule::new(["a", "b"], CohortRuleOperator::Any).applies_to(&cohorts));
        assert!(!CohortNavigationRule::new(Vec::<String>::new(), CohortRuleOperator::Any).applies_to(&cohorts));
    }

    #[test]
    fn test_default_targets_depend_on_position() {
        let rule = CohortTrackingRule::new(["blue"]);
        let step = Step::instruction("s").with_cohort_rules(
            vec![CohortNavigationRule::new(["blue"], CohortRuleOperator::All)],
            vec![CohortNavigationRule::new(["blue"], CohortRuleOperator::All)],
        );
        let result = TaskResult::new("task");

        assert_eq!(
            rule.skip_to_step_identifier(&step, &result, false).as_deref(),
            Some("nextStep")
        );
        assert_eq!(
            ConditionalRule::next_step_identifier(&rule, Some(&step), &result, false).as_deref(),
            Some("nextSection")
        );
    }

    #[test]
    fn test_assignment_applies_only_when_not_peeking() {
        let rule = CohortTrackingRule::default();
        let step = Step::instruction("s").with_cohort_assignment(Arc::new(Assign("green")));
        let result = TaskResult::new("task");

        ConditionalRule::next_step_identifier(&rule, Some(&step), &result, true);
        assert!(rule.current_cohorts().is_empty());

        ConditionalRule::next_step_identifier(&rule, Some(&step), &result, false);
        assert!(rule.current_cohorts().contains("green"));

        rule.reset();
        assert!(rule.current_cohorts().is_empty());
    }
}
