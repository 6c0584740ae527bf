//! Eager validation of a step graph.

use std::collections::HashSet;

use stepkit_core::reserved;

use crate::error::{NavigationError, Result};
use crate::navigator::ConditionalStepNavigator;
use crate::step::Step;

impl ConditionalStepNavigator {
    /// Check the step graph before any step is shown.
    ///
    /// Identifiers must be unique per level, every rule target and skip
    /// rule answer must name a reserved identifier or a step at this level
    /// or an enclosing one, and
    /// every progress marker must name a step at this level. Sections are
    /// validated recursively.
    pub fn validate(&self) -> Result<()> {
        self.validate_in_scope(&[])
    }

    fn validate_in_scope(&self, ancestors: &[&ConditionalStepNavigator]) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.identifier.as_str()) {
                return Err(NavigationError::DuplicateIdentifier(step.identifier.clone()));
            }
        }

        let is_known = |id: &str| {
            reserved::is_reserved(id)
                || seen.contains(id)
                || ancestors.iter().any(|navigator| navigator.step(id).is_some())
        };

        let mut scope = ancestors.to_vec();
        scope.push(self);
        for step in &self.steps {
            if let Some(target) = rule_targets(step).into_iter().find(|t| !is_known(t)) {
                return Err(NavigationError::UnknownIdentifier {
                    step: step.identifier.clone(),
                    target,
                });
            }
            if let Some(section) = step.navigator() {
                section.validate_in_scope(&scope)?;
            }
        }

        if let Some(markers) = &self.progress_markers {
            if let Some(marker) = markers.iter().find(|m| !seen.contains(m.as_str())) {
                return Err(NavigationError::UnknownProgressMarker(marker.clone()));
            }
        }
        Ok(())
    }
}

fn rule_targets(step: &Step) -> Vec<String> {
    let mut targets = step
        .navigation_rule
        .as_ref()
        .map(|rule| rule.target_identifiers())
        .unwrap_or_default();
    targets.extend(
        step.before_cohort_rules
            .iter()
            .chain(&step.after_cohort_rules)
            .filter_map(|rule| rule.skip_to_identifier.clone()),
    );
    if let Some(rule) = &step.skip_rule {
        targets.extend(rule.referenced_identifiers());
    }
    targets
}
