//! stepkit navigation.
//!
//! Steps, the rules attached to them, and the conditional navigator that
//! decides which step comes next.

#![warn(missing_docs)]

// Model
mod step;
mod rules;

// Rules
mod survey;
mod cohort;
mod skip;

// Navigation
mod navigator;
mod progress;
mod validate;
mod definition;

mod error;

// Re-exports
pub use step::{ActiveStepExtras, Step, StepType, Subtask};
pub use rules::{
    ConditionalReplacementRule, ConditionalRule, NavigationBackRule, NavigationRule,
    NavigationSkipRule, TrackingRule,
};
pub use survey::{SurveyNavigationRule, SurveyRule, SurveyRuleOperator};
pub use cohort::{
    CohortAssignment, CohortChange, CohortNavigationRule, CohortRuleOperator, CohortTrackingRule,
};
pub use skip::{AnswerSkipRule, BackNavigationLock, DirectNavigationRule, SkipIfAllNil, SkipIfAnswered};
pub use navigator::{ConditionalStepNavigator, Navigation, NavigatorConfig, StepDirection};
pub use progress::{estimated_progress, marker_progress, Progress};
pub use definition::{NavigatorDefinition, SkipDefinition, StepDefinition, SurveyRuleDefinition};
pub use error::{NavigationError, Result};
