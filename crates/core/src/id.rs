//! Unique identifiers for task runs.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for one run of a task.
///
/// Shared by the root task result and every nested subtask result of the
/// same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRunId(Ulid);

impl TaskRunId {
    /// Generate a new TaskRunId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskRunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Reserved step identifiers understood by every navigator.
pub mod reserved {
    /// Ends the task.
    pub const EXIT: &str = "exit";
    /// Skips the candidate step.
    pub const NEXT_STEP: &str = "nextStep";
    /// Skips the rest of the current section.
    pub const NEXT_SECTION: &str = "nextSection";

    /// Whether `identifier` is one of the reserved identifiers.
    pub fn is_reserved(identifier: &str) -> bool {
        matches!(identifier, EXIT | NEXT_STEP | NEXT_SECTION)
    }
}
