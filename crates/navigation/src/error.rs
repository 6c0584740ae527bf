//! Navigation errors.

/// Errors raised by navigator validation and step resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// Two steps at the same level share an identifier
    #[error("Duplicate step identifier: {0}")]
    DuplicateIdentifier(String),

    /// A rule points at a step that does not exist
    #[error("Step '{step}' references unknown step '{target}'")]
    UnknownIdentifier {
        /// Step carrying the rule
        step: String,
        /// The missing target
        target: String,
    },

    /// A progress marker names no step
    #[error("Unknown progress marker: {0}")]
    UnknownProgressMarker(String),

    /// Skip rules keep returning to the same step
    #[error("Skip rules cycle through step '{identifier}'")]
    SkipCycle {
        /// First identifier seen twice
        identifier: String,
    },

    /// A task definition could not be decoded
    #[error("Invalid definition: {0}")]
    Definition(String),
}

/// Result type for navigation operations.
pub type Result<T> = std::result::Result<T, NavigationError>;
