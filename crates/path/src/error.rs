//! Error types for task paths and async actions.

use stepkit_navigation::NavigationError;

/// Result type for task path operations.
pub type Result<T> = std::result::Result<T, PathError>;

/// Errors raised by an async action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsyncActionError {
    /// The action could not start
    #[error("async action '{identifier}' failed to start: {reason}")]
    Start {
        /// Action identifier
        identifier: String,
        /// Failure description
        reason: String,
    },

    /// The action failed while stopping or processing its results
    #[error("async action '{identifier}' failed to stop: {reason}")]
    Stop {
        /// Action identifier
        identifier: String,
        /// Failure description
        reason: String,
    },

    /// No action can be made for the configuration
    #[error("unsupported async action: {0}")]
    Unsupported(String),
}

impl AsyncActionError {
    /// Identifier of the failed action, if known.
    pub fn identifier(&self) -> &str {
        match self {
            Self::Start { identifier, .. } | Self::Stop { identifier, .. } => identifier,
            Self::Unsupported(identifier) => identifier,
        }
    }
}

/// Errors that halt a task path.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Navigation failed
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),

    /// A critical async action failed
    #[error("async action error: {0}")]
    AsyncAction(#[from] AsyncActionError),

    /// A task could not be fetched
    #[error("failed to fetch task '{identifier}': {reason}")]
    Fetch {
        /// Task identifier
        identifier: String,
        /// Failure description
        reason: String,
    },

    /// A nested task has no repository to fetch it from
    #[error("no task repository for '{0}'")]
    NoRepository(String),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled
    #[error("task cancelled")]
    Cancelled,
}
