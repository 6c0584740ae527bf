//! Result model errors.

use crate::answer::{BaseType, SequenceType};

/// Errors raised while validating or encoding results.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    /// The value does not match the declared base type
    #[error("Answer type mismatch: expected {expected:?}, got {actual:?}")]
    AnswerTypeMismatch {
        /// Declared base type
        expected: BaseType,
        /// Base type of the value
        actual: BaseType,
    },

    /// The value does not match the declared sequence type
    #[error("Sequence mismatch: expected {expected:?}, got {actual:?}")]
    SequenceMismatch {
        /// Declared sequence type
        expected: Option<SequenceType>,
        /// Sequence type of the value
        actual: Option<SequenceType>,
    },

    /// An encoded value could not be decoded with the declared type
    #[error("Cannot decode {base_type:?} answer from {value}")]
    Decode {
        /// Declared base type
        base_type: BaseType,
        /// The offending encoded value
        value: String,
    },

    /// Decimal values must be finite to be encoded
    #[error("Decimal answer {0} is not finite")]
    NonFinite(f64),

    /// The declared date format has an invalid specifier
    #[error("Invalid date format {0:?}")]
    DateFormat(String),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for result model operations.
pub type Result<T> = std::result::Result<T, ResultError>;
