//! stepkit core data models.
//!
//! Results, typed answers, and file manifests shared by the navigation,
//! task path, and archive crates.

#![warn(missing_docs)]

// Identities
mod id;
mod info;

// Results
mod answer;
mod result;
mod manifest;

mod error;

// Re-exports
pub use id::{reserved, TaskRunId};
pub use info::{SchemaInfo, TaskInfo};
pub use answer::{AnswerResultType, AnswerValue, BaseType, BaseValue, SequenceType};
pub use result::{
    AnswerResult, BasicResult, CollectionResult, ErrorResult, FileResult, StepResult, TaskResult,
};
pub use manifest::FileManifest;
pub use error::{Result, ResultError};

/// Timestamp type used throughout stepkit.
pub type Time = chrono::DateTime<chrono::Utc>;
