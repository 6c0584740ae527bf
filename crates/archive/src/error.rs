//! Archive errors.

use stepkit_core::ResultError;

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while building or uploading archives.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An answer could not be encoded
    #[error("result error: {0}")]
    Result(#[from] ResultError),

    /// Data inserted after the archive was completed
    #[error("archive '{0}' is already complete")]
    Completed(String),

    /// A filename escapes the archive or is empty
    #[error("invalid archive filename: {0}")]
    InvalidFilename(String),

    /// Encryption or upload failed
    #[error("upload failed: {0}")]
    Upload(String),
}
