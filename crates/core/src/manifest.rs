//! File manifests for archived files.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::Time;

/// Describes one file written to an archive.
///
/// Two manifests are the same file when filename and timestamp match; the
/// remaining fields are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifest {
    /// Name of the file within the archive
    pub filename: String,

    /// When the file was created
    pub timestamp: Time,

    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Identifier of the result the file was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Slash separated path of the result within the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_path: Option<String>,
}

impl FileManifest {
    /// Create a manifest for `filename`.
    pub fn new(filename: impl Into<String>, timestamp: Time) -> Self {
        Self {
            filename: filename.into(),
            timestamp,
            content_type: None,
            identifier: None,
            step_path: None,
        }
    }

    /// Set the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the source identifier and step path.
    pub fn with_source(mut self, identifier: impl Into<String>, step_path: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self.step_path = Some(step_path.into());
        self
    }
}

impl PartialEq for FileManifest {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename && self.timestamp == other.timestamp
    }
}

impl Eq for FileManifest {}

impl Hash for FileManifest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filename.hash(state);
        self.timestamp.hash(state);
    }
}
