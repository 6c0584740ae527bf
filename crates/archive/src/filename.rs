//! Archive filenames.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use stepkit_core::FileManifest;
use ulid::Ulid;

const MAX_FILENAME_LEN: usize = 24;

/// Filenames the archiver writes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReservedFilename {
    /// Flat map of every answer in the task
    Answers,
    /// The whole task result
    TaskResult,
    /// Archive metadata
    Metadata,
}

impl ReservedFilename {
    /// All reserved names.
    pub const ALL: [ReservedFilename; 3] = [Self::Answers, Self::TaskResult, Self::Metadata];

    /// Name without extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answers => "answers",
            Self::TaskResult => "taskResult",
            Self::Metadata => "metadata",
        }
    }

    /// Name of the JSON file.
    pub fn filename(self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Manifest for the file, timestamped now.
    pub fn manifest(self) -> FileManifest {
        FileManifest::new(self.filename(), Utc::now()).with_content_type("application/json")
    }

    /// Whether `name` (without extension) is reserved.
    pub fn is_reserved(name: &str) -> bool {
        Self::ALL.iter().any(|r| r.as_str() == name)
    }
}

impl fmt::Display for ReservedFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-safe name for `identifier`.
///
/// `.` and spaces become `_`; anything other than ASCII alphanumerics,
/// `-` and `_` is dropped; the result is cut to 24 characters. An empty
/// result is replaced by a fresh ULID, and a reserved name gets a `_file`
/// suffix.
pub fn scrubbed_filename(identifier: &str) -> String {
    let scrubbed: String = identifier
        .chars()
        .map(|c| if c == '.' || c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_FILENAME_LEN)
        .collect();
    if scrubbed.is_empty() {
        return Ulid::new().to_string();
    }
    if ReservedFilename::is_reserved(&scrubbed) {
        return format!("{scrubbed}_file");
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrubbed_filename() {
        assert_eq!(scrubbed_filename("walk.motion data"), "walk_motion_data");
        assert_eq!(scrubbed_filename("heart/rate?"), "heartrate");
        assert_eq!(scrubbed_filename("a-very-long-identifier-for-a-recorder"), "a-very-long-identifier-f");
        assert_eq!(scrubbed_filename("answers"), "answers_file");
    }

    #[test]
    fn test_empty_filename_gets_fresh_id() {
        let name = scrubbed_filename("???");
        assert_eq!(name.len(), 26);
        assert_ne!(name, scrubbed_filename("???"));
    }

    #[test]
    fn test_reserved_manifest() {
        let manifest = ReservedFilename::TaskResult.manifest();
        assert_eq!(manifest.filename, "taskResult.json");
        assert_eq!(manifest.content_type.as_deref(), Some("application/json"));
    }
}
