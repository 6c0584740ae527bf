//! Archive and archive-manager traits.

use std::path::Path;

use async_trait::async_trait;
use stepkit_core::{FileManifest, FileResult, StepResult, TaskResult};

use crate::error::{ArchiveError, Result};
use crate::filename::{scrubbed_filename, ReservedFilename};
use crate::metadata::TaskMetadata;

/// Something that can be written to an archive as one file.
#[async_trait]
pub trait Archivable: Send + Sync {
    /// Build the manifest and bytes of the file.
    ///
    /// `step_path` is the path of the enclosing collection or section, if
    /// any. Returns `None` when there is nothing to write.
    async fn build_archive_data(&self, step_path: Option<&str>) -> Result<Option<(FileManifest, Vec<u8>)>>;
}

/// An upload package being filled from a task result.
#[async_trait]
pub trait DataArchive: Send + Sync {
    /// Archive identifier. Two archives with the same identifier are the same package.
    fn identifier(&self) -> &str;

    /// Schedule the archived run belongs to.
    fn schedule_identifier(&self) -> Option<&str> {
        None
    }

    /// Whether the archive wants the reserved file `filename`.
    fn should_insert_data(&self, filename: ReservedFilename) -> bool;

    /// The archivable form of `result`, or `None` if the archive does not
    /// store it as a file of its own.
    fn archivable_data(
        &self,
        result: &StepResult,
        section: Option<&str>,
        step_path: Option<&str>,
    ) -> Option<Box<dyn Archivable>>;

    /// Add a file.
    async fn insert_data(&mut self, data: Vec<u8>, manifest: &FileManifest) -> Result<()>;

    /// Finish the archive. No data may be inserted afterwards.
    async fn complete_archive(&mut self, metadata: &TaskMetadata) -> Result<()>;
}

/// What a manager wants done with a task result.
pub enum ArchiveChoice {
    /// Archive into the archive of the enclosing task
    Current,
    /// Archive into a separate package
    New(Box<dyn DataArchive>),
    /// Leave the task result out of every archive
    Skip,
}

impl std::fmt::Debug for ArchiveChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => f.write_str("Current"),
            Self::New(archive) => f.debug_tuple("New").field(&archive.identifier()).finish(),
            Self::Skip => f.write_str("Skip"),
        }
    }
}

/// Decides how task results are split into archives and uploads them.
#[async_trait]
pub trait DataArchiveManager: Send + Sync {
    /// Choose an archive for `result`.
    ///
    /// `current` is the archive of the enclosing task, or `None` for the
    /// top-level result. At the top level `Current` and `Skip` both mean
    /// that no top-level archive is written; nested results may still get
    /// archives of their own.
    fn data_archiver(
        &self,
        result: &TaskResult,
        schedule_identifier: Option<&str>,
        current: Option<&dyn DataArchive>,
    ) -> ArchiveChoice;

    /// Whether to keep going after `error` while filling `archive`.
    fn should_continue_on_fail(&self, _archive: &dyn DataArchive, _error: &ArchiveError) -> bool {
        false
    }

    /// Key for an answer in `answers.json`, overriding the dotted default.
    fn answer_key(&self, _result_identifier: &str, _section: Option<&str>) -> Option<String> {
        None
    }

    /// Upload completed archives.
    async fn encrypt_and_upload(&self, result: &TaskResult, archives: Vec<Box<dyn DataArchive>>) -> Result<()>;

    /// Report a failure to build or upload archives.
    async fn handle_archive_failure(&self, result: &TaskResult, error: &ArchiveError);
}

/// Archivable JSON document.
#[derive(Debug, Clone)]
pub struct JsonArchivable {
    identifier: String,
    value: serde_json::Value,
}

impl JsonArchivable {
    /// Archive `value` as `<identifier>.json`.
    pub fn new(identifier: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            identifier: identifier.into(),
            value,
        }
    }

    /// Archive a result as JSON.
    pub fn from_result(result: &StepResult) -> Result<Self> {
        Ok(Self::new(result.identifier(), serde_json::to_value(result)?))
    }
}

#[async_trait]
impl Archivable for JsonArchivable {
    async fn build_archive_data(&self, step_path: Option<&str>) -> Result<Option<(FileManifest, Vec<u8>)>> {
        let manifest = FileManifest::new(format!("{}.json", scrubbed_filename(&self.identifier)), chrono::Utc::now())
            .with_content_type("application/json")
            .with_source(&self.identifier, join_step_path(step_path, &self.identifier));
        let data = serde_json::to_vec_pretty(&self.value)?;
        Ok(Some((manifest, data)))
    }
}

/// Archivable file written by a recorder.
#[derive(Debug, Clone)]
pub struct FileArchivable {
    result: FileResult,
}

impl FileArchivable {
    /// Archive the file behind `result`.
    pub fn new(result: FileResult) -> Self {
        Self { result }
    }

    fn filename(&self, path: &Path) -> String {
        let stem = scrubbed_filename(&self.result.identifier);
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }
}

#[async_trait]
impl Archivable for FileArchivable {
    async fn build_archive_data(&self, step_path: Option<&str>) -> Result<Option<(FileManifest, Vec<u8>)>> {
        let Some(path) = &self.result.path else {
            return Ok(None);
        };
        let data = tokio::fs::read(path).await?;
        let mut manifest = FileManifest::new(self.filename(path), self.result.start_date)
            .with_source(&self.result.identifier, join_step_path(step_path, &self.result.identifier));
        manifest.content_type = self.result.content_type.clone();
        Ok(Some((manifest, data)))
    }
}

/// Default archivable form of a result: file results are archived as their
/// file, everything else only appears in `taskResult.json`.
pub fn default_archivable(result: &StepResult) -> Option<Box<dyn Archivable>> {
    match result {
        StepResult::File(file) if file.path.is_some() => Some(Box::new(FileArchivable::new(file.clone()))),
        _ => None,
    }
}

pub(crate) fn join_step_path(step_path: Option<&str>, identifier: &str) -> String {
    match step_path {
        Some(path) => format!("{path}/{identifier}"),
        None => identifier.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepkit_core::BasicResult;

    #[tokio::test]
    async fn test_file_archivable_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motion.json");
        tokio::fs::write(&path, b"[1,2,3]").await.unwrap();

        let result = FileResult::new("walk.motion", &path).with_content_type("application/json");
        let archivable = default_archivable(&result.into()).unwrap();
        let (manifest, data) = archivable.build_archive_data(Some("walk")).await.unwrap().unwrap();

        assert_eq!(manifest.filename, "walk_motion.json");
        assert_eq!(manifest.step_path.as_deref(), Some("walk/walk.motion"));
        assert_eq!(manifest.content_type.as_deref(), Some("application/json"));
        assert_eq!(data, b"[1,2,3]");
    }

    #[tokio::test]
    async fn test_json_archivable() {
        let result: StepResult = BasicResult::new("intro").into();
        assert!(default_archivable(&result).is_none());

        let (manifest, data) = JsonArchivable::from_result(&result)
            .unwrap()
            .build_archive_data(None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manifest.filename, "intro.json");
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["identifier"], "intro");
    }
}
