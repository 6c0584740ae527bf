//! Archives written to a local directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use stepkit_core::{FileManifest, StepResult, TaskResult};
use tracing::{debug, error, info};

use crate::archive::{default_archivable, Archivable, ArchiveChoice, DataArchive, DataArchiveManager};
use crate::error::{ArchiveError, Result};
use crate::filename::{scrubbed_filename, ReservedFilename};
use crate::metadata::TaskMetadata;

/// A [`DataArchive`] that writes each file under one directory.
///
/// The directory is created on first insert. Completing the archive writes
/// `metadata.json`; later inserts fail.
#[derive(Debug)]
pub struct DirectoryArchive {
    identifier: String,
    schedule_identifier: Option<String>,
    dir: PathBuf,
    completed: bool,
}

impl DirectoryArchive {
    /// Create an archive rooted at `dir`.
    pub fn new(identifier: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            schedule_identifier: None,
            dir: dir.into(),
            completed: false,
        }
    }

    /// Set the schedule identifier.
    pub fn with_schedule_identifier(mut self, schedule_identifier: Option<String>) -> Self {
        self.schedule_identifier = schedule_identifier;
        self
    }

    /// Directory the files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the archive has been completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn file_path(&self, filename: &str) -> Result<PathBuf> {
        let relative = Path::new(filename);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if filename.is_empty() || !is_plain {
            return Err(ArchiveError::InvalidFilename(filename.to_string()));
        }
        Ok(self.dir.join(relative))
    }

    async fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        if self.completed {
            return Err(ArchiveError::Completed(self.identifier.clone()));
        }
        let path = self.file_path(filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(archive = %self.identifier, file = %filename, bytes = data.len(), "Wrote archive file");
        Ok(())
    }
}

#[async_trait]
impl DataArchive for DirectoryArchive {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn schedule_identifier(&self) -> Option<&str> {
        self.schedule_identifier.as_deref()
    }

    fn should_insert_data(&self, _filename: ReservedFilename) -> bool {
        true
    }

    fn archivable_data(
        &self,
        result: &StepResult,
        _section: Option<&str>,
        _step_path: Option<&str>,
    ) -> Option<Box<dyn Archivable>> {
        default_archivable(result)
    }

    async fn insert_data(&mut self, data: Vec<u8>, manifest: &FileManifest) -> Result<()> {
        self.write(&manifest.filename, &data).await
    }

    async fn complete_archive(&mut self, metadata: &TaskMetadata) -> Result<()> {
        let data = serde_json::to_vec_pretty(metadata)?;
        self.write(&ReservedFilename::Metadata.filename(), &data).await?;
        self.completed = true;
        info!(archive = %self.identifier, dir = %self.dir.display(), "Archive complete");
        Ok(())
    }
}

/// Writes archives under a root directory, one subdirectory per archive.
///
/// Nested task results are archived inline unless their identifier is
/// listed with [`DirectoryArchiveManager::with_split_tasks`]. Uploading is
/// a no-op that logs the archive locations.
#[derive(Debug, Clone)]
pub struct DirectoryArchiveManager {
    root: PathBuf,
    split_tasks: Vec<String>,
    continue_on_fail: bool,
}

impl DirectoryArchiveManager {
    /// Create a manager writing under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            split_tasks: Vec::new(),
            continue_on_fail: false,
        }
    }

    /// Subtasks that get an archive of their own.
    pub fn with_split_tasks(mut self, identifiers: Vec<String>) -> Self {
        self.split_tasks = identifiers;
        self
    }

    /// Keep archiving after a file fails to write.
    pub fn with_continue_on_fail(mut self, continue_on_fail: bool) -> Self {
        self.continue_on_fail = continue_on_fail;
        self
    }

    fn archive_for(&self, result: &TaskResult, schedule_identifier: Option<&str>) -> DirectoryArchive {
        let name = format!("{}-{}", scrubbed_filename(&result.identifier), result.task_run_id);
        DirectoryArchive::new(&result.identifier, self.root.join(name))
            .with_schedule_identifier(schedule_identifier.map(str::to_string))
    }
}

#[async_trait]
impl DataArchiveManager for DirectoryArchiveManager {
    fn data_archiver(
        &self,
        result: &TaskResult,
        schedule_identifier: Option<&str>,
        current: Option<&dyn DataArchive>,
    ) -> ArchiveChoice {
        if current.is_none() || self.split_tasks.contains(&result.identifier) {
            let schedule = schedule_identifier.or_else(|| current.and_then(|c| c.schedule_identifier()));
            ArchiveChoice::New(Box::new(self.archive_for(result, schedule)))
        } else {
            ArchiveChoice::Current
        }
    }

    fn should_continue_on_fail(&self, _archive: &dyn DataArchive, _error: &ArchiveError) -> bool {
        self.continue_on_fail
    }

    async fn encrypt_and_upload(&self, result: &TaskResult, archives: Vec<Box<dyn DataArchive>>) -> Result<()> {
        for archive in &archives {
            info!(task = %result.identifier, archive = %archive.identifier(), root = %self.root.display(), "Archive ready");
        }
        Ok(())
    }

    async fn handle_archive_failure(&self, result: &TaskResult, error: &ArchiveError) {
        error!(task = %result.identifier, error = %error, "Failed to archive task");
    }
}
