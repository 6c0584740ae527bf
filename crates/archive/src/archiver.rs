//! Builds archives from a finished task result.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::Value;
use stepkit_core::{FileManifest, StepResult, TaskResult};
use tracing::{debug, info, warn};

use crate::archive::{join_step_path, ArchiveChoice, DataArchive, DataArchiveManager};
use crate::error::Result;
use crate::filename::ReservedFilename;
use crate::metadata::{ArchiveConfig, TaskMetadata};

/// Walks a task result and fills the archives its manager chooses.
///
/// Nested task results either get archives of their own (collected
/// separately) or are written inline into the enclosing archive. Answers
/// found along the way are collected into `answers.json`.
pub struct TaskArchiver {
    manager: Arc<dyn DataArchiveManager>,
    task_result: Arc<TaskResult>,
    archive: Option<Box<dyn DataArchive>>,
    child_archives: Vec<Box<dyn DataArchive>>,
    files: Vec<FileManifest>,
    answers: BTreeMap<String, Value>,
    config: ArchiveConfig,
}

impl TaskArchiver {
    /// Create an archiver for a top-level task result.
    pub fn new(
        manager: Arc<dyn DataArchiveManager>,
        task_result: TaskResult,
        schedule_identifier: Option<&str>,
    ) -> Self {
        let archive = match manager.data_archiver(&task_result, schedule_identifier, None) {
            ArchiveChoice::New(archive) => Some(archive),
            choice => {
                debug!(task = %task_result.identifier, ?choice, "No top-level archive");
                None
            }
        };
        Self::with_archive(manager, Arc::new(task_result), archive)
    }

    fn with_archive(
        manager: Arc<dyn DataArchiveManager>,
        task_result: Arc<TaskResult>,
        archive: Option<Box<dyn DataArchive>>,
    ) -> Self {
        Self {
            manager,
            task_result,
            archive,
            child_archives: Vec::new(),
            files: Vec::new(),
            answers: BTreeMap::new(),
            config: ArchiveConfig::default(),
        }
    }

    /// Set the static metadata config.
    pub fn with_config(mut self, config: ArchiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Fill and complete the archives.
    ///
    /// The top-level archive, if any, comes first, followed by the archives
    /// of nested tasks in the order they were found.
    #[async_recursion]
    pub async fn build_archives(mut self) -> Result<Vec<Box<dyn DataArchive>>> {
        let task_result = Arc::clone(&self.task_result);
        self.add_results(None, None, None, &task_result.step_history).await?;
        if self.archive.is_some() {
            self.add_results(None, None, None, &task_result.async_results).await?;
        }

        let mut archives = std::mem::take(&mut self.child_archives);
        if let Some(mut archive) = self.archive.take() {
            match self.finish_archive(archive.as_mut()).await {
                Ok(()) => {
                    info!(archive = %archive.identifier(), files = self.files.len(), "Completed archive");
                    archives.insert(0, archive);
                }
                Err(err) if self.manager.should_continue_on_fail(&*archive, &err) => {
                    warn!(archive = %archive.identifier(), error = %err, "Dropping archive that failed to complete");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(archives)
    }

    async fn finish_archive(&mut self, archive: &mut dyn DataArchive) -> Result<()> {
        if !self.answers.is_empty() && archive.should_insert_data(ReservedFilename::Answers) {
            let data = serde_json::to_vec_pretty(&self.answers)?;
            let manifest = ReservedFilename::Answers.manifest();
            archive.insert_data(data, &manifest).await?;
            insert_manifest(&mut self.files, manifest);
        }
        if archive.should_insert_data(ReservedFilename::TaskResult) {
            let data = serde_json::to_vec_pretty(self.task_result.as_ref())?;
            let manifest = ReservedFilename::TaskResult.manifest();
            archive.insert_data(data, &manifest).await?;
            insert_manifest(&mut self.files, manifest);
        }
        let metadata = TaskMetadata::new(&self.task_result, self.files.clone(), &self.config);
        archive.complete_archive(&metadata).await
    }

    #[async_recursion]
    async fn add_results<'a>(
        &'a mut self,
        section: Option<&'a str>,
        collection: Option<&'a str>,
        step_path: Option<&'a str>,
        results: &'a [StepResult],
    ) -> Result<()> {
        for result in results {
            match result {
                StepResult::Task(task) => self.add_task(task, step_path).await?,
                _ => self.add_result(section, collection, step_path, result).await?,
            }
        }
        Ok(())
    }

    async fn add_task(&mut self, task: &TaskResult, step_path: Option<&str>) -> Result<()> {
        match self.manager.data_archiver(task, None, self.archive.as_deref()) {
            ArchiveChoice::New(archive)
                if self.archive.as_ref().map(|a| a.identifier()) != Some(archive.identifier()) =>
            {
                debug!(task = %task.identifier, archive = %archive.identifier(), "Archiving subtask separately");
                let child = TaskArchiver::with_archive(Arc::clone(&self.manager), Arc::new(task.clone()), Some(archive))
                    .with_config(self.config.clone());
                let archives = child.build_archives().await?;
                self.child_archives.extend(archives);
            }
            ArchiveChoice::Skip => {
                debug!(task = %task.identifier, "Skipping subtask");
            }
            _ => {
                let path = join_step_path(step_path, &task.identifier);
                let section = Some(task.identifier.as_str());
                self.add_results(section, None, Some(&path), &task.step_history).await?;
                self.add_results(section, None, Some(&path), &task.async_results).await?;
            }
        }
        Ok(())
    }

    async fn add_result(
        &mut self,
        section: Option<&str>,
        collection: Option<&str>,
        step_path: Option<&str>,
        result: &StepResult,
    ) -> Result<()> {
        // Without an archive at this level only nested tasks are archived.
        let Some(archive) = self.archive.as_mut() else {
            return Ok(());
        };

        if let Some(archivable) = archive.archivable_data(result, section, step_path) {
            let inserted = match archivable.build_archive_data(step_path).await {
                Ok(Some((manifest, data))) => archive.insert_data(data, &manifest).await.map(|()| Some(manifest)),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            };
            match inserted {
                Ok(Some(manifest)) => insert_manifest(&mut self.files, manifest),
                Ok(None) => {}
                Err(err) if self.manager.should_continue_on_fail(&**archive, &err) => {
                    warn!(result = %result.identifier(), error = %err, "Skipping result that failed to archive");
                }
                Err(err) => return Err(err),
            }
        } else if let StepResult::Collection(collection_result) = result {
            let path = join_step_path(step_path, &collection_result.identifier);
            self.add_results(section, Some(&collection_result.identifier), Some(&path), &collection_result.input_results)
                .await?;
        }

        if let StepResult::Answer(answer) = result {
            let value = answer.encoded_value()?;
            if !value.is_null() {
                let key = self.answer_key(&answer.identifier, section, collection);
                self.answers.insert(key, value);
            }
        }
        Ok(())
    }

    fn answer_key(&self, identifier: &str, section: Option<&str>, collection: Option<&str>) -> String {
        if let Some(key) = self.manager.answer_key(identifier, section) {
            return key;
        }
        section
            .into_iter()
            .chain(collection.filter(|c| *c != identifier))
            .chain(std::iter::once(identifier))
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn insert_manifest(files: &mut Vec<FileManifest>, manifest: FileManifest) {
    if !files.contains(&manifest) {
        files.push(manifest);
    }
}

/// Build the archives for `task_result` and hand them to the manager for upload.
///
/// Failures to build or upload are reported through
/// [`DataArchiveManager::handle_archive_failure`] before being returned.
pub async fn archive_and_upload(
    manager: Arc<dyn DataArchiveManager>,
    task_result: TaskResult,
    schedule_identifier: Option<&str>,
    config: ArchiveConfig,
) -> Result<usize> {
    let archiver = TaskArchiver::new(Arc::clone(&manager), task_result.clone(), schedule_identifier).with_config(config);
    let uploaded = match archiver.build_archives().await {
        Ok(archives) => {
            let count = archives.len();
            manager.encrypt_and_upload(&task_result, archives).await.map(|()| count)
        }
        Err(err) => Err(err),
    };
    if let Err(err) = &uploaded {
        warn!(task = %task_result.identifier, error = %err, "Archive failed");
        manager.handle_archive_failure(&task_result, err).await;
    }
    uploaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{default_archivable, Archivable, JsonArchivable};
    use crate::error::ArchiveError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use stepkit_core::{AnswerResult, AnswerResultType, BaseType, CollectionResult, ErrorResult, FileResult};

    #[derive(Default)]
    struct Written {
        files: Vec<String>,
        answers: Option<Value>,
        completed: Option<TaskMetadata>,
    }

    struct MockArchive {
        identifier: String,
        written: Arc<Mutex<Written>>,
        fail_on_error_results: bool,
    }

    #[async_trait]
    impl DataArchive for MockArchive {
        fn identifier(&self) -> &str {
            &self.identifier
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
            match result {
                StepResult::Error(_) if self.fail_on_error_results => Some(Box::new(Failing)),
                StepResult::Error(_) => Some(Box::new(JsonArchivable::from_result(result).ok()?)),
                _ => default_archivable(result),
            }
        }

        async fn insert_data(&mut self, data: Vec<u8>, manifest: &FileManifest) -> Result<()> {
            let mut written = self.written.lock().unwrap();
            if manifest.filename == "answers.json" {
                written.answers = Some(serde_json::from_slice(&data)?);
            }
            written.files.push(manifest.filename.clone());
            Ok(())
        }

        async fn complete_archive(&mut self, metadata: &TaskMetadata) -> Result<()> {
            self.written.lock().unwrap().completed = Some(metadata.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Archivable for Failing {
        async fn build_archive_data(&self, _step_path: Option<&str>) -> Result<Option<(FileManifest, Vec<u8>)>> {
            Err(ArchiveError::Upload("disk full".into()))
        }
    }

    #[derive(Default)]
    struct MockManager {
        /// Subtask identifiers that get an archive of their own
        split: Vec<String>,
        skip: Vec<String>,
        skip_root: bool,
        continue_on_fail: bool,
        fail_on_error_results: bool,
        override_keys: bool,
        archives: Mutex<BTreeMap<String, Arc<Mutex<Written>>>>,
        failures: Mutex<Vec<String>>,
    }

    impl MockManager {
        fn written(&self, identifier: &str) -> Arc<Mutex<Written>> {
            Arc::clone(&self.archives.lock().unwrap()[identifier])
        }

        fn make(&self, identifier: &str) -> ArchiveChoice {
            let written = Arc::new(Mutex::new(Written::default()));
            self.archives
                .lock()
                .unwrap()
                .insert(identifier.to_string(), Arc::clone(&written));
            ArchiveChoice::New(Box::new(MockArchive {
                identifier: identifier.to_string(),
                written,
                fail_on_error_results: self.fail_on_error_results,
            }))
        }
    }

    #[async_trait]
    impl DataArchiveManager for MockManager {
        fn data_archiver(
            &self,
            result: &TaskResult,
            _schedule_identifier: Option<&str>,
            current: Option<&dyn DataArchive>,
        ) -> ArchiveChoice {
            if self.skip.contains(&result.identifier) {
                ArchiveChoice::Skip
            } else if current.is_none() && !self.skip_root || self.split.contains(&result.identifier) {
                self.make(&result.identifier)
            } else {
                ArchiveChoice::Current
            }
        }

        fn should_continue_on_fail(&self, _archive: &dyn DataArchive, _error: &ArchiveError) -> bool {
            self.continue_on_fail
        }

        fn answer_key(&self, result_identifier: &str, _section: Option<&str>) -> Option<String> {
            self.override_keys.then(|| format!("q_{result_identifier}"))
        }

        async fn encrypt_and_upload(&self, _result: &TaskResult, _archives: Vec<Box<dyn DataArchive>>) -> Result<()> {
            Err(ArchiveError::Upload("offline".into()))
        }

        async fn handle_archive_failure(&self, _result: &TaskResult, error: &ArchiveError) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    fn integer(identifier: &str, value: i64) -> StepResult {
        AnswerResult::new(identifier, AnswerResultType::new(BaseType::Integer))
            .with_value(value)
            .unwrap()
            .into()
    }

    fn survey() -> TaskResult {
        let mut form = CollectionResult::new("formA");
        form.append_input_result(integer("age", 30));
        form.append_input_result(AnswerResult::new("skipped", AnswerResultType::new(BaseType::String)));

        let mut section = TaskResult::new("section");
        section.append_step_history(integer("q", 2));

        let mut result = TaskResult::new("survey");
        result.append_step_history(form);
        result.append_step_history(section);
        result.append_async_result(ErrorResult::new("motion", "no sensor"));
        result
    }

    #[tokio::test]
    async fn test_answer_map_keys() {
        let manager = Arc::new(MockManager::default());
        let archives = TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();
        assert_eq!(archives.len(), 1);

        let written = manager.written("survey");
        let written = written.lock().unwrap();
        let answers = written.answers.as_ref().unwrap();
        assert_eq!(answers["formA.age"], 30);
        assert_eq!(answers["section.q"], 2);
        assert!(answers.get("formA.skipped").is_none());
        assert_eq!(written.files, vec!["motion.json", "answers.json", "taskResult.json"]);

        let metadata = written.completed.as_ref().unwrap();
        assert_eq!(metadata.task_identifier, "survey");
        assert_eq!(metadata.files.len(), 3);
    }

    #[tokio::test]
    async fn test_answer_key_override() {
        let manager = Arc::new(MockManager {
            override_keys: true,
            ..Default::default()
        });
        TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();

        let written = manager.written("survey");
        let answers = written.lock().unwrap().answers.clone().unwrap();
        assert_eq!(answers["q_age"], 30);
        assert_eq!(answers["q_q"], 2);
    }

    #[tokio::test]
    async fn test_split_subtask_archives() {
        let manager = Arc::new(MockManager {
            split: vec!["section".into()],
            ..Default::default()
        });
        let archives = TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();
        let identifiers: Vec<_> = archives.iter().map(|a| a.identifier().to_string()).collect();
        assert_eq!(identifiers, vec!["survey", "section"]);

        let root = manager.written("survey");
        assert!(root.lock().unwrap().answers.as_ref().unwrap().get("section.q").is_none());
        let nested = manager.written("section");
        assert_eq!(nested.lock().unwrap().answers.as_ref().unwrap()["q"], 2);
    }

    #[tokio::test]
    async fn test_skipped_root_still_archives_split_subtasks() {
        let manager = Arc::new(MockManager {
            skip_root: true,
            split: vec!["section".into()],
            ..Default::default()
        });
        let archives = TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].identifier(), "section");
    }

    #[tokio::test]
    async fn test_skipped_subtask_is_left_out() {
        let manager = Arc::new(MockManager {
            skip: vec!["section".into()],
            ..Default::default()
        });
        TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();
        let written = manager.written("survey");
        assert!(written.lock().unwrap().answers.as_ref().unwrap().get("section.q").is_none());
    }

    #[tokio::test]
    async fn test_insert_failure_propagates_by_default() {
        let manager = Arc::new(MockManager {
            fail_on_error_results: true,
            ..Default::default()
        });
        let err = TaskArchiver::new(manager.clone(), survey(), None).build_archives().await;
        assert!(matches!(err, Err(ArchiveError::Upload(_))));
        assert!(manager.written("survey").lock().unwrap().completed.is_none());
    }

    #[tokio::test]
    async fn test_insert_failure_can_be_swallowed() {
        let manager = Arc::new(MockManager {
            fail_on_error_results: true,
            continue_on_fail: true,
            ..Default::default()
        });
        let archives = TaskArchiver::new(manager.clone(), survey(), None).build_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        let written = manager.written("survey");
        assert_eq!(written.lock().unwrap().files, vec!["answers.json", "taskResult.json"]);
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let manager = Arc::new(MockManager::default());
        let result = archive_and_upload(manager.clone(), survey(), Some("daily"), ArchiveConfig::default()).await;
        assert!(result.is_err());
        assert_eq!(manager.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_results_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        let file = FileResult::new("walk", &path);

        let mut result = TaskResult::new("walk");
        result.append_step_history(file.clone());
        result.append_async_result(file);

        let manager = Arc::new(MockManager::default());
        TaskArchiver::new(manager.clone(), result, None).build_archives().await.unwrap();
        let written = manager.written("walk");
        let metadata = written.lock().unwrap().completed.clone().unwrap();
        assert_eq!(metadata.files.len(), 2);
        assert_eq!(metadata.files[0].filename, "walk.json");
    }
}
