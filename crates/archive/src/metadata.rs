//! Archive metadata.

use serde::{Deserialize, Serialize};
use stepkit_core::{FileManifest, TaskResult, TaskRunId, Time};

/// Static description of the device and app producing archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveConfig {
    /// Free-form device description
    pub device_info: String,
    /// Device model identifier
    pub device_type_identifier: String,
    /// Application name
    pub app_name: String,
    /// Application version
    pub app_version: String,
    /// stepkit version
    pub framework_version: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            device_info: format!("{}; {}", std::env::consts::ARCH, std::env::consts::OS),
            device_type_identifier: std::env::consts::OS.to_string(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    /// Free-form device description
    pub device_info: String,
    /// Device model identifier
    pub device_type_identifier: String,
    /// Application name
    pub app_name: String,
    /// Application version
    pub app_version: String,
    /// stepkit version
    pub framework_version: String,
    /// Task identifier
    pub task_identifier: String,
    /// Task run
    #[serde(rename = "taskRunUUID")]
    pub task_run_id: TaskRunId,
    /// Start of the run
    pub start_date: Time,
    /// End of the run
    pub end_date: Time,
    /// Schema of the results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_identifier: Option<String>,
    /// Schema revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_revision: Option<i64>,
    /// Files in the archive
    pub files: Vec<FileManifest>,
}

impl TaskMetadata {
    /// Metadata for an archive of `result` holding `files`.
    pub fn new(result: &TaskResult, files: Vec<FileManifest>, config: &ArchiveConfig) -> Self {
        Self {
            device_info: config.device_info.clone(),
            device_type_identifier: config.device_type_identifier.clone(),
            app_name: config.app_name.clone(),
            app_version: config.app_version.clone(),
            framework_version: config.framework_version.clone(),
            task_identifier: result.identifier.clone(),
            task_run_id: result.task_run_id,
            start_date: result.start_date,
            end_date: result.end_date,
            schema_identifier: result.schema_info.as_ref().and_then(|s| s.schema_identifier.clone()),
            schema_revision: result.schema_info.as_ref().map(|s| s.schema_version),
            files,
        }
    }
}
