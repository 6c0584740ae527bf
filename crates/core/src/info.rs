//! Descriptive information about tasks.

use serde::{Deserialize, Serialize};

/// Identifies the schema that a task's results conform to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    /// Schema identifier
    pub schema_identifier: Option<String>,
    /// Schema revision
    #[serde(default = "default_revision")]
    pub schema_version: i64,
}

fn default_revision() -> i64 {
    1
}

impl SchemaInfo {
    /// Create schema info.
    pub fn new(identifier: impl Into<String>, version: i64) -> Self {
        Self {
            schema_identifier: Some(identifier.into()),
            schema_version: version,
        }
    }
}

/// Lightweight description of a task that can be fetched lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task identifier
    pub identifier: String,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Display detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Expected duration in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,

    /// Schema of the fetched task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_info: Option<SchemaInfo>,
}

impl TaskInfo {
    /// Create task info with just an identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: None,
            detail: None,
            estimated_minutes: None,
            schema_info: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
