//! Step results and the task result accumulator.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::answer::{AnswerResultType, AnswerValue};
use crate::error::ResultError;
use crate::id::TaskRunId;
use crate::info::SchemaInfo;
use crate::Time;

/// The result of one step, or of a nested task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepResult {
    /// Timing only, e.g. for instruction steps
    #[serde(rename = "base")]
    Basic(BasicResult),
    /// A typed answer
    Answer(AnswerResult),
    /// A group of child results
    Collection(CollectionResult),
    /// A file written by a recorder
    File(FileResult),
    /// A recorded failure
    Error(ErrorResult),
    /// A nested task
    Task(TaskResult),
}

macro_rules! each_variant {
    ($value:expr, $r:ident => $body:expr) => {
        match $value {
            StepResult::Basic($r) => $body,
            StepResult::Answer($r) => $body,
            StepResult::Collection($r) => $body,
            StepResult::File($r) => $body,
            StepResult::Error($r) => $body,
            StepResult::Task($r) => $body,
        }
    };
}

impl StepResult {
    /// Identifier of the step that produced this result.
    pub fn identifier(&self) -> &str {
        each_variant!(self, r => &r.identifier)
    }

    /// When the step started.
    pub fn start_date(&self) -> Time {
        each_variant!(self, r => r.start_date)
    }

    /// When the step ended.
    pub fn end_date(&self) -> Time {
        each_variant!(self, r => r.end_date)
    }

    /// Update the end date.
    pub fn set_end_date(&mut self, date: Time) {
        each_variant!(self, r => r.end_date = date)
    }

    /// The answer, if this is an answer result.
    pub fn as_answer(&self) -> Option<&AnswerResult> {
        match self {
            Self::Answer(r) => Some(r),
            _ => None,
        }
    }

    /// The collection, if this is a collection result.
    pub fn as_collection(&self) -> Option<&CollectionResult> {
        match self {
            Self::Collection(r) => Some(r),
            _ => None,
        }
    }

    /// The nested task result, if any.
    pub fn as_task(&self) -> Option<&TaskResult> {
        match self {
            Self::Task(r) => Some(r),
            _ => None,
        }
    }
}

impl From<BasicResult> for StepResult {
    fn from(r: BasicResult) -> Self {
        Self::Basic(r)
    }
}

impl From<AnswerResult> for StepResult {
    fn from(r: AnswerResult) -> Self {
        Self::Answer(r)
    }
}

impl From<CollectionResult> for StepResult {
    fn from(r: CollectionResult) -> Self {
        Self::Collection(r)
    }
}

impl From<FileResult> for StepResult {
    fn from(r: FileResult) -> Self {
        Self::File(r)
    }
}

impl From<ErrorResult> for StepResult {
    fn from(r: ErrorResult) -> Self {
        Self::Error(r)
    }
}

impl From<TaskResult> for StepResult {
    fn from(r: TaskResult) -> Self {
        Self::Task(r)
    }
}

/// A result carrying only timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicResult {
    /// Step identifier
    pub identifier: String,
    /// Start timestamp
    pub start_date: Time,
    /// End timestamp
    pub end_date: Time,
}

impl BasicResult {
    /// Create a result started now.
    pub fn new(identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            start_date: now,
            end_date: now,
        }
    }
}

/// A typed answer to a question.
///
/// Equality compares the declared type and the encoded value, so two dates
/// that format identically under the type's date format are equal.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    /// Question identifier
    pub identifier: String,
    /// Start timestamp
    pub start_date: Time,
    /// End timestamp
    pub end_date: Time,
    /// Declared type of the value
    pub answer_type: AnswerResultType,
    /// The answer, `None` when skipped
    pub value: Option<AnswerValue>,
}

impl AnswerResult {
    /// Create an unanswered result.
    pub fn new(identifier: impl Into<String>, answer_type: AnswerResultType) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            start_date: now,
            end_date: now,
            answer_type,
            value: None,
        }
    }

    /// Set the value after checking it against the declared type.
    pub fn with_value(mut self, value: impl Into<AnswerValue>) -> Result<Self, ResultError> {
        let value = value.into();
        self.answer_type.validate(&value)?;
        self.value = Some(value);
        Ok(self)
    }

    /// The value encoded as JSON, `null` when unanswered.
    pub fn encoded_value(&self) -> Result<Value, ResultError> {
        match &self.value {
            Some(value) => self.answer_type.encode(value),
            None => Ok(Value::Null),
        }
    }
}

impl PartialEq for AnswerResult {
    fn eq(&self, other: &Self) -> bool {
        if self.identifier != other.identifier || self.answer_type != other.answer_type {
            return false;
        }
        match (self.encoded_value(), other.encoded_value()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.value == other.value,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerResultRef<'a> {
    identifier: &'a str,
    start_date: Time,
    end_date: Time,
    answer_type: &'a AnswerResultType,
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerResultRepr {
    identifier: String,
    start_date: Time,
    end_date: Time,
    answer_type: AnswerResultType,
    #[serde(default)]
    value: Value,
}

impl Serialize for AnswerResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.encoded_value().map_err(serde::ser::Error::custom)?;
        AnswerResultRef {
            identifier: &self.identifier,
            start_date: self.start_date,
            end_date: self.end_date,
            answer_type: &self.answer_type,
            value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnswerResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = AnswerResultRepr::deserialize(deserializer)?;
        let value = repr
            .answer_type
            .decode(&repr.value)
            .map_err(serde::de::Error::custom)?;
        Ok(Self {
            identifier: repr.identifier,
            start_date: repr.start_date,
            end_date: repr.end_date,
            answer_type: repr.answer_type,
            value,
        })
    }
}

/// Child results of a multi-input step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    /// Step identifier
    pub identifier: String,
    /// Start timestamp
    pub start_date: Time,
    /// End timestamp
    pub end_date: Time,
    /// Child results, unique by identifier
    #[serde(default)]
    pub input_results: Vec<StepResult>,
    /// Skip target chosen while the step was shown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_to_identifier: Option<String>,
}

impl CollectionResult {
    /// Create an empty collection.
    pub fn new(identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            start_date: now,
            end_date: now,
            input_results: Vec::new(),
            skip_to_identifier: None,
        }
    }

    /// Add a child, replacing any child with the same identifier in place.
    /// Returns the replaced child.
    pub fn append_input_result(&mut self, result: impl Into<StepResult>) -> Option<StepResult> {
        let result = result.into();
        match self
            .input_results
            .iter()
            .position(|r| r.identifier() == result.identifier())
        {
            Some(idx) => Some(std::mem::replace(&mut self.input_results[idx], result)),
            None => {
                self.input_results.push(result);
                None
            }
        }
    }

    /// Remove the child with `identifier`.
    pub fn remove_input_result(&mut self, identifier: &str) -> Option<StepResult> {
        let idx = self.input_results.iter().position(|r| r.identifier() == identifier)?;
        Some(self.input_results.remove(idx))
    }

    /// Find a direct child.
    pub fn find_result(&self, identifier: &str) -> Option<&StepResult> {
        self.input_results.iter().find(|r| r.identifier() == identifier)
    }

    /// Find an answer among the children, descending into nested collections.
    pub fn find_answer_result(&self, identifier: &str) -> Option<&AnswerResult> {
        find_answer(&self.input_results, identifier)
    }
}

fn find_answer<'a>(results: &'a [StepResult], identifier: &str) -> Option<&'a AnswerResult> {
    results.iter().find_map(|r| match r {
        StepResult::Answer(a) if a.identifier == identifier => Some(a),
        StepResult::Collection(c) => c.find_answer_result(identifier),
        _ => None,
    })
}

/// A file produced during the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    /// Recorder or step identifier
    pub identifier: String,
    /// Start timestamp
    pub start_date: Time,
    /// End timestamp
    pub end_date: Time,
    /// Location of the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl FileResult {
    /// Create a file result.
    pub fn new(identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            start_date: now,
            end_date: now,
            path: Some(path.into()),
            content_type: None,
        }
    }

    /// Set the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A failure recorded in place of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResult {
    /// Identifier of the failing step or action
    pub identifier: String,
    /// Start timestamp
    pub start_date: Time,
    /// End timestamp
    pub end_date: Time,
    /// Human readable description
    pub error_description: String,
    /// Error category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_domain: Option<String>,
}

impl ErrorResult {
    /// Record `description` for `identifier`.
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            start_date: now,
            end_date: now,
            error_description: description.into(),
            error_domain: None,
        }
    }

    /// Set the error domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.error_domain = Some(domain.into());
        self
    }
}

/// Accumulator for one task run.
///
/// `step_history` is ordered by visit and holds at most one result per
/// identifier. Results displaced by a newer result or by backward
/// navigation are kept in `previous_results` for the owning path node, and
/// are not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Task identifier
    pub identifier: String,

    /// Run identifier shared with nested results
    #[serde(rename = "taskRunUUID")]
    pub task_run_id: TaskRunId,

    /// Start timestamp
    pub start_date: Time,

    /// End timestamp
    pub end_date: Time,

    /// Schema the results conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_info: Option<SchemaInfo>,

    /// Results in visit order
    #[serde(default)]
    pub step_history: Vec<StepResult>,

    /// Results of recorders running alongside the steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub async_results: Vec<StepResult>,

    /// Displaced results, oldest first
    #[serde(skip)]
    pub previous_results: Vec<StepResult>,
}

impl TaskResult {
    /// Create an empty result for a new run.
    pub fn new(identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.into(),
            task_run_id: TaskRunId::new(),
            start_date: now,
            end_date: now,
            schema_info: None,
            step_history: Vec::new(),
            async_results: Vec::new(),
            previous_results: Vec::new(),
        }
    }

    /// Attach schema info.
    pub fn with_schema_info(mut self, schema_info: Option<SchemaInfo>) -> Self {
        self.schema_info = schema_info;
        self
    }

    /// Find a result in the step history.
    pub fn find_result(&self, identifier: &str) -> Option<&StepResult> {
        self.step_history.iter().find(|r| r.identifier() == identifier)
    }

    /// Mutable lookup in the step history.
    pub fn find_result_mut(&mut self, identifier: &str) -> Option<&mut StepResult> {
        self.step_history.iter_mut().find(|r| r.identifier() == identifier)
    }

    /// Find an answer in the step history, descending into collections.
    pub fn find_answer_result(&self, identifier: &str) -> Option<&AnswerResult> {
        find_answer(&self.step_history, identifier)
    }

    /// Identifier of the most recent history entry.
    pub fn last_identifier(&self) -> Option<&str> {
        self.step_history.last().map(|r| r.identifier())
    }

    /// Append to the step history.
    ///
    /// An existing result with the same identifier is removed from the
    /// history, moved to `previous_results` and returned; the new result is
    /// appended at the end.
    pub fn append_step_history(&mut self, result: impl Into<StepResult>) -> Option<StepResult> {
        let result = result.into();
        let displaced = self
            .step_history
            .iter()
            .position(|r| r.identifier() == result.identifier())
            .map(|idx| self.step_history.remove(idx));
        if let Some(old) = &displaced {
            self.previous_results.push(old.clone());
        }
        self.step_history.push(result);
        displaced
    }

    /// Truncate the history starting at `identifier`.
    ///
    /// The removed suffix is moved to `previous_results` and returned. Does
    /// nothing if `identifier` is not in the history.
    pub fn remove_step_history_from(&mut self, identifier: &str) -> Vec<StepResult> {
        let Some(idx) = self.step_history.iter().position(|r| r.identifier() == identifier) else {
            return Vec::new();
        };
        let removed: Vec<StepResult> = self.step_history.drain(idx..).collect();
        self.previous_results.extend(removed.iter().cloned());
        removed
    }

    /// Most recently displaced result for `identifier`.
    pub fn previous_result(&self, identifier: &str) -> Option<&StepResult> {
        self.previous_results.iter().rev().find(|r| r.identifier() == identifier)
    }

    /// Add a recorder result, replacing one with the same identifier.
    pub fn append_async_result(&mut self, result: impl Into<StepResult>) {
        let result = result.into();
        match self
            .async_results
            .iter_mut()
            .find(|r| r.identifier() == result.identifier())
        {
            Some(existing) => *existing = result,
            None => self.async_results.push(result),
        }
    }
}
