//! Core types for task planning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Lowest and highest accepted task priority
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, Failed and Cancelled have no outgoing transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn icon(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "◯",
            TaskStatus::InProgress => "◐",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Cancelled => "−",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by lifecycle operations on a [`Task`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task '{id}' cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        action: &'static str,
    },
    #[error("task '{id}' only accepts subtasks while pending (currently {status})")]
    NotPending { id: String, status: TaskStatus },
}

/// Outcome stored on a task once it completes or fails
///
/// `data` is an opaque JSON payload whose shape is defined by the unit of
/// work that produced it. Composite tasks always report
/// `{"completed_subtasks": n}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution duration in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

fn default_priority() -> u8 {
    MIN_PRIORITY
}

/// Plan files may carry any integer; out-of-range values clamp like
/// `with_priority`
fn deserialize_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8)
}

/// A unit of work, possibly composed of subtasks
///
/// Descriptive fields are public. Status, result, timestamps, dependencies
/// and subtasks only change through the builder methods and the lifecycle
/// operations, so the planner's cached order and the status invariants
/// cannot be bypassed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default = "default_priority",
        deserialize_with = "deserialize_priority"
    )]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    subtasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<TaskResult>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: MIN_PRIORITY,
            metadata: HashMap::new(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority, clamped to `1..=10`
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    pub fn with_subtask(mut self, subtask: Task) -> Self {
        self.subtasks.push(subtask);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn subtasks(&self) -> &[Task] {
        &self.subtasks
    }

    pub(crate) fn subtasks_mut(&mut self) -> &mut [Task] {
        &mut self.subtasks
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_composite(&self) -> bool {
        !self.subtasks.is_empty()
    }

    /// Mark the task as started
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.expect_status(&[TaskStatus::Pending], "start")?;
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as completed with the given result
    pub fn complete(&mut self, result: TaskResult) -> Result<(), TaskError> {
        self.expect_status(&[TaskStatus::InProgress], "complete")?;
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as failed, synthesizing a failed result
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.expect_status(&[TaskStatus::InProgress], "fail")?;
        let completed_at = Utc::now();
        let mut result = TaskResult::failure(error);
        if let Some(started_at) = self.started_at {
            result.duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        }
        self.status = TaskStatus::Failed;
        self.result = Some(result);
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Mark the task as cancelled. Cancelled tasks carry no result.
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        self.expect_status(&[TaskStatus::Pending, TaskStatus::InProgress], "cancel")?;
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Return to Pending, clearing result and timestamps. Subtasks are left alone.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Reset this task and every subtask below it
    pub fn reset_tree(&mut self) {
        self.reset();
        for subtask in &mut self.subtasks {
            subtask.reset_tree();
        }
    }

    /// Append a subtask. Only allowed while this task is still pending.
    pub fn add_subtask(&mut self, subtask: Task) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::NotPending {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.subtasks.push(subtask);
        Ok(())
    }

    /// True when every dependency appears in `completed`
    pub fn is_ready<S: AsRef<str>>(&self, completed: &[S]) -> bool {
        self.dependencies
            .iter()
            .all(|dep| completed.iter().any(|done| done.as_ref() == dep))
    }

    /// Time between start and completion, if both happened
    pub fn execution_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => (completed - started).to_std().ok(),
            _ => None,
        }
    }

    /// Depth-first search through the subtask tree (excluding `self`)
    pub fn find_subtask(&self, id: &str) -> Option<&Task> {
        for subtask in &self.subtasks {
            if subtask.id == id {
                return Some(subtask);
            }
            if let Some(found) = subtask.find_subtask(id) {
                return Some(found);
            }
        }
        None
    }

    fn expect_status(&self, allowed: &[TaskStatus], action: &'static str) -> Result<(), TaskError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                action,
            })
        }
    }
}
