//! Unit-of-work interface
//!
//! Simple tasks are handed to a [`UnitOfWork`] implementation. The executor
//! owns timing, cancellation and the task lifecycle; a unit of work only
//! turns a request into a payload or an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::tools::ToolRegistry;

use super::types::Task;

/// Metadata key naming the tool a task should invoke
pub const TOOL_METADATA_KEY: &str = "tool";
/// Metadata key holding the tool arguments (a JSON object)
pub const ARGS_METADATA_KEY: &str = "args";

/// Descriptive fields of a simple task, detached from the task itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub metadata: HashMap<String, Value>,
}

impl From<&Task> for WorkRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            metadata: task.metadata.clone(),
        }
    }
}

/// Why a unit of work did not produce a payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),
    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unit of work panicked: {0}")]
    Panicked(String),
    #[error("cancelled")]
    Cancelled,
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkError::Failed(message.into())
    }
}

/// Performs the actual work behind a simple task
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Execute the request, returning an opaque JSON payload on success
    async fn perform(&self, request: WorkRequest) -> Result<Value, WorkError>;
}

/// Stand-in for real work: waits a fixed delay, then succeeds
///
/// Payloads follow the title keyword: "analyze" → `{"analysis": "completed"}`,
/// "execute" → `{"execution": "completed"}`, "verify" →
/// `{"verification": "passed"}`, anything else → `{"message": ...}`.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No delay at all
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    fn payload_for(title: &str) -> Value {
        let title_lower = title.to_lowercase();
        if title_lower.contains("analyze") {
            json!({"analysis": "completed"})
        } else if title_lower.contains("execute") {
            json!({"execution": "completed"})
        } else if title_lower.contains("verify") {
            json!({"verification": "passed"})
        } else {
            json!({"message": format!("Task '{}' completed successfully", title)})
        }
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl UnitOfWork for SimulatedWork {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn perform(&self, request: WorkRequest) -> Result<Value, WorkError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::payload_for(&request.title))
    }
}

/// Adapter turning an async closure into a [`UnitOfWork`]
pub struct FnWork<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnWork<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, WorkError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> UnitOfWork for FnWork<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, WorkError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self, request: WorkRequest) -> Result<Value, WorkError> {
        (self.func)(request).await
    }
}

/// Dispatches tasks to the tool registry
///
/// A task names its tool in `metadata.tool` and passes arguments in
/// `metadata.args`. The tool output becomes `{"tool": name, "output": data}`.
/// Tasks without a tool go to the fallback, or fail when there is none.
pub struct ToolWork {
    registry: Arc<ToolRegistry>,
    fallback: Option<Arc<dyn UnitOfWork>>,
}

impl ToolWork {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn UnitOfWork>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl UnitOfWork for ToolWork {
    fn name(&self) -> &str {
        "tool"
    }

    async fn perform(&self, request: WorkRequest) -> Result<Value, WorkError> {
        let tool_name = match request.metadata.get(TOOL_METADATA_KEY) {
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(WorkError::failed(format!(
                    "Task '{}' has a non-string tool name: {}",
                    request.task_id, other
                )))
            }
            None => {
                return match &self.fallback {
                    Some(fallback) => fallback.perform(request).await,
                    None => Err(WorkError::failed(format!(
                        "Task '{}' does not name a tool",
                        request.task_id
                    ))),
                };
            }
        };

        let args = request
            .metadata
            .get(ARGS_METADATA_KEY)
            .cloned()
            .unwrap_or_else(|| json!({}));

        tracing::debug!(task_id = %request.task_id, tool = %tool_name, "Dispatching task to tool");
        let result = self.registry.execute_tool(&tool_name, args).await;

        if result.success {
            Ok(json!({"tool": tool_name, "output": result.data}))
        } else {
            Err(WorkError::Tool {
                tool: tool_name,
                message: result.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}
