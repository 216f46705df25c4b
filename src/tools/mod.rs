use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

use crate::config::ToolConfig;

pub mod read;
pub mod write;

pub use read::ReadTool;
pub use write::WriteTool;

/// Context passed to tool execution containing working directory and configuration
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub working_dir: &'a Path,
    pub config: &'a ToolConfig,
}

impl<'a> ToolContext<'a> {
    pub fn new(working_dir: &'a Path, config: &'a ToolConfig) -> Self {
        Self {
            working_dir,
            config,
        }
    }

    /// Resolve a tool-supplied path inside the working directory.
    ///
    /// Absolute paths, `..` segments that climb above the working directory
    /// and symlinks pointing out of it are all rejected. The target itself
    /// need not exist yet.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let outside = || anyhow::anyhow!("Path {} is outside the working directory", requested);

        let mut relative = PathBuf::new();
        for component in Path::new(requested).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(outside());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }
        if relative.as_os_str().is_empty() {
            anyhow::bail!("Path {} does not name a file", requested);
        }

        let root = std::fs::canonicalize(self.working_dir).with_context(|| {
            format!(
                "Working directory {} is not accessible",
                self.working_dir.display()
            )
        })?;
        let target = root.join(&relative);

        // The deepest part of the path that exists decides where it really points
        let existing = target
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .unwrap_or(root.as_path());
        let real = std::fs::canonicalize(existing)
            .with_context(|| format!("Failed to resolve {}", requested))?;
        if !real.starts_with(&root) {
            return Err(outside());
        }

        Ok(target)
    }
}

/// Outcome of invoking a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext<'_>) -> Result<String>;
}

/// Named capabilities available to tool-backed tasks
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide
/// registry.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    working_dir: PathBuf,
    config: ToolConfig,
}

impl ToolRegistry {
    /// Registry with the built-in file tools, rooted at `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>, config: ToolConfig) -> Self {
        let mut registry = Self {
            tools: vec![],
            working_dir: working_dir.into(),
            config,
        };
        registry.register(Box::new(ReadTool));
        registry.register(Box::new(WriteTool));
        registry
    }

    /// Registry without any tools, rooted at the current directory
    pub fn empty() -> Self {
        Self {
            tools: vec![],
            working_dir: PathBuf::from("."),
            config: ToolConfig::default(),
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name() != name);
        self.tools.len() != before
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn get_tools_schema(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.parameters_schema()
                })
            })
            .collect()
    }

    /// Invoke a tool by name. Never fails; errors come back in the result.
    pub async fn execute_tool(&self, name: &str, params: Value) -> ToolResult {
        let Some(tool) = self.get_tool(name) else {
            return ToolResult::err(format!("Tool '{}' not found", name));
        };

        let ctx = ToolContext::new(&self.working_dir, &self.config);
        match tool.execute(params, &ctx).await {
            Ok(output) => ToolResult::ok(Value::String(truncate_output(
                output,
                self.config.max_output_bytes,
            ))),
            Err(e) => ToolResult::err(format!("Error executing tool '{}': {:#}", name, e)),
        }
    }
}

fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n[output truncated]");
    output
}
