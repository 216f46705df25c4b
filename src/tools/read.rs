use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{Tool, ToolContext};

pub struct ReadTool;

#[derive(Debug, Deserialize)]
struct ReadParams {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file relative to the working directory, optionally a line window of it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the working directory"
                },
                "offset": {
                    "type": "number",
                    "description": "Number of lines to skip (optional)"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of lines to return (optional)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext<'_>) -> Result<String> {
        let params: ReadParams =
            serde_json::from_value(params).context("Invalid parameters for read_file")?;

        let file_path = ctx.resolve(&params.file_path)?;
        if !file_path.exists() {
            anyhow::bail!("File not found: {}", params.file_path);
        }

        let content = tokio::fs::read_to_string(&file_path)
            .await
            .with_context(|| format!("Failed to read {}", params.file_path))?;

        if params.offset.is_none() && params.limit.is_none() {
            return Ok(content);
        }

        let offset = params.offset.unwrap_or(0);
        let limit = params.limit.unwrap_or(usize::MAX);
        Ok(content
            .lines()
            .skip(offset)
            .take(limit)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
