use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{Tool, ToolContext};

/// Writes task output files under the working directory
pub struct WriteTool;

#[derive(Debug, Deserialize)]
struct WriteParams {
    file_path: String,
    content: String,
    /// Add to the end of an existing file instead of replacing it
    #[serde(default)]
    append: bool,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes a task output file inside the working directory, creating missing parent \
         directories. Replaces the file unless append is set."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of replacing (optional, default false)"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext<'_>) -> Result<String> {
        let params: WriteParams =
            serde_json::from_value(params).context("Invalid parameters for write_file")?;
        let target = ctx.resolve(&params.file_path)?;

        if target.is_dir() {
            anyhow::bail!("{} is a directory", params.file_path);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create parent of {}", params.file_path))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(params.append)
            .truncate(!params.append)
            .open(&target)
            .await
            .with_context(|| format!("Failed to open {}", params.file_path))?;
        file.write_all(params.content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", params.file_path))?;
        file.flush().await?;

        let bytes = params.content.len();
        tracing::debug!(path = %target.display(), bytes, append = params.append, "Wrote task output");

        let verb = if params.append { "Appended" } else { "Wrote" };
        Ok(format!("{} {} bytes to {}", verb, bytes, params.file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = assert_fs::TempDir::new().unwrap();
        let config = ToolConfig::default();
        let ctx = ToolContext::new(dir.path(), &config);

        let message = WriteTool
            .execute(
                serde_json::json!({"file_path": "out/report.md", "content": "# Done"}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(message, "Wrote 6 bytes to out/report.md");
        dir.child("out/report.md").assert("# Done");
    }

    #[tokio::test]
    async fn test_append_keeps_existing_content() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("log.txt").write_str("first\n").unwrap();
        let config = ToolConfig::default();
        let ctx = ToolContext::new(dir.path(), &config);

        let message = WriteTool
            .execute(
                serde_json::json!({"file_path": "log.txt", "content": "second\n", "append": true}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(message, "Appended 7 bytes to log.txt");
        dir.child("log.txt").assert("first\nsecond\n");

        WriteTool
            .execute(serde_json::json!({"file_path": "log.txt", "content": "reset"}), &ctx)
            .await
            .unwrap();
        dir.child("log.txt").assert("reset");
    }

    #[tokio::test]
    async fn test_write_outside_working_dir_is_refused() {
        let dir = assert_fs::TempDir::new().unwrap();
        let work = dir.child("work");
        work.create_dir_all().unwrap();
        let config = ToolConfig::default();
        let ctx = ToolContext::new(work.path(), &config);

        let err = WriteTool
            .execute(
                serde_json::json!({"file_path": "../escaped.txt", "content": "x"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Path ../escaped.txt is outside the working directory"
        );
        dir.child("escaped.txt").assert(predicate::path::missing());

        let absolute = dir.child("absolute.txt").path().display().to_string();
        let err = WriteTool
            .execute(serde_json::json!({"file_path": absolute, "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("is outside the working directory"));
        dir.child("absolute.txt").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_write_to_directory_fails() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("out").create_dir_all().unwrap();
        let config = ToolConfig::default();
        let ctx = ToolContext::new(dir.path(), &config);

        let err = WriteTool
            .execute(serde_json::json!({"file_path": "out", "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "out is a directory");
    }
}
