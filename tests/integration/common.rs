use anyhow::Result;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use task_planner::config::{Config, CONFIG_PATH_ENV};
use task_planner::planning::{FnWork, UnitOfWork, WorkError, WorkRequest};
use tokio::process::Command;

/// Scratch directory with a config that makes runs instant and keeps state
/// inside the directory
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        let state_dir = temp_dir.path().join("state");

        let mut config = Config::default();
        config.simulation.work_delay_ms = 0;
        config.persistence.state_dir = Some(state_dir.clone());
        config.save_to(&config_path)?;

        Ok(Self {
            temp_dir,
            config_path,
            state_dir,
        })
    }

    /// Write a plan file into the scratch directory
    pub fn write_plan(&self, name: &str, content: &str) -> Result<PathBuf> {
        let child = self.temp_dir.child(name);
        child.write_str(content)?;
        Ok(child.path().to_path_buf())
    }

    /// Run the task-planner binary with the given arguments
    pub async fn run_task_planner(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(env!("CARGO_BIN_EXE_task-planner"))
            .args(args)
            .current_dir(self.temp_dir.path())
            .env(CONFIG_PATH_ENV, &self.config_path)
            .env("RUST_LOG", "off")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run task-planner: {}", e))
    }
}

/// Unit of work that fails any task whose title contains "fail"
pub fn failing_on_title() -> Arc<dyn UnitOfWork> {
    Arc::new(FnWork::new("failing-on-title", |req: WorkRequest| async move {
        if req.title.to_lowercase().contains("fail") {
            Err(WorkError::failed(format!("{} could not finish", req.title)))
        } else {
            Ok(serde_json::json!({"task": req.task_id}))
        }
    }))
}

pub fn output_to_string(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_to_string(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

pub fn assert_success(output: &std::process::Output) {
    if !output.status.success() {
        panic!(
            "Command failed with status: {}\nStdout: {}\nStderr: {}",
            output.status,
            output_to_string(output),
            stderr_to_string(output)
        );
    }
}

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{}' in:\n{}",
        needle,
        haystack
    );
}
