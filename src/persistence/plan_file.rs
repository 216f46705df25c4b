//! Plan files: a list of root tasks in TOML or JSON
//!
//! ```toml
//! name = "release"
//!
//! [[tasks]]
//! id = "build"
//! title = "Build"
//!
//! [[tasks]]
//! id = "publish"
//! title = "Publish"
//! dependencies = ["build"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::planning::{Task, TaskPlanner};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl PlanFile {
    /// Load by extension: `.toml` or `.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;

        let plan: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).context("Failed to parse TOML plan")?,
            Some("json") => serde_json::from_str(&content).context("Failed to parse JSON plan")?,
            _ => anyhow::bail!(
                "Unsupported plan file extension: {} (expected .toml or .json)",
                path.display()
            ),
        };

        plan.warn_duplicate_ids();
        tracing::info!(path = %path.display(), tasks = plan.tasks.len(), "Loaded plan");
        Ok(plan)
    }

    pub fn into_planner(self) -> TaskPlanner {
        TaskPlanner::from_tasks(self.tasks)
    }

    /// Ids are not required to be unique, but lookups only ever see the
    /// first task with a given id.
    fn warn_duplicate_ids(&self) {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                tracing::warn!(task_id = %task.id, "Duplicate task id in plan");
            }
        }
    }
}
