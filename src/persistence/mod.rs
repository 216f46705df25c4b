//! Saving and loading plans and run state
//!
//! Snapshots are pretty JSON written atomically: the new content goes to a
//! temp file in the same directory, which is then renamed over the target.

pub mod plan_file;
pub mod run_log;

pub use plan_file::PlanFile;
pub use run_log::{RunLogEvent, RunLogHeader, RunLogger};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::planning::{RunReport, Task, TaskExecutor, TaskPlanner, TaskStatus, UnitOfWork};

/// Highest snapshot format this build can read
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to pick a run back up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub execution_order: Vec<String>,
    #[serde(default)]
    pub run: RunReport,
}

impl StateSnapshot {
    pub fn capture(executor: &TaskExecutor) -> Self {
        Self::from_parts(executor.planner(), executor.report())
    }

    pub fn from_parts(planner: &TaskPlanner, run: RunReport) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            tasks: planner.tasks().to_vec(),
            execution_order: planner.get_execution_order(),
            run,
        }
    }

    /// Rebuild the planner. Tasks caught mid-flight are put back to Pending
    /// together with their subtasks.
    pub fn into_planner(self) -> (TaskPlanner, RunReport) {
        let mut tasks = self.tasks;
        for task in tasks.iter_mut() {
            if task.status() == TaskStatus::InProgress {
                tracing::warn!(task_id = %task.id, "Task was in progress when saved; resetting");
                task.reset_tree();
            }
        }

        let planner = TaskPlanner::from_tasks(tasks);
        if planner.get_execution_order() != self.execution_order {
            tracing::debug!("Saved execution order differs from the recomputed one");
        }
        (planner, self.run)
    }

    /// Put cancelled root tasks back to Pending so a resumed run picks them
    /// up again. Returns the ids that were requeued.
    pub fn requeue_cancelled(&mut self) -> Vec<String> {
        let mut requeued = Vec::new();
        for task in self.tasks.iter_mut() {
            if task.status() == TaskStatus::Cancelled {
                task.reset_tree();
                requeued.push(task.id.clone());
            }
        }
        self.run.cancelled_tasks.retain(|id| !requeued.contains(id));
        requeued
    }

    /// Rebuild an executor with the saved buckets and log
    pub fn into_executor(self, work: Arc<dyn UnitOfWork>) -> TaskExecutor {
        let (planner, run) = self.into_planner();
        let mut executor = TaskExecutor::new(planner, work);
        executor.restore_run(run);
        executor
    }
}

/// A snapshot file on disk
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `state.json` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .context("Failed to create temporary state file")?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write state file {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), tasks = snapshot.tasks.len(), "Saved state");
        Ok(())
    }

    pub fn load(&self) -> Result<StateSnapshot> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        let snapshot: StateSnapshot =
            serde_json::from_str(&content).context("Failed to parse state file")?;

        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "State file version {} is newer than supported version {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        tracing::debug!(path = %self.path.display(), "Loaded state");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::{FnWork, SimulatedWork, WorkError, WorkRequest};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_save_and_resume() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());

        let token = CancellationToken::new();
        let trigger = token.clone();
        let work = Arc::new(FnWork::new("interrupt", move |req: WorkRequest| {
            let trigger = trigger.clone();
            async move {
                if req.task_id == "B" {
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, WorkError>(json!({"done": req.task_id}))
            }
        }));
        let planner = TaskPlanner::from_tasks(vec![
            Task::new("A", "Analyze"),
            Task::new("B", "Execute").depends_on("A"),
        ]);
        let mut executor = TaskExecutor::new(planner, work).with_cancellation(token);
        let report = executor.execute_all_tasks().await;
        assert_eq!(report.cancelled_tasks, vec!["B"]);

        store.save(&StateSnapshot::capture(&executor)).unwrap();
        assert!(store.exists());

        let mut snapshot = store.load().unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.execution_order, vec!["A", "B"]);
        assert_eq!(snapshot.requeue_cancelled(), vec!["B"]);

        let mut resumed = snapshot.into_executor(Arc::new(SimulatedWork::instant()));
        assert_eq!(resumed.completed_tasks(), &["A".to_string()]);
        assert_eq!(resumed.execution_log().len(), 4);

        let report = resumed.execute_all_tasks().await;
        assert_eq!(report.completed_tasks, vec!["A", "B"]);
        assert!(report.cancelled_tasks.is_empty());
        assert_eq!(report.execution_log.len(), 6);
    }

    #[tokio::test]
    async fn test_saved_snapshot_loads_unchanged() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());
        let planner = TaskPlanner::from_tasks(vec![
            Task::new("A", "Analyze").with_priority(4),
            Task::new("B", "Execute")
                .depends_on("A")
                .with_subtask(Task::new("B1", "Compile")),
        ]);
        let mut executor = TaskExecutor::new(planner, Arc::new(SimulatedWork::instant()));
        executor.execute_all_tasks().await;

        let snapshot = StateSnapshot::capture(&executor);
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_in_progress_tasks_are_reset() {
        let mut task = Task::new("A", "Analyze").with_subtask(Task::new("A1", "Sub"));
        task.start().unwrap();
        let planner = TaskPlanner::from_tasks(vec![task]);

        let (planner, _) = StateSnapshot::from_parts(&planner, RunReport::default()).into_planner();
        assert_eq!(planner.get_task("A").unwrap().status(), TaskStatus::Pending);
    }

    #[test]
    fn test_rejects_newer_version() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());
        let mut snapshot = StateSnapshot::from_parts(&TaskPlanner::new(), RunReport::default());
        snapshot.version = SNAPSHOT_VERSION + 1;
        store.save(&snapshot).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }
}
