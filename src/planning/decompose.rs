//! Goal decomposition
//!
//! A [`Decomposer`] turns a free-text goal into a root task with a subtask
//! tree. The decomposition policy is pluggable; [`TemplateDecomposer`] is the
//! default three-step plan.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::Task;

#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Build a task tree for `goal`
    async fn decompose(&self, goal: &str) -> Result<Task>;
}

/// Analyze, execute, verify: each step depends on the previous one
#[derive(Debug, Clone, Default)]
pub struct TemplateDecomposer;

impl TemplateDecomposer {
    pub fn new() -> Self {
        Self
    }

    /// Template plan for `goal`, with the root id derived from `now`
    pub fn plan_at(&self, goal: &str, now: DateTime<Utc>) -> Task {
        let root_id = format!("task_{}", now.format("%Y%m%d_%H%M%S"));
        let step = |n: usize| format!("{}_subtask_{}", root_id, n);

        Task::new(root_id.clone(), goal)
            .with_description(format!("Task to achieve: {}", goal))
            .with_priority(5)
            .with_subtask(
                Task::new(step(1), "Analyze requirements")
                    .with_description("Understand what needs to be done")
                    .with_priority(1),
            )
            .with_subtask(
                Task::new(step(2), "Execute main task")
                    .with_description("Perform the main work")
                    .with_priority(2)
                    .depends_on(step(1)),
            )
            .with_subtask(
                Task::new(step(3), "Verify results")
                    .with_description("Check that the task was completed successfully")
                    .with_priority(3)
                    .depends_on(step(2)),
            )
    }
}

#[async_trait]
impl Decomposer for TemplateDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Task> {
        let goal = goal.trim();
        if goal.is_empty() {
            anyhow::bail!("Goal must not be empty");
        }

        let task = self.plan_at(goal, Utc::now());
        tracing::info!(task_id = %task.id, subtasks = task.subtasks().len(), "Decomposed goal");
        Ok(task)
    }
}
