//! Dependency-ordered task planner
//!
//! Holds the root tasks of a plan and keeps a linear execution order derived
//! from the dependency ids they declare. Subtasks are reached through their
//! parent and never take part in the global order.

use serde::{Deserialize, Serialize};

use super::types::{Task, TaskStatus};

/// Task counts by status, plus the current order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub execution_order: Vec<String>,
}

/// Plans and organizes root tasks for execution
#[derive(Debug, Clone, Default)]
pub struct TaskPlanner {
    tasks: Vec<Task>,
    execution_order: Vec<String>,
    /// Ids appended by the fallback because their dependencies never resolved
    unresolved: Vec<String>,
}

impl TaskPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a planner from an existing task list, keeping its order
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut planner = Self {
            tasks,
            execution_order: Vec::new(),
            unresolved: Vec::new(),
        };
        planner.update_execution_order();
        planner
    }

    pub fn add_task(&mut self, task: Task) {
        tracing::debug!(task_id = %task.id, "Adding task to planner");
        self.tasks.push(task);
        self.update_execution_order();
    }

    /// Remove a root task by id. Returns false when no such task exists.
    pub fn remove_task(&mut self, task_id: &str) -> bool {
        match self.tasks.iter().position(|t| t.id == task_id) {
            Some(index) => {
                self.tasks.remove(index);
                self.update_execution_order();
                true
            }
            None => false,
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Mutable access for lifecycle operations. Dependencies cannot change
    /// through this handle, so the cached order stays valid.
    pub fn get_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> std::slice::IterMut<'_, Task> {
        self.tasks.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pending root tasks whose dependencies all appear in `completed`
    pub fn get_ready_tasks<S: AsRef<str>>(&self, completed: &[S]) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Pending && t.is_ready(completed))
            .collect()
    }

    /// Recommended execution order (a copy)
    pub fn get_execution_order(&self) -> Vec<String> {
        self.execution_order.clone()
    }

    /// Tasks that were placed by the cycle fallback rather than by their
    /// dependencies. Empty when the graph is fully resolvable.
    pub fn unresolved_tasks(&self) -> &[String] {
        &self.unresolved
    }

    pub fn get_task_summary(&self) -> TaskSummary {
        let count = |status: TaskStatus| self.tasks.iter().filter(|t| t.status() == status).count();

        TaskSummary {
            total_tasks: self.tasks.len(),
            pending_tasks: count(TaskStatus::Pending),
            in_progress_tasks: count(TaskStatus::InProgress),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            cancelled_tasks: count(TaskStatus::Cancelled),
            execution_order: self.execution_order.clone(),
        }
    }

    /// Drop root tasks that completed. Subtasks of retained tasks are untouched.
    pub fn clear_completed_tasks(&mut self) {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.status() != TaskStatus::Completed);
        tracing::debug!(removed = before - self.tasks.len(), "Cleared completed tasks");
        self.update_execution_order();
    }

    /// Put every root task back to Pending. Dependencies and subtasks stay as they are.
    pub fn reset_all_tasks(&mut self) {
        for task in &mut self.tasks {
            task.reset();
        }
    }

    /// Like [`reset_all_tasks`](Self::reset_all_tasks) but walks into subtasks
    /// too, so composite tasks can be retried from scratch.
    pub fn reset_all_tasks_deep(&mut self) {
        for task in &mut self.tasks {
            task.reset_tree();
        }
    }

    fn update_execution_order(&mut self) {
        let mut order: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| t.dependencies().is_empty())
            .map(|t| t.id.clone())
            .collect();

        let mut remaining: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| !t.dependencies().is_empty())
            .collect();

        self.unresolved.clear();

        while !remaining.is_empty() {
            let before = remaining.len();
            // Tasks satisfied earlier in this pass count for later ones in the same pass
            remaining.retain(|task| {
                if task.is_ready(&order) {
                    order.push(task.id.clone());
                    false
                } else {
                    true
                }
            });

            if remaining.len() == before {
                self.unresolved = remaining.iter().map(|t| t.id.clone()).collect();
                tracing::warn!(
                    tasks = ?self.unresolved,
                    "Circular or missing dependencies; appending tasks in declaration order"
                );
                order.extend(self.unresolved.iter().cloned());
                break;
            }
        }

        self.execution_order = order;
    }
}
