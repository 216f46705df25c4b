use serde_json::json;
use std::sync::Arc;
use task_planner::planning::{
    Decomposer, LogAction, SimulatedWork, Task, TaskExecutor, TaskPlanner, TaskResult,
    TaskStatus, TemplateDecomposer,
};

use crate::common::*;

fn instant() -> Arc<SimulatedWork> {
    Arc::new(SimulatedWork::instant())
}

#[tokio::test]
async fn test_linear_chain() {
    let mut planner = TaskPlanner::new();
    planner.add_task(Task::new("A", "Analyze"));
    planner.add_task(Task::new("B", "Execute").depends_on("A"));
    planner.add_task(Task::new("C", "Verify").depends_on("B"));
    assert_eq!(planner.get_execution_order(), vec!["A", "B", "C"]);

    let mut executor = TaskExecutor::new(planner, instant());
    executor.execute_all_tasks().await;

    assert_eq!(executor.completed_tasks(), &["A", "B", "C"].map(String::from));
    let log: Vec<_> = executor
        .execution_log()
        .iter()
        .map(|e| (e.task_id.as_str(), e.action))
        .collect();
    assert_eq!(
        log,
        vec![
            ("A", LogAction::Started),
            ("A", LogAction::Completed),
            ("B", LogAction::Started),
            ("B", LogAction::Completed),
            ("C", LogAction::Started),
            ("C", LogAction::Completed),
        ]
    );

    for id in ["A", "B", "C"] {
        let task = executor.planner().get_task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.result().unwrap().success);
        assert!(task.started_at().unwrap() <= task.completed_at().unwrap());
    }
}

#[tokio::test]
async fn test_composite_fail_fast() {
    let parent = Task::new("P", "Parent")
        .with_subtask(Task::new("S1", "Fail here"))
        .with_subtask(Task::new("S2", "After").depends_on("S1"));
    let planner = TaskPlanner::from_tasks(vec![parent]);
    let mut executor = TaskExecutor::new(planner, failing_on_title());

    executor.execute_all_tasks().await;

    assert_eq!(executor.failed_tasks(), &["P".to_string()]);
    let parent = executor.planner().get_task("P").unwrap();
    assert_eq!(parent.status(), TaskStatus::Failed);
    let error = parent.result().unwrap().error.clone().unwrap();
    assert!(error.contains("S1"), "error should name S1: {}", error);
    assert_eq!(parent.subtasks()[1].status(), TaskStatus::Pending);
}

#[tokio::test]
async fn test_ghost_dependency_stays_pending() {
    let planner = TaskPlanner::from_tasks(vec![
        Task::new("A", "Analyze").depends_on("X"),
        Task::new("B", "Standalone"),
    ]);
    assert!(planner.get_execution_order().contains(&"A".to_string()));
    assert_eq!(planner.unresolved_tasks(), &["A".to_string()]);

    let mut executor = TaskExecutor::new(planner, instant());
    executor.execute_all_tasks().await;

    let a = executor.planner().get_task("A").unwrap();
    assert_eq!(a.status(), TaskStatus::Pending);
    assert!(!executor.completed_tasks().contains(&"A".to_string()));
    assert!(!executor.failed_tasks().contains(&"A".to_string()));
    assert_eq!(executor.completed_tasks(), &["B".to_string()]);
}

#[tokio::test]
async fn test_empty_plan_summary() {
    let mut executor = TaskExecutor::new(TaskPlanner::new(), instant());
    let report = executor.execute_all_tasks().await;

    assert!(report.execution_log.is_empty());
    let summary = executor.get_execution_summary();
    assert_eq!(summary.total_tasks, 0);
    assert_eq!(summary.success_rate, 0.0);
}

#[test]
fn test_reset_keeps_graph() {
    let mut planner = TaskPlanner::new();
    planner.add_task(Task::new("A", "Analyze"));
    planner.add_task(
        Task::new("B", "Execute")
            .depends_on("A")
            .with_subtask(Task::new("B1", "Step")),
    );

    {
        let a = planner.get_task_mut("A").unwrap();
        a.start().unwrap();
        a.complete(TaskResult::success(json!({"ok": true}))).unwrap();
        let b = planner.get_task_mut("B").unwrap();
        b.start().unwrap();
        b.fail("nope").unwrap();
    }

    planner.reset_all_tasks();

    for task in planner.tasks() {
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.result().is_none());
        assert!(task.started_at().is_none());
        assert!(task.completed_at().is_none());
    }
    let b = planner.get_task("B").unwrap();
    assert_eq!(b.dependencies(), &["A".to_string()]);
    assert_eq!(b.subtasks().len(), 1);
}

#[test]
fn test_cycle_fallback() {
    let planner = TaskPlanner::from_tasks(vec![
        Task::new("A", "A").depends_on("B"),
        Task::new("B", "B").depends_on("A"),
    ]);

    let mut order = planner.get_execution_order();
    order.sort();
    assert_eq!(order, vec!["A", "B"]);
    assert_eq!(planner.unresolved_tasks().len(), 2);
}

#[tokio::test]
async fn test_failed_run_can_be_retried_after_reset() {
    let planner = TaskPlanner::from_tasks(vec![Task::new("A", "Fail once")]);
    let mut executor = TaskExecutor::new(planner, failing_on_title());
    executor.execute_all_tasks().await;
    assert_eq!(executor.failed_tasks(), &["A".to_string()]);

    executor.reset_execution_state();
    executor.planner_mut().get_task_mut("A").unwrap().title = "Works now".to_string();
    executor.execute_all_tasks().await;

    assert_eq!(executor.completed_tasks(), &["A".to_string()]);
    assert!(executor.failed_tasks().is_empty());
}

#[tokio::test]
async fn test_goal_template_runs_to_completion() {
    let task = TemplateDecomposer::new()
        .decompose("Write the release notes")
        .await
        .unwrap();
    let root_id = task.id.clone();
    let mut executor = TaskExecutor::new(TaskPlanner::from_tasks(vec![task]), instant());

    executor.execute_all_tasks().await;

    let root = executor.planner().get_task(&root_id).unwrap();
    assert_eq!(root.status(), TaskStatus::Completed);
    assert_eq!(root.result().unwrap().data, json!({"completed_subtasks": 3}));
    assert_eq!(
        root.subtasks()[2].result().unwrap().data,
        json!({"verification": "passed"})
    );
    assert_eq!(executor.execution_log().len(), 8);
}
