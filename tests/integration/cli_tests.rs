use anyhow::Result;
use serial_test::serial;
use task_planner::persistence::StateStore;
use task_planner::planning::TaskStatus;

use crate::common::*;

const PLAN: &str = r#"
[[tasks]]
id = "verify"
title = "Verify"
dependencies = ["build"]

[[tasks]]
id = "build"
title = "Build"
"#;

#[tokio::test]
#[serial]
async fn test_cli_help() -> Result<()> {
    let env = TestEnvironment::new()?;

    let output = env.run_task_planner(&["--help"]).await?;

    assert_success(&output);
    let output_str = output_to_string(&output);
    assert_contains(&output_str, "task-planner");
    assert_contains(&output_str, "resume");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_cli_order() -> Result<()> {
    let env = TestEnvironment::new()?;
    env.write_plan("plan.toml", PLAN)?;

    let output = env.run_task_planner(&["order", "plan.toml"]).await?;

    assert_success(&output);
    let output_str = output_to_string(&output);
    assert_contains(&output_str, "1. build Build");
    assert_contains(&output_str, "2. verify Verify");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_cli_run_saves_state() -> Result<()> {
    let env = TestEnvironment::new()?;
    env.write_plan("plan.json", r#"{"tasks": [{"id": "a", "title": "Analyze"}]}"#)?;

    let output = env.run_task_planner(&["run", "plan.json"]).await?;

    assert_success(&output);
    let output_str = output_to_string(&output);
    assert_contains(&output_str, "1 completed, 0 failed, 0 cancelled of 1 (100% success)");

    let snapshot = StateStore::in_dir(&env.state_dir).load()?;
    assert_eq!(snapshot.tasks[0].status(), TaskStatus::Completed);
    assert_eq!(snapshot.run.completed_tasks, vec!["a"]);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_cli_unsupported_plan() -> Result<()> {
    let env = TestEnvironment::new()?;
    env.write_plan("plan.yaml", "tasks: []")?;

    let output = env.run_task_planner(&["run", "plan.yaml"]).await?;

    assert!(!output.status.success());
    assert_contains(&stderr_to_string(&output), "Unsupported plan file extension");

    Ok(())
}
