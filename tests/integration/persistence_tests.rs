use anyhow::Result;
use std::sync::Arc;
use task_planner::persistence::{PlanFile, RunLogEvent, RunLogger, StateSnapshot, StateStore};
use task_planner::planning::{SimulatedWork, TaskExecutor, TaskStatus};
use tokio::sync::mpsc;

use crate::common::*;

const PLAN: &str = r#"
name = "nightly"

[[tasks]]
id = "fetch"
title = "Fetch sources"

[[tasks]]
id = "build"
title = "Build"
dependencies = ["fetch"]

[[tasks.subtasks]]
id = "compile"
title = "Compile"

[[tasks.subtasks]]
id = "link"
title = "Link"
dependencies = ["compile"]

[[tasks]]
id = "publish"
title = "Fail to publish"
dependencies = ["build"]
"#;

#[tokio::test]
async fn test_plan_run_snapshot_roundtrip() -> Result<()> {
    let env = TestEnvironment::new()?;
    let plan_path = env.write_plan("nightly.toml", PLAN)?;

    let planner = PlanFile::load(&plan_path)?.into_planner();
    assert_eq!(planner.get_execution_order(), vec!["fetch", "build", "publish"]);

    let mut executor = TaskExecutor::new(planner, failing_on_title());
    executor.execute_all_tasks().await;
    assert_eq!(executor.completed_tasks(), &["fetch", "build"].map(String::from));
    assert_eq!(executor.failed_tasks(), &["publish".to_string()]);

    let store = StateStore::in_dir(&env.state_dir);
    store.save(&StateSnapshot::capture(&executor))?;

    let snapshot = store.load()?;
    assert_eq!(snapshot.run, executor.report());

    let restored = snapshot.into_executor(Arc::new(SimulatedWork::instant()));
    let build = restored.planner().get_task("build").unwrap();
    assert_eq!(build.status(), TaskStatus::Completed);
    assert_eq!(build.subtasks()[1].status(), TaskStatus::Completed);
    assert_eq!(
        restored.planner().get_task("publish").unwrap().status(),
        TaskStatus::Failed
    );
    assert_eq!(restored.execution_log(), executor.execution_log());

    Ok(())
}

#[tokio::test]
async fn test_observer_feeds_run_log() -> Result<()> {
    let env = TestEnvironment::new()?;
    let plan_path = env.write_plan("nightly.toml", PLAN)?;
    let planner = PlanFile::load(&plan_path)?.into_planner();

    let mut logger = RunLogger::create(&env.state_dir, "nightly")?;
    let log_path = logger.log_path().to_path_buf();
    logger.log_run_started(planner.len(), planner.get_execution_order())?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            logger.log_entry(entry).unwrap();
        }
        logger
    });

    let mut executor = TaskExecutor::new(planner, failing_on_title()).with_observer(tx);
    let report = executor.execute_all_tasks().await;
    let expected = executor.execution_log().to_vec();
    drop(executor);

    let mut logger = writer.await?;
    logger.log_run_finished(&report)?;

    assert_eq!(RunLogger::read_entries(&log_path)?, expected);
    let events = RunLogger::read_events(&log_path)?;
    assert!(matches!(events.first(), Some(RunLogEvent::RunStarted { tasks: 3, .. })));
    assert!(matches!(
        events.last(),
        Some(RunLogEvent::RunFinished {
            completed: 2,
            failed: 1,
            ..
        })
    ));

    Ok(())
}

#[test]
fn test_load_missing_state() {
    let env = TestEnvironment::new().unwrap();
    let store = StateStore::in_dir(&env.state_dir);
    assert!(!store.exists());
    assert!(store.load().is_err());
}
