//! Task executor
//!
//! Walks the planner's order and drives each task through its lifecycle.
//! Composite tasks recurse into their subtasks in declared order and fail
//! fast; simple tasks are handed to the [`UnitOfWork`]. Every transition is
//! recorded in an append-only execution log, and nothing that happens
//! inside a task escapes as an error.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;

use super::planner::TaskPlanner;
use super::types::{Task, TaskResult, TaskStatus};
use super::work::{UnitOfWork, WorkError, WorkRequest};

/// What happened to a task in an execution log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Started,
    Completed,
    Failed,
    Cancelled,
}

/// One event in the execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub task_id: String,
    pub action: LogAction,
    pub timestamp: DateTime<Utc>,
    /// Result payload of a completed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message of a failed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLogEntry {
    fn new(task_id: &str, action: LogAction, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            task_id: task_id.to_string(),
            action,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            result: None,
            error: None,
        }
    }
}

/// Result of asking the executor to run one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskResult),
    Failed(TaskResult),
    Cancelled,
    /// The task was not pending, so nothing ran
    Skipped(TaskStatus),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            TaskOutcome::Completed(r) | TaskOutcome::Failed(r) => Some(r),
            _ => None,
        }
    }
}

/// Knobs for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Upper bound for a single unit of work
    pub task_timeout: Option<Duration>,
    /// Root tasks that may run at the same time. 1 means strictly sequential.
    pub max_concurrency: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            task_timeout: None,
            max_concurrency: 1,
        }
    }
}

impl From<&ExecutorConfig> for ExecutorOptions {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            task_timeout: (config.task_timeout_secs > 0)
                .then(|| Duration::from_secs(config.task_timeout_secs)),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

/// Buckets and log of a run; also the persisted form of executor state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    #[serde(default)]
    pub cancelled_tasks: Vec<String>,
    pub execution_log: Vec<ExecutionLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    /// Completed tasks over registered root tasks, 0.0 when there are none
    pub success_rate: f64,
    pub execution_log: Vec<ExecutionLogEntry>,
}

/// Shared, read-only state every task execution needs
struct RunContext {
    work: Arc<dyn UnitOfWork>,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    log_tx: UnboundedSender<ExecutionLogEntry>,
    observer: Option<UnboundedSender<ExecutionLogEntry>>,
}

impl RunContext {
    fn record(&self, entry: ExecutionLogEntry) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(entry.clone());
        }
        // The receiver lives as long as the executor
        let _ = self.log_tx.send(entry);
    }
}

/// Executes tasks according to a plan
pub struct TaskExecutor {
    planner: TaskPlanner,
    ctx: RunContext,
    log_rx: UnboundedReceiver<ExecutionLogEntry>,
    max_concurrency: usize,
    completed_tasks: Vec<String>,
    failed_tasks: Vec<String>,
    cancelled_tasks: Vec<String>,
    execution_log: Vec<ExecutionLogEntry>,
}

impl TaskExecutor {
    pub fn new(planner: TaskPlanner, work: Arc<dyn UnitOfWork>) -> Self {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        Self {
            planner,
            ctx: RunContext {
                work,
                task_timeout: None,
                cancel: CancellationToken::new(),
                log_tx,
                observer: None,
            },
            log_rx,
            max_concurrency: 1,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            cancelled_tasks: Vec::new(),
            execution_log: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.ctx.task_timeout = options.task_timeout;
        self.max_concurrency = options.max_concurrency.max(1);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Mirror every log entry to `observer` as soon as it is recorded
    pub fn with_observer(mut self, observer: UnboundedSender<ExecutionLogEntry>) -> Self {
        self.ctx.observer = Some(observer);
        self
    }

    /// Token that aborts the current run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    pub fn planner(&self) -> &TaskPlanner {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut TaskPlanner {
        &mut self.planner
    }

    pub fn into_planner(self) -> TaskPlanner {
        self.planner
    }

    pub fn completed_tasks(&self) -> &[String] {
        &self.completed_tasks
    }

    pub fn failed_tasks(&self) -> &[String] {
        &self.failed_tasks
    }

    pub fn cancelled_tasks(&self) -> &[String] {
        &self.cancelled_tasks
    }

    pub fn execution_log(&self) -> &[ExecutionLogEntry] {
        &self.execution_log
    }

    /// Execute a single task that is not owned by the planner
    pub async fn execute_task(&mut self, task: &mut Task) -> TaskOutcome {
        let outcome = run_task(task, &self.ctx).await;
        self.drain_log();
        outcome
    }

    /// Execute one registered root task by id, ignoring readiness.
    /// Returns `None` when the id is unknown.
    pub async fn execute_registered(&mut self, task_id: &str) -> Option<TaskOutcome> {
        let task = self.planner.get_task_mut(task_id)?;
        let outcome = run_task(task, &self.ctx).await;
        self.drain_log();
        Some(outcome)
    }

    /// Execute every pending, ready task in planner order. Failures do not
    /// stop the run; their dependents simply never become ready.
    pub async fn execute_all_tasks(&mut self) -> RunReport {
        self.run(false).await
    }

    /// Like [`execute_all_tasks`](Self::execute_all_tasks) but stops at the
    /// first failed task
    pub async fn execute_until_failure(&mut self) -> RunReport {
        self.run(true).await
    }

    /// Clear buckets and log and reset every root task to Pending.
    /// A cancelled token is replaced with a fresh one.
    pub fn reset_execution_state(&mut self) {
        self.drain_log();
        self.completed_tasks.clear();
        self.failed_tasks.clear();
        self.cancelled_tasks.clear();
        self.execution_log.clear();
        if self.ctx.cancel.is_cancelled() {
            self.ctx.cancel = CancellationToken::new();
        }
        self.planner.reset_all_tasks();
    }

    pub fn get_execution_summary(&self) -> ExecutionSummary {
        let total_tasks = self.planner.len();
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            self.completed_tasks.len() as f64 / total_tasks as f64
        };

        ExecutionSummary {
            total_tasks,
            completed_tasks: self.completed_tasks.len(),
            failed_tasks: self.failed_tasks.len(),
            cancelled_tasks: self.cancelled_tasks.len(),
            success_rate,
            execution_log: self.execution_log.clone(),
        }
    }

    /// Snapshot of the buckets and log
    pub fn report(&self) -> RunReport {
        RunReport {
            completed_tasks: self.completed_tasks.clone(),
            failed_tasks: self.failed_tasks.clone(),
            cancelled_tasks: self.cancelled_tasks.clone(),
            execution_log: self.execution_log.clone(),
        }
    }

    /// Load buckets and log from a previous run, e.g. before resuming
    pub fn restore_run(&mut self, report: RunReport) {
        self.drain_log();
        self.completed_tasks = report.completed_tasks;
        self.failed_tasks = report.failed_tasks;
        self.cancelled_tasks = report.cancelled_tasks;
        self.execution_log = report.execution_log;
    }

    async fn run(&mut self, stop_on_failure: bool) -> RunReport {
        tracing::info!(
            tasks = self.planner.len(),
            concurrency = self.max_concurrency,
            stop_on_failure,
            "Starting run"
        );

        // A wave would start tasks ordered after the first failure
        if self.max_concurrency > 1 && !stop_on_failure {
            self.run_waves().await;
        } else {
            self.run_sequential(stop_on_failure).await;
        }

        tracing::info!(
            completed = self.completed_tasks.len(),
            failed = self.failed_tasks.len(),
            cancelled = self.cancelled_tasks.len(),
            "Run finished"
        );
        self.report()
    }

    async fn run_sequential(&mut self, stop_on_failure: bool) {
        for task_id in self.planner.get_execution_order() {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("Run cancelled; remaining tasks stay pending");
                break;
            }

            let completed: &[String] = &self.completed_tasks;
            let Some(task) = self.planner.get_task_mut(&task_id) else {
                continue;
            };
            if task.status() != TaskStatus::Pending || !task.is_ready(completed) {
                continue;
            }

            let outcome = run_task(task, &self.ctx).await;
            self.drain_log();

            let stop = self.record_outcome(&task_id, &outcome);
            if stop || (stop_on_failure && matches!(outcome, TaskOutcome::Failed(_))) {
                break;
            }
        }
    }

    /// Each wave runs every pending, ready root task at once, bounded by
    /// `max_concurrency`. The futures are polled on this task, so log
    /// entries arrive in the order they were produced.
    async fn run_waves(&mut self) {
        let limit = self.max_concurrency;
        loop {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("Run cancelled; remaining tasks stay pending");
                break;
            }

            let order = self.planner.get_execution_order();
            let completed: &[String] = &self.completed_tasks;
            let mut wave: Vec<&mut Task> = self
                .planner
                .tasks_mut()
                .filter(|t| t.status() == TaskStatus::Pending && t.is_ready(completed))
                .collect();
            if wave.is_empty() {
                break;
            }
            wave.sort_by_key(|t| order.iter().position(|id| *id == t.id));
            tracing::debug!(size = wave.len(), "Executing wave");

            let ctx = &self.ctx;
            let outcomes: Vec<(String, TaskOutcome)> = futures::stream::iter(wave)
                .map(|task| {
                    let task_id = task.id.clone();
                    async move { (task_id, run_task(task, ctx).await) }
                })
                .buffered(limit)
                .collect()
                .await;
            self.drain_log();

            let mut stop = false;
            for (task_id, outcome) in &outcomes {
                stop |= self.record_outcome(task_id, outcome);
            }
            if stop {
                break;
            }
        }
    }

    /// Put the task id in its bucket. Returns true when the run must stop.
    fn record_outcome(&mut self, task_id: &str, outcome: &TaskOutcome) -> bool {
        match outcome {
            TaskOutcome::Completed(_) => self.completed_tasks.push(task_id.to_string()),
            TaskOutcome::Failed(_) => self.failed_tasks.push(task_id.to_string()),
            TaskOutcome::Cancelled => {
                self.cancelled_tasks.push(task_id.to_string());
                return true;
            }
            TaskOutcome::Skipped(_) => {}
        }
        false
    }

    fn drain_log(&mut self) {
        while let Ok(entry) = self.log_rx.try_recv() {
            self.execution_log.push(entry);
        }
    }
}

fn run_task<'a>(task: &'a mut Task, ctx: &'a RunContext) -> BoxFuture<'a, TaskOutcome> {
    async move {
        if task.status() != TaskStatus::Pending {
            return TaskOutcome::Skipped(task.status());
        }

        if ctx.cancel.is_cancelled() {
            return cancel_task(task, ctx);
        }

        if let Err(e) = task.start() {
            tracing::error!(error = %e, "Could not start task");
            return TaskOutcome::Skipped(task.status());
        }
        tracing::info!(task_id = %task.id, title = %task.title, "Task started");
        ctx.record(ExecutionLogEntry::new(
            &task.id,
            LogAction::Started,
            task.started_at(),
        ));

        let outcome = if task.is_composite() {
            run_composite(task, ctx).await
        } else {
            run_simple(task, ctx).await
        };

        if let Some(entry) = terminal_entry(task, &outcome) {
            ctx.record(entry);
        }

        outcome
    }
    .boxed()
}

/// Log entry for the end of a started task, if it reached a terminal state
fn terminal_entry(task: &Task, outcome: &TaskOutcome) -> Option<ExecutionLogEntry> {
    match outcome {
        TaskOutcome::Completed(result) => {
            tracing::info!(task_id = %task.id, duration_ms = result.duration_ms, "Task completed");
            let mut entry =
                ExecutionLogEntry::new(&task.id, LogAction::Completed, task.completed_at());
            entry.result = Some(result.data.clone());
            Some(entry)
        }
        TaskOutcome::Failed(result) => {
            tracing::warn!(task_id = %task.id, error = ?result.error, "Task failed");
            let mut entry =
                ExecutionLogEntry::new(&task.id, LogAction::Failed, task.completed_at());
            entry.error = result.error.clone();
            Some(entry)
        }
        TaskOutcome::Cancelled => {
            tracing::info!(task_id = %task.id, "Task cancelled");
            Some(ExecutionLogEntry::new(
                &task.id,
                LogAction::Cancelled,
                task.completed_at(),
            ))
        }
        // No terminal transition happened, so there is nothing to log
        TaskOutcome::Skipped(status) => {
            tracing::error!(task_id = %task.id, %status, "Task left without a terminal transition");
            None
        }
    }
}

async fn run_simple(task: &mut Task, ctx: &RunContext) -> TaskOutcome {
    let request = WorkRequest::from(&*task);
    let work = AssertUnwindSafe(ctx.work.perform(request)).catch_unwind();

    let guarded = async {
        match ctx.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => joined,
                Err(_) => Ok(Err(WorkError::Timeout(limit))),
            },
            None => work.await,
        }
    };

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(WorkError::Cancelled),
        joined = guarded => joined.unwrap_or_else(|panic| Err(WorkError::Panicked(panic_message(panic)))),
    };

    match result {
        Ok(data) => {
            let result = TaskResult::success(data).with_duration(elapsed(task));
            complete_task(task, result)
        }
        Err(WorkError::Cancelled) => cancel_task(task, ctx),
        Err(e) => fail_task(task, e.to_string()),
    }
}

async fn run_composite(task: &mut Task, ctx: &RunContext) -> TaskOutcome {
    let mut completed: Vec<String> = Vec::new();
    let mut failure: Option<String> = None;
    let mut cancelled = false;

    for subtask in task.subtasks_mut().iter_mut() {
        // Left over from an earlier, partially reset run
        if subtask.status() == TaskStatus::Completed {
            completed.push(subtask.id.clone());
            continue;
        }

        if !subtask.is_ready(completed.as_slice()) {
            failure = Some(format!("Subtask {} dependencies not satisfied", subtask.id));
            break;
        }

        match run_task(subtask, ctx).await {
            TaskOutcome::Completed(_) => completed.push(subtask.id.clone()),
            TaskOutcome::Failed(result) => {
                failure = Some(format!(
                    "Subtask {} failed: {}",
                    subtask.id,
                    result.error.unwrap_or_default()
                ));
                break;
            }
            TaskOutcome::Cancelled => {
                cancelled = true;
                break;
            }
            TaskOutcome::Skipped(status) => {
                failure = Some(format!("Subtask {} is {}", subtask.id, status));
                break;
            }
        }
    }

    if cancelled {
        return cancel_task(task, ctx);
    }
    if let Some(message) = failure {
        return fail_task(task, message);
    }

    let result = TaskResult::success(json!({ "completed_subtasks": completed.len() }))
        .with_duration(elapsed(task));
    complete_task(task, result)
}

fn complete_task(task: &mut Task, result: TaskResult) -> TaskOutcome {
    match task.complete(result.clone()) {
        Ok(()) => TaskOutcome::Completed(result),
        Err(e) => {
            tracing::error!(error = %e, "Could not record task completion");
            TaskOutcome::Skipped(task.status())
        }
    }
}

fn fail_task(task: &mut Task, message: String) -> TaskOutcome {
    if let Err(e) = task.fail(message.clone()) {
        tracing::error!(error = %e, "Could not record task failure");
    }
    TaskOutcome::Failed(
        task.result()
            .cloned()
            .unwrap_or_else(|| TaskResult::failure(message)),
    )
}

/// Cancels a task that has not started yet or is still running. Only a
/// task that was never started gets its own log entry here; a started
/// task's terminal entry is written by `run_task`.
fn cancel_task(task: &mut Task, ctx: &RunContext) -> TaskOutcome {
    let started = task.started_at().is_some();
    if let Err(e) = task.cancel() {
        tracing::error!(error = %e, "Could not cancel task");
    }
    if !started {
        ctx.record(ExecutionLogEntry::new(
            &task.id,
            LogAction::Cancelled,
            task.completed_at(),
        ));
    }
    TaskOutcome::Cancelled
}

fn elapsed(task: &Task) -> Duration {
    task.started_at()
        .and_then(|started| (Utc::now() - started).to_std().ok())
        .unwrap_or_default()
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
