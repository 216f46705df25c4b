use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use task_planner::config::Config;
use task_planner::persistence::{PlanFile, RunLogger, StateSnapshot, StateStore};
use task_planner::planning::{
    Decomposer, ExecutorOptions, SimulatedWork, Task, TaskExecutor, TaskPlanner,
    TemplateDecomposer, ToolWork, UnitOfWork,
};
use task_planner::tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "task-planner")]
#[command(about = "Plan and execute dependency-ordered task graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Stop at the first failed task
    #[arg(long)]
    until_failure: bool,
    /// Root tasks to run at once (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-task timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,
    /// Dispatch tasks with a `tool` metadata key to the built-in tools
    #[arg(long)]
    tools: bool,
    /// Where to write the state snapshot (default: state dir)
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file (.toml or .json)
    Run {
        plan: PathBuf,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Decompose a goal with the default template and execute it
    Goal {
        /// The goal to achieve
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Print the execution order of a plan file without running it
    Order { plan: PathBuf },
    /// Continue a saved run
    Resume {
        /// Snapshot to resume (default: state dir)
        state: Option<PathBuf>,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Configure task-planner
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
        /// Set the default concurrency
        #[arg(long)]
        concurrency: Option<usize>,
        /// Set the default per-task timeout in seconds (0 disables it)
        #[arg(long)]
        timeout: Option<u64>,
        /// Set the simulated work delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    let filter = config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "task_planner=info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { plan, args } => {
            let name = plan.display().to_string();
            let planner = PlanFile::load(&plan)?.into_planner();
            run_planner(planner, &name, &config, &args).await?;
        }
        Commands::Goal { goal, args } => {
            let goal = goal.join(" ");
            let task = TemplateDecomposer::new().decompose(&goal).await?;
            let planner = TaskPlanner::from_tasks(vec![task]);
            run_planner(planner, &goal, &config, &args).await?;
        }
        Commands::Order { plan } => {
            print_order(&PlanFile::load(&plan)?.into_planner());
        }
        Commands::Resume { state, args } => {
            resume(state, &config, &args).await?;
        }
        Commands::Config {
            show,
            concurrency,
            timeout,
            delay_ms,
        } => {
            handle_config(config, show, concurrency, timeout, delay_ms)?;
        }
    }

    Ok(())
}

fn build_work(config: &Config, use_tools: bool) -> Result<Arc<dyn UnitOfWork>> {
    let simulated: Arc<dyn UnitOfWork> = Arc::new(SimulatedWork::new(Duration::from_millis(
        config.simulation.work_delay_ms,
    )));
    if !use_tools {
        return Ok(simulated);
    }

    let working_dir = match &config.tools.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Could not determine working directory")?,
    };
    let registry = ToolRegistry::new(working_dir, config.tools.clone());
    Ok(Arc::new(ToolWork::new(Arc::new(registry)).with_fallback(simulated)))
}

fn executor_options(config: &Config, args: &RunArgs) -> ExecutorOptions {
    let mut options = ExecutorOptions::from(&config.executor);
    if let Some(concurrency) = args.concurrency {
        options.max_concurrency = concurrency.max(1);
    }
    if let Some(secs) = args.timeout {
        options.task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    options
}

fn state_store(config: &Config, state: &Option<PathBuf>) -> Result<StateStore> {
    match state {
        Some(path) => Ok(StateStore::new(path.clone())),
        None => Ok(StateStore::in_dir(&config.state_dir()?)),
    }
}

async fn run_planner(
    planner: TaskPlanner,
    name: &str,
    config: &Config,
    args: &RunArgs,
) -> Result<()> {
    let work = build_work(config, args.tools)?;
    let executor = TaskExecutor::new(planner, work).with_options(executor_options(config, args));
    execute(executor, name, config, args).await
}

async fn resume(state: Option<PathBuf>, config: &Config, args: &RunArgs) -> Result<()> {
    let store = state_store(config, &state)?;
    let mut snapshot = store.load()?;
    let requeued = snapshot.requeue_cancelled();
    if !requeued.is_empty() {
        println!("Requeued cancelled tasks: {}", requeued.join(", "));
    }

    let work = build_work(config, args.tools)?;
    let executor = snapshot
        .into_executor(work)
        .with_options(executor_options(config, args));

    // Save back to the file we resumed from unless told otherwise
    let args = RunArgs {
        until_failure: args.until_failure,
        concurrency: args.concurrency,
        timeout: args.timeout,
        tools: args.tools,
        state: Some(args.state.clone().unwrap_or_else(|| store.path().to_path_buf())),
    };
    let name = store.path().display().to_string();
    execute(executor, &name, config, &args).await
}

async fn execute(
    mut executor: TaskExecutor,
    name: &str,
    config: &Config,
    args: &RunArgs,
) -> Result<()> {
    let state_dir = config.state_dir()?;

    let log_task = if config.persistence.run_log {
        let mut logger = RunLogger::create(&state_dir, name)?;
        logger.log_run_started(executor.planner().len(), executor.planner().get_execution_order())?;
        println!("Run log: {}", logger.log_path().display());

        let (tx, mut rx) = mpsc::unbounded_channel();
        executor = executor.with_observer(tx);
        Some(tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = logger.log_entry(entry) {
                    tracing::warn!(error = %e, "Failed to write run log entry");
                }
            }
            logger
        }))
    } else {
        None
    };

    let token = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling run");
            token.cancel();
        }
    });

    let report = if args.until_failure || config.executor.stop_on_failure {
        executor.execute_until_failure().await
    } else {
        executor.execute_all_tasks().await
    };

    print_tasks(executor.planner());
    let summary = executor.get_execution_summary();
    println!(
        "\n{} completed, {} failed, {} cancelled of {} ({:.0}% success)",
        summary.completed_tasks,
        summary.failed_tasks,
        summary.cancelled_tasks,
        summary.total_tasks,
        summary.success_rate * 100.0
    );

    let store = state_store(config, &args.state)?;
    store.save(&StateSnapshot::capture(&executor))?;
    println!("State saved to {}", store.path().display());

    // Dropping the executor closes the observer channel
    drop(executor);
    if let Some(handle) = log_task {
        let mut logger = handle.await.context("Run log writer stopped unexpectedly")?;
        logger.log_run_finished(&report)?;
    }

    Ok(())
}

fn print_order(planner: &TaskPlanner) {
    println!("Execution order:");
    for (i, id) in planner.get_execution_order().iter().enumerate() {
        let title = planner.get_task(id).map(|t| t.title.as_str()).unwrap_or("");
        println!("  {}. {} {}", i + 1, id, title);
    }

    let unresolved = planner.unresolved_tasks();
    if !unresolved.is_empty() {
        println!(
            "\nUnresolved (circular or missing dependencies): {}",
            unresolved.join(", ")
        );
    }
}

fn print_tasks(planner: &TaskPlanner) {
    for id in planner.get_execution_order() {
        if let Some(task) = planner.get_task(&id) {
            print_task(task, 0);
        }
    }
}

fn print_task(task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    let error = task
        .result()
        .and_then(|r| r.error.as_deref())
        .map(|e| format!(" ({})", e))
        .unwrap_or_default();
    println!("{}{} {} {}{}", indent, task.status().icon(), task.id, task.title, error);
    for subtask in task.subtasks() {
        print_task(subtask, depth + 1);
    }
}

fn handle_config(
    mut config: Config,
    show: bool,
    concurrency: Option<usize>,
    timeout: Option<u64>,
    delay_ms: Option<u64>,
) -> Result<()> {
    let changed = concurrency.is_some() || timeout.is_some() || delay_ms.is_some();

    if let Some(concurrency) = concurrency {
        config.executor.max_concurrency = concurrency.max(1);
    }
    if let Some(secs) = timeout {
        config.executor.task_timeout_secs = secs;
    }
    if let Some(delay) = delay_ms {
        config.simulation.work_delay_ms = delay;
    }

    if changed {
        config.save()?;
        println!("Configuration saved to {}", Config::config_path()?.display());
    }

    if show || !changed {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
