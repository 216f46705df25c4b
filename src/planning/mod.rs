pub mod decompose;
pub mod executor;
pub mod planner;
pub mod types;
pub mod work;

pub use decompose::{Decomposer, TemplateDecomposer};
pub use executor::{
    ExecutionLogEntry, ExecutionSummary, ExecutorOptions, LogAction, RunReport, TaskExecutor,
    TaskOutcome,
};
pub use planner::{TaskPlanner, TaskSummary};
pub use types::{Task, TaskError, TaskResult, TaskStatus, MAX_PRIORITY, MIN_PRIORITY};
pub use work::{FnWork, SimulatedWork, ToolWork, UnitOfWork, WorkError, WorkRequest};
