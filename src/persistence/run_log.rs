//! Append-only JSONL run log
//!
//! One file per run: a header line, then one event per line, flushed as it
//! is written so a crashed run still leaves a readable trail.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::planning::{ExecutionLogEntry, RunReport};

/// Events written after the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunLogEvent {
    RunStarted {
        timestamp: DateTime<Utc>,
        tasks: usize,
        execution_order: Vec<String>,
    },
    /// A task lifecycle transition, as recorded by the executor
    Task(ExecutionLogEntry),
    RunFinished {
        timestamp: DateTime<Utc>,
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
    Error {
        timestamp: DateTime<Utc>,
        error: String,
        context: Option<String>,
    },
}

/// First line of every run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogHeader {
    pub version: String,
    pub run_id: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

pub struct RunLogger {
    run_id: String,
    log_path: PathBuf,
    file: File,
}

impl RunLogger {
    /// Start a new log under `dir/runs/YYYY/MM/DD/`
    pub fn create(dir: &Path, plan: &str) -> Result<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let log_path = dir
            .join("runs")
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string())
            .join(format!("run-{}.jsonl", run_id));

        Self::open(log_path, run_id, plan)
    }

    /// Open `log_path` for appending, writing the header if the file is new
    pub fn open(log_path: PathBuf, run_id: String, plan: &str) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context("Failed to open run log file")?;

        let mut logger = Self {
            run_id,
            log_path,
            file,
        };

        if fs::metadata(&logger.log_path)?.len() == 0 {
            let header = RunLogHeader {
                version: "1.0".to_string(),
                run_id: logger.run_id.clone(),
                plan: plan.to_string(),
                created_at: Utc::now(),
            };
            logger.write_line(&serde_json::to_string(&header)?)?;
        }

        tracing::debug!(path = %logger.log_path.display(), "Opened run log");
        Ok(logger)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn log(&mut self, event: RunLogEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        self.write_line(&json)
    }

    pub fn log_entry(&mut self, entry: ExecutionLogEntry) -> Result<()> {
        self.log(RunLogEvent::Task(entry))
    }

    pub fn log_run_started(&mut self, tasks: usize, execution_order: Vec<String>) -> Result<()> {
        self.log(RunLogEvent::RunStarted {
            timestamp: Utc::now(),
            tasks,
            execution_order,
        })
    }

    pub fn log_run_finished(&mut self, report: &RunReport) -> Result<()> {
        self.log(RunLogEvent::RunFinished {
            timestamp: Utc::now(),
            completed: report.completed_tasks.len(),
            failed: report.failed_tasks.len(),
            cancelled: report.cancelled_tasks.len(),
        })
    }

    pub fn log_error(&mut self, error: &str, context: Option<&str>) -> Result<()> {
        self.log(RunLogEvent::Error {
            timestamp: Utc::now(),
            error: error.to_string(),
            context: context.map(|s| s.to_string()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn read_header(path: &Path) -> Result<RunLogHeader> {
        let file = File::open(path)
            .with_context(|| format!("Run log not found: {}", path.display()))?;
        let first_line = BufReader::new(file)
            .lines()
            .next()
            .context("Run log is empty")??;
        serde_json::from_str(&first_line).context("Invalid run log header")
    }

    /// Every event in the log, skipping lines that do not parse
    pub fn read_events(path: &Path) -> Result<Vec<RunLogEvent>> {
        let file = File::open(path)
            .with_context(|| format!("Run log not found: {}", path.display()))?;

        let mut events = Vec::new();
        // Skip header
        for line in BufReader::new(file).lines().skip(1) {
            let line = line?;
            match serde_json::from_str::<RunLogEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable run log line"),
            }
        }

        Ok(events)
    }

    /// Task transitions only, in the order they were written
    pub fn read_entries(path: &Path) -> Result<Vec<ExecutionLogEntry>> {
        Ok(Self::read_events(path)?
            .into_iter()
            .filter_map(|event| match event {
                RunLogEvent::Task(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }
}
