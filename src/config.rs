use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "TASK_PLANNER_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tools: ToolConfig,
}

/// How runs are executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-task timeout in seconds, 0 disables it (default: 300)
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Root tasks executed at once (default: 1, sequential)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Stop the run at the first failed task (default: false)
    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_task_timeout() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    1
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout(),
            max_concurrency: default_max_concurrency(),
            stop_on_failure: false,
        }
    }
}

/// Settings for the simulated unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_work_delay")]
    pub work_delay_ms: u64,
}

fn default_work_delay() -> u64 {
    1000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            work_delay_ms: default_work_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Where snapshots and run logs go (default: platform data dir)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Write a JSONL run log next to the snapshot (default: true)
    #[serde(default = "default_true")]
    pub run_log: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            run_log: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "task_planner=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Limits for the built-in tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Maximum output size in bytes before truncation (default: 1MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Directory tool paths are resolved against (default: current dir)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_max_output_bytes() -> usize {
    1_048_576 // 1MB
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: default_max_output_bytes(),
            working_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("task-planner").join("config.toml"))
    }

    /// Directory for snapshots and run logs
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.persistence.state_dir {
            return Ok(dir.clone());
        }

        let data_dir = dirs::data_dir().context("Could not determine data directory")?;
        Ok(data_dir.join("task-planner"))
    }
}
