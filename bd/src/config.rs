//! beansd configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backlog::client::BacklogConfig;
use crate::completion::CompletionConfig;
use crate::git::GitConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::runner::RunnerConfig;
use crate::scheduler::SchedulerConfig;
use crate::watcher::WatcherConfig;

/// Main beansd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backlog store access
    pub backlog: BacklogSettings,

    /// Agent command
    pub agent: AgentSettings,

    /// Concurrency limits
    pub concurrency: ConcurrencySettings,

    /// Git repository and branch layout
    pub git: GitSettings,

    /// Backlog change detection
    pub watcher: WatcherSettings,

    /// Crash/blocked item filing
    pub completion: CompletionSettings,

    /// Output log storage
    pub logs: LogsSettings,

    /// Daemon loop tuning
    pub daemon: DaemonSettings,
}

impl Config {
    /// Validate configuration before use; fail fast with clear messages
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(eyre::eyre!("agent.command must not be empty"));
        }
        if self.concurrency.max_parallel == 0 {
            return Err(eyre::eyre!("concurrency.max-parallel must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".beansd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("beansd").join("beansd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    // === Component config derivation ===

    pub fn backlog_config(&self) -> BacklogConfig {
        BacklogConfig {
            command: self.backlog.command.clone(),
            store_dir: self.backlog.store_dir.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_parallel: self.concurrency.max_parallel,
            log_dir: self.logs.dir.clone(),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            store_dir: self.backlog.store_dir.clone(),
            poll_interval_ms: self.watcher.poll_interval_ms,
            max_consecutive_failures: self.watcher.max_consecutive_failures,
            backoff_base_ms: self.watcher.backoff_base_ms,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            grace_period_ms: self.agent.grace_period_ms,
            repo_root: self.git.repo_root.clone(),
        }
    }

    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            errors_container_title: self.completion.errors_container.clone(),
            crash_tail_lines: self.completion.crash_tail_lines,
            log_dir: self.logs.dir.clone(),
        }
    }

    pub fn git_config(&self) -> GitConfig {
        GitConfig {
            repo_root: self.git.repo_root.clone(),
            worktree_dir: self.git.worktree_dir.clone(),
            branch_prefix: self.git.branch_prefix.clone(),
            trunk_branch: self.git.trunk_branch.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            reevaluate_interval_secs: self.daemon.reevaluate_interval_secs,
        }
    }
}

/// Backlog store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogSettings {
    /// Store binary name or path
    pub command: String,

    /// Store data directory
    #[serde(rename = "store-dir")]
    pub store_dir: PathBuf,
}

impl Default for BacklogSettings {
    fn default() -> Self {
        Self {
            command: "beans".to_string(),
            store_dir: PathBuf::from(".beans"),
        }
    }
}

/// Agent command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Command to run per item
    pub command: String,

    /// Arguments; `{id}`, `{branch}`, `{worktree}` are substituted
    pub args: Vec<String>,

    /// Grace period between terminate and kill, in milliseconds
    #[serde(rename = "grace-period-ms")]
    pub grace_period_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            grace_period_ms: 5_000,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    /// Maximum concurrent agent runs
    #[serde(rename = "max-parallel")]
    pub max_parallel: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

/// Git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Path to the managed repository
    #[serde(rename = "repo-root")]
    pub repo_root: PathBuf,

    /// Trunk branch name
    #[serde(rename = "trunk-branch")]
    pub trunk_branch: String,

    /// Directory for per-item worktrees
    #[serde(rename = "worktree-dir")]
    pub worktree_dir: PathBuf,

    /// Item branch prefix
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            trunk_branch: "main".to_string(),
            worktree_dir: PathBuf::from("/tmp/beansd/worktrees"),
            branch_prefix: "beans".to_string(),
        }
    }
}

/// Watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "max-consecutive-failures")]
    pub max_consecutive_failures: u32,

    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        let defaults = WatcherConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval_ms,
            max_consecutive_failures: defaults.max_consecutive_failures,
            backoff_base_ms: defaults.backoff_base_ms,
        }
    }
}

/// Completion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Title of the container auxiliary items are filed under
    #[serde(rename = "errors-container")]
    pub errors_container: String,

    /// Trailing output lines carried into crash/blocked items
    #[serde(rename = "crash-tail-lines")]
    pub crash_tail_lines: usize,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            errors_container: "Errors".to_string(),
            crash_tail_lines: 40,
        }
    }
}

/// Log storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsSettings {
    /// Per-item output log directory
    pub dir: PathBuf,
}

impl Default for LogsSettings {
    fn default() -> Self {
        Self {
            dir: SchedulerConfig::default().log_dir,
        }
    }
}

/// Daemon loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Periodic re-evaluation interval, in seconds
    #[serde(rename = "reevaluate-interval-secs")]
    pub reevaluate_interval_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            reevaluate_interval_secs: 10,
        }
    }
}
