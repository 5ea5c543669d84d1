//! Agent runner configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for spawning agent processes
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Agent command to execute
    pub command: String,

    /// Arguments; `{id}`, `{branch}`, and `{worktree}` are substituted
    /// from the execution context
    pub args: Vec<String>,

    /// How long to wait between the graceful terminate signal and the
    /// forced kill, in milliseconds
    pub grace_period_ms: u64,

    /// Working directory when the run has no worktree (sequential mode)
    pub repo_root: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            grace_period_ms: 5_000,
            repo_root: PathBuf::from("."),
        }
    }
}

impl RunnerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
