//! Scheduler configuration

use std::path::PathBuf;

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrent agent runs; 1 means sequential mode, where work
    /// happens directly on the active branch with no worktrees
    pub max_parallel: usize,

    /// Directory for per-item output logs
    pub log_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("beansd")
            .join("logs");

        Self {
            max_parallel: 1,
            log_dir,
        }
    }
}

impl SchedulerConfig {
    /// Whether runs get isolated worktrees
    pub fn parallel_mode(&self) -> bool {
        self.max_parallel > 1
    }
}
