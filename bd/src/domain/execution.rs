//! Execution context and run result types
//!
//! An `ExecutionContext` is created by the scheduler at dispatch time, owned
//! by the runner for the process lifetime, and consumed by the completion
//! handler. A `RunResult` is produced exactly once per dispatched item.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sentinel exit code for a process that could not be spawned
pub const EXIT_SPAWN_FAILED: i32 = -1;

/// Sentinel exit code for a cancelled run
pub const EXIT_CANCELLED: i32 = -2;

/// Everything a runner needs to execute one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Item being executed
    pub item_id: String,

    /// Branch the agent works on
    pub branch: String,

    /// Branch this item's branch merges back into (parent's branch, or trunk)
    pub base_branch: String,

    /// Isolated working directory; `None` in sequential mode, where work
    /// happens directly on the active branch in the repo root
    pub worktree: Option<PathBuf>,

    /// Append-only output log for this item
    pub log_path: PathBuf,
}

impl ExecutionContext {
    /// Whether this run has its own worktree (parallel mode)
    pub fn is_isolated(&self) -> bool {
        self.worktree.is_some()
    }
}

/// Terminal outcome of one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Item the run was for
    pub item_id: String,

    /// Process exit code, or a sentinel for spawn failure / cancellation
    pub exit_code: i32,

    /// True when the run was cancelled rather than exiting on its own
    pub cancelled: bool,

    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl RunResult {
    /// Normal, successful completion
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.exit_code == 0
    }

    /// Crash: the process exited non-zero (or never spawned) without
    /// being cancelled
    pub fn is_crash(&self) -> bool {
        !self.cancelled && self.exit_code != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, cancelled: bool) -> RunResult {
        RunResult {
            item_id: "i-1".to_string(),
            exit_code,
            cancelled,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_success_classification() {
        assert!(result(0, false).is_success());
        assert!(!result(0, false).is_crash());
    }

    #[test]
    fn test_crash_classification() {
        assert!(result(1, false).is_crash());
        assert!(result(EXIT_SPAWN_FAILED, false).is_crash());
        assert!(!result(1, false).is_success());
    }

    #[test]
    fn test_cancelled_is_neither_success_nor_crash() {
        let cancelled = result(EXIT_CANCELLED, true);
        assert!(!cancelled.is_success());
        assert!(!cancelled.is_crash());
    }

    #[test]
    fn test_context_isolation() {
        let mut ctx = ExecutionContext {
            item_id: "i-1".to_string(),
            branch: "beans/i-1".to_string(),
            base_branch: "main".to_string(),
            worktree: None,
            log_path: PathBuf::from("/tmp/i-1.log"),
        };
        assert!(!ctx.is_isolated());

        ctx.worktree = Some(PathBuf::from("/tmp/worktrees/i-1"));
        assert!(ctx.is_isolated());
    }
}
