//! Watcher configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the backlog watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Store directory watched for file-level change
    pub store_dir: PathBuf,

    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Consecutive store failures before signalling degraded mode
    pub max_consecutive_failures: u32,

    /// Base backoff after a store failure, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".beans"),
            poll_interval_ms: 2_000,
            max_consecutive_failures: 5,
            backoff_base_ms: 500,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Exponential backoff for the nth consecutive failure, capped at 30s
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(30_000))
    }
}
