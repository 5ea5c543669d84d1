//! Backlog change detection and the in-memory mirror

pub mod backlog_watcher;
pub mod config;

pub use backlog_watcher::{BacklogWatcher, ChangeEvent, WatcherHandle};
pub use config::WatcherConfig;
