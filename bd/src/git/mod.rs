//! Git branch, worktree, and merge operations

pub mod manager;
pub mod merge;

pub use manager::{GitConfig, GitError, GitManager, WorkspaceInfo};
pub use merge::MergeOutcome;
