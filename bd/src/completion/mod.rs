//! Run-result reconciliation into backlog state and git history

pub mod commit;
pub mod handler;

pub use commit::build_commit_message;
pub use handler::{CompletionConfig, CompletionHandler, CompletionOutcome};
