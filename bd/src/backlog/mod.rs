//! Backlog store client
//!
//! The backlog itself is an external, command-line-driven store. The daemon
//! consumes it through the [`BacklogApi`] trait so the orchestration core
//! never knows how items are persisted.

pub mod client;
pub mod types;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;

use crate::domain::{Item, Status};

pub use client::CliBacklog;
pub use types::{CreateItem, ListFilter};

/// Errors from the backlog store boundary
///
/// Not-found on read paths is an expected outcome (`Ok(None)`), never an
/// error; these variants cover genuine infrastructure problems only.
#[derive(Debug, thiserror::Error)]
pub enum BacklogError {
    /// Store binary missing, not executable, or IO failed mid-call
    #[error("backlog store unreachable: {0}")]
    Unreachable(String),

    /// Response did not parse, or a caller passed a malformed id
    #[error("malformed backlog data: {0}")]
    Malformed(String),

    /// The store command itself reported a failure
    #[error("backlog command failed: {0}")]
    Store(String),
}

/// Typed request/response facade over the backlog store
#[async_trait]
pub trait BacklogApi: Send + Sync {
    /// List items matching the filter; an empty match is an empty vec
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Item>, BacklogError>;

    /// Fetch one item; `None` when it does not exist
    async fn get(&self, id: &str) -> Result<Option<Item>, BacklogError>;

    /// Set an item's status
    async fn update_status(&self, id: &str, status: Status) -> Result<Item, BacklogError>;

    /// Add and remove tags in one call
    async fn update_tags(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<Item, BacklogError>;

    /// Create a new item
    async fn create(&self, input: CreateItem) -> Result<Item, BacklogError>;

    /// Re-parent an item
    async fn set_parent(&self, id: &str, parent_id: &str) -> Result<Item, BacklogError>;

    /// Add a blocking dependency to an item
    async fn add_blocking(&self, id: &str, blocking_id: &str) -> Result<Item, BacklogError>;
}
