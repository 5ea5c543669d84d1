//! Lifecycle notification types published by the daemon

use crate::domain::StuckKind;

/// Daemon lifecycle notification, delivered to presentation layers
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Item dispatched: context assigned, about to start
    ItemReady { item_id: String, branch: String },

    /// Agent process started
    ItemStarted { item_id: String },

    /// One line of agent output
    ItemOutput {
        item_id: String,
        line: String,
        is_stderr: bool,
    },

    /// Item finished successfully and was reconciled
    ItemCompleted { item_id: String },

    /// Item is stuck (crashed or blocked) and tagged for the operator
    ItemStuck { item_id: String, kind: StuckKind },

    /// Non-fatal daemon error worth surfacing
    Error { context: String, message: String },
}

impl DaemonEvent {
    /// Item this event concerns, when it concerns one
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ItemReady { item_id, .. }
            | Self::ItemStarted { item_id }
            | Self::ItemOutput { item_id, .. }
            | Self::ItemCompleted { item_id }
            | Self::ItemStuck { item_id, .. } => Some(item_id),
            Self::Error { .. } => None,
        }
    }

    /// Short event name for display and logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemReady { .. } => "item-ready",
            Self::ItemStarted { .. } => "item-started",
            Self::ItemOutput { .. } => "item-output",
            Self::ItemCompleted { .. } => "item-completed",
            Self::ItemStuck { .. } => "item-stuck",
            Self::Error { .. } => "error",
        }
    }
}
