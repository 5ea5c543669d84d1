//! Control requests for the orchestrator task

use tokio::sync::oneshot;

use crate::domain::{ExecutionContext, Item};

/// Requests sent to the orchestrator control loop
#[derive(Debug)]
pub enum ControlRequest {
    /// Cancel one in-flight item; replies whether anything was cancelled
    Cancel {
        item_id: String,
        reply: oneshot::Sender<bool>,
    },

    /// Ordered view of the todo queue
    GetQueue { reply: oneshot::Sender<Vec<Item>> },

    /// Copies of every in-flight execution context
    GetInFlight {
        reply: oneshot::Sender<Vec<ExecutionContext>>,
    },

    /// Items currently stuck (in-progress with a stuck tag)
    GetStuck { reply: oneshot::Sender<Vec<Item>> },

    /// Graceful shutdown; replies once in-flight runs have drained
    Stop { reply: oneshot::Sender<()> },
}
