//! Cloneable handle to a running daemon

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::domain::{ExecutionContext, Item};
use crate::events::{DaemonEvent, EventBus};

use super::messages::ControlRequest;

/// Control surface exposed to the CLI and other presentation layers
#[derive(Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<ControlRequest>,
    bus: Arc<EventBus>,
}

impl DaemonHandle {
    pub(crate) fn new(tx: mpsc::Sender<ControlRequest>, bus: Arc<EventBus>) -> Self {
        Self { tx, bus }
    }

    /// Subscribe to the daemon's lifecycle event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.bus.subscribe()
    }

    /// Cancel an in-flight item; false when it was not running
    pub async fn cancel(&self, item_id: &str) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControlRequest::Cancel {
            item_id: item_id.to_string(),
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| eyre!("daemon control channel closed"))
    }

    /// Ordered todo queue
    pub async fn queue(&self) -> Result<Vec<Item>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControlRequest::GetQueue { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| eyre!("daemon control channel closed"))
    }

    /// Everything currently in flight
    pub async fn in_flight(&self) -> Result<Vec<ExecutionContext>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControlRequest::GetInFlight { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| eyre!("daemon control channel closed"))
    }

    /// Stuck items awaiting an operator
    pub async fn stuck(&self) -> Result<Vec<Item>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControlRequest::GetStuck { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| eyre!("daemon control channel closed"))
    }

    /// Graceful shutdown: cancels in-flight runs cleanly, resolves once
    /// they have drained
    pub async fn stop(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControlRequest::Stop { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| eyre!("daemon control channel closed"))
    }

    async fn send(&self, req: ControlRequest) -> Result<()> {
        self.tx
            .send(req)
            .await
            .map_err(|_| eyre!("daemon control channel closed"))
    }
}
