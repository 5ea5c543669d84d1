//! Event bus for daemon lifecycle notifications
//!
//! Built on tokio broadcast channels: `subscribe()` hands back a receiver
//! that is itself the subscription handle, so dropping it unsubscribes.
//! There is no listener registration without a matching way to let go.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::DaemonEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Central bus for daemon activity streaming
pub struct EventBus {
    tx: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a
    /// full channel drops the oldest events first.
    pub fn emit(&self, event: DaemonEvent) {
        debug!(kind = event.kind(), item_id = ?event.item_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.tx.subscribe()
    }

    /// Create an emitter bound to one item
    pub fn emitter_for(&self, item_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            item_id: item_id.into(),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Cheap-to-clone handle for emitting events about a single item
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<DaemonEvent>,
    item_id: String,
}

impl EventEmitter {
    /// Item this emitter is bound to
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: DaemonEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit one line of agent output
    pub fn output(&self, line: &str, is_stderr: bool) {
        self.emit(DaemonEvent::ItemOutput {
            item_id: self.item_id.clone(),
            line: line.to_string(),
            is_stderr,
        });
    }

    /// Emit an item-started event
    pub fn started(&self) {
        self.emit(DaemonEvent::ItemStarted {
            item_id: self.item_id.clone(),
        });
    }
}

/// Create a shared bus
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::default())
}
