//! Daemon event stream

pub mod bus;
pub mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::DaemonEvent;
