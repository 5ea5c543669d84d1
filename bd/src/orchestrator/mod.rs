//! Daemon control loop and public control surface

pub mod core;
pub mod handle;
pub mod messages;

pub use core::{Orchestrator, OrchestratorConfig};
pub use handle::DaemonHandle;
pub use messages::ControlRequest;
