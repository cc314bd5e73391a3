//! Protocol client and session coordinator.
//!
//! [`SessionCoordinator::spawn`] starts the actor that owns the session and
//! returns a [`SessionHandle`] for sending, resetting and observing it.

pub mod coordinator;
pub mod protocol;
pub mod state;

pub use coordinator::{CoordinatorConfig, SessionCoordinator, SessionHandle};
pub use protocol::ProtocolClient;
pub use state::{Effect, SessionState};
