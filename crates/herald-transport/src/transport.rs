use serde_json::Value;

use herald_core::TransportError;

use crate::listeners::{Listener, Subscription};

/// Lifecycle and message events of the real-time channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The connection (re)opened and the Socket.IO handshake completed.
    Open,
    /// An open connection ended. Reasons follow Socket.IO naming
    /// (`"transport close"`, `"ping timeout"`, `"io server disconnect"`, ...).
    Close { reason: String },
    /// A connect attempt failed, or the adapter gave up retrying.
    Error { error: TransportError },
    /// A named server event with its first argument.
    Message { event: String, payload: Value },
}

/// One persistent bidirectional connection to the backend.
///
/// Implementations reconnect on their own after unexpected loss. Listeners
/// registered with [`Transport::listen`] see every event until their
/// subscription is dropped.
pub trait Transport: Send + Sync {
    /// Start connecting. Replaces any existing connection.
    fn connect(&self);

    /// Close the connection and stop reconnecting. Idempotent.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Send a named event. Fails with [`TransportError::NotConnected`] when
    /// no connection is open; nothing is buffered.
    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    fn listen(&self, listener: Listener<TransportEvent>) -> Subscription;
}
