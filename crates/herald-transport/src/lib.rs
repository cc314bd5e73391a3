//! Transport adapter: one Socket.IO connection over WebSocket, automatic
//! reconnection, and listener registration with explicit unsubscribe handles.

pub mod config;
pub mod listeners;
pub mod packet;
pub mod socket;
pub mod transport;

pub mod mock;

pub use config::TransportConfig;
pub use listeners::{Listener, ListenerSet, Subscription};
pub use mock::MockTransport;
pub use socket::SocketTransport;
pub use transport::{Transport, TransportEvent};
