//! In-memory [`Transport`] for tests. The test drives the connection
//! lifecycle by hand and inspects what was emitted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use herald_core::TransportError;

use crate::listeners::{Listener, ListenerSet, Subscription};
use crate::transport::{Transport, TransportEvent};

#[derive(Default)]
pub struct MockTransport {
    listeners: ListenerSet<TransportEvent>,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    emitted: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a completed handshake.
    pub fn open(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.dispatch(&TransportEvent::Open);
    }

    /// Simulate loss of an open connection.
    pub fn close(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners.dispatch(&TransportEvent::Close {
            reason: reason.to_string(),
        });
    }

    /// Simulate a failed connect attempt (or exhausted retries).
    pub fn fail(&self, error: TransportError) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners.dispatch(&TransportEvent::Error { error });
    }

    /// Deliver a server event.
    pub fn inject(&self, event: &str, payload: Value) {
        self.listeners.dispatch(&TransportEvent::Message {
            event: event.to_string(),
            payload,
        });
    }

    /// Every successful emit, in order.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    /// Payloads emitted under `event`.
    pub fn emitted_named(&self, event: &str) -> Vec<Value> {
        self.emitted
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Transport for MockTransport {
    fn connect(&self) {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        let _ = self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners.dispatch(&TransportEvent::Close {
                reason: "io client disconnect".to_string(),
            });
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn listen(&self, listener: Listener<TransportEvent>) -> Subscription {
        self.listeners.add(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn emit_requires_open_connection() {
        let transport = MockTransport::new();
        assert_eq!(
            transport.emit("join-session", json!("s1")),
            Err(TransportError::NotConnected)
        );
        transport.open();
        transport.emit("join-session", json!("s1")).unwrap();
        assert_eq!(transport.emitted_named("join-session"), vec![json!("s1")]);
    }

    #[test]
    fn lifecycle_events_reach_listeners() {
        let transport = MockTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = transport.listen(Arc::new(move |e: &TransportEvent| sink.lock().push(e.clone())));

        transport.open();
        transport.inject("bot-typing", json!(true));
        transport.disconnect();
        transport.disconnect();
        sub.unsubscribe();
        transport.open();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], TransportEvent::Open);
        assert!(matches!(&seen[1], TransportEvent::Message { event, .. } if event == "bot-typing"));
        assert_eq!(
            seen[2],
            TransportEvent::Close {
                reason: "io client disconnect".into()
            }
        );
        assert_eq!(transport.disconnect_count(), 2);
        assert_eq!(transport.listener_count(), 0);
    }
}
