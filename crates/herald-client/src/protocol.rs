//! Typed wrapper around the transport's named events.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use herald_core::wire::{BOT_RESPONSE, BOT_TYPING, JOIN_SESSION, SEND_MESSAGE};
use herald_core::{BotReply, SendMessagePayload, SessionId};
use herald_transport::{Subscription, Transport, TransportEvent};

/// Translates session intents into wire events and inbound wire events into
/// typed callbacks. Holds no session state.
///
/// Outbound calls are dropped with a warning when the transport is down;
/// nothing is queued.
#[derive(Clone)]
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Join the room of `id`. Returns whether the event went out.
    pub fn join_session(&self, id: &SessionId) -> bool {
        self.emit(JOIN_SESSION, Value::String(id.to_string()), id)
    }

    /// Send a user message for `id`. Returns whether the event went out.
    pub fn send_message(&self, id: &SessionId, text: &str) -> bool {
        let payload = SendMessagePayload {
            session_id: id.clone(),
            message: text.to_string(),
        };
        match serde_json::to_value(&payload) {
            Ok(payload) => self.emit(SEND_MESSAGE, payload, id),
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to encode message");
                false
            }
        }
    }

    fn emit(&self, event: &str, payload: Value, id: &SessionId) -> bool {
        if !self.transport.is_connected() {
            warn!(event, session_id = %id, "socket not connected, dropping event");
            return false;
        }
        match self.transport.emit(event, payload) {
            Ok(()) => {
                debug!(event, session_id = %id, "event sent");
                true
            }
            Err(e) => {
                warn!(event, session_id = %id, error = %e, "event not sent");
                false
            }
        }
    }

    /// Deliver every well-formed `bot-response` to `handler`.
    pub fn on_bot_reply<F>(&self, handler: F) -> Subscription
    where
        F: Fn(BotReply) + Send + Sync + 'static,
    {
        self.transport.listen(Arc::new(move |event: &TransportEvent| {
            let Some(payload) = named_payload(event, BOT_RESPONSE) else {
                return;
            };
            match serde_json::from_value::<BotReply>(payload.clone()) {
                Ok(reply) => handler(reply),
                Err(e) => warn!(error = %e, "dropping malformed bot-response"),
            }
        }))
    }

    /// Deliver every `bot-typing` signal to `handler`.
    pub fn on_typing<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.transport.listen(Arc::new(move |event: &TransportEvent| {
            let Some(payload) = named_payload(event, BOT_TYPING) else {
                return;
            };
            match payload.as_bool() {
                Some(typing) => handler(typing),
                None => warn!(payload = %payload, "dropping malformed bot-typing"),
            }
        }))
    }
}

fn named_payload<'a>(event: &'a TransportEvent, name: &str) -> Option<&'a Value> {
    match event {
        TransportEvent::Message { event, payload } if event == name => Some(payload),
        _ => None,
    }
}
