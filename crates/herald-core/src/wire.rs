//! Event names and payloads exchanged over the real-time channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolPayloadError;
use crate::ids::SessionId;
use crate::messages::Reference;

/// Outbound: join the room of a session. Payload is the bare session id.
pub const JOIN_SESSION: &str = "join-session";
/// Outbound: user message, payload [`SendMessagePayload`].
pub const SEND_MESSAGE: &str = "send-message";
/// Inbound: assistant reply, payload [`BotReply`].
pub const BOT_RESPONSE: &str = "bot-response";
/// Inbound: typing presence, payload is a bool.
pub const BOT_TYPING: &str = "bot-typing";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub session_id: SessionId,
    pub message: String,
}

/// `bot-response` payload.
///
/// `error` is loosely typed on the wire (usually a string); use
/// [`BotReply::failure`] to read it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_articles: Option<Vec<Reference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl BotReply {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(Value::String(error.into())),
            ..Default::default()
        }
    }

    pub fn with_articles(mut self, articles: Vec<Reference>) -> Self {
        self.relevant_articles = Some(articles);
        self
    }

    /// The server-side failure carried by this reply, if any.
    pub fn failure(&self) -> Option<ProtocolPayloadError> {
        match self.error.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(ProtocolPayloadError(s.clone())),
            Value::Object(map) => {
                let text = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| Value::Object(map.clone()).to_string());
                Some(ProtocolPayloadError(text))
            }
            other => Some(ProtocolPayloadError(other.to_string())),
        }
    }

    pub fn references(&self) -> Vec<Reference> {
        self.relevant_articles.clone().unwrap_or_default()
    }
}
