//! Settings types. Every struct deserializes with defaults for missing keys,
//! so a partial settings file is always valid.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    pub backend: BackendSettings,
    pub transport: TransportSettings,
    pub chat: ChatSettings,
    pub logging: LoggingSettings,
}

/// Where the assistant backend lives and how the HTTP channel behaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Base address shared by the HTTP and real-time channels.
    pub url: String,
    /// Path prefix of the session endpoints (`{prefix}/session/new`).
    pub api_prefix: String,
    /// Per-request timeout for session calls, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_string(),
            api_prefix: "/api".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Real-time connection and retry behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Path of the Socket.IO endpoint on the backend.
    pub socket_path: String,
    /// Reconnection attempts after the first failure before giving up.
    pub reconnection_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub reconnection_delay_ms: u64,
    /// Timeout for a single connect + handshake, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            socket_path: "/socket.io/".to_string(),
            reconnection_attempts: 5,
            reconnection_delay_ms: 1_000,
            connect_timeout_ms: 20_000,
        }
    }
}

/// Synthetic messages the coordinator appends to the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub welcome_message: String,
    pub reset_message: String,
    pub init_failure_message: String,
    pub reset_failure_message: String,
    /// Shown when an accepted message could not be handed to the transport.
    pub send_failure_message: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            welcome_message:
                "👋 Hello! I'm your news assistant. Ask me anything about the latest news!"
                    .to_string(),
            reset_message: "🔄 Session reset! How can I help you with the latest news?"
                .to_string(),
            init_failure_message:
                "Failed to connect to the chat service. Please try again with a reset."
                    .to_string(),
            reset_failure_message: "Failed to reset the session. Please try again.".to_string(),
            send_failure_message: "Not connected to server. Please try again.".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"herald_transport": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
