use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::messages::Message;

/// Connection status as seen by the presentation layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the coordinator's state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    pub typing: bool,
    pub connection_status: ConnectionStatus,
}

impl SessionSnapshot {
    /// Whether the input should accept a new message right now.
    pub fn can_send(&self) -> bool {
        self.connection_status.is_connected() && !self.typing && self.session_id.is_some()
    }
}
