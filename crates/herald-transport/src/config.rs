use std::time::Duration;

use herald_core::TransportError;

/// Connection parameters for [`SocketTransport`](crate::SocketTransport).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Backend base address (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    pub socket_path: String,
    /// Retries after the first failed attempt before giving up.
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    /// Budget for one connect plus handshake.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            socket_path: "/socket.io/".to_string(),
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_reconnection(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnection_attempts = attempts;
        self.reconnection_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// WebSocket endpoint for the Engine.IO v4 transport.
    pub fn socket_url(&self) -> Result<String, TransportError> {
        let base = self.base_url.trim().trim_end_matches('/');
        let (scheme, rest) = base
            .split_once("://")
            .ok_or_else(|| TransportError::ConnectFailed(format!("invalid backend url: {base}")))?;
        let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::ConnectFailed(format!(
                    "unsupported url scheme: {other}"
                )))
            }
        };
        if rest.is_empty() {
            return Err(TransportError::ConnectFailed(format!(
                "invalid backend url: {base}"
            )));
        }

        let path = self.socket_path.trim_matches('/');
        let path = if path.is_empty() {
            String::from("/")
        } else {
            format!("/{path}/")
        };
        Ok(format!("{ws_scheme}://{rest}{path}?EIO=4&transport=websocket"))
    }
}
