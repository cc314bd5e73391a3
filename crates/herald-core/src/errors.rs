use std::time::Duration;

use crate::session::ConnectionStatus;

/// Failures of the real-time connection. Recovered by reconnecting and only
/// ever surfaced to the user as a status change.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection rejected by server: {0}")]
    Rejected(String),
    #[error("not connected")]
    NotConnected,
    #[error("gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },
}

impl TransportError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Handshake(_) => "handshake",
            Self::Rejected(_) => "rejected",
            Self::NotConnected => "not_connected",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Whether the adapter stopped retrying after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Failures of the session lifecycle (HTTP) channel.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl GatewayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }
}

/// A bot reply that reports a server-side failure for its turn.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("assistant reported an error: {0}")]
pub struct ProtocolPayloadError(pub String);

/// Local rejection of a `send`; nothing is logged and nothing goes out.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("not connected (status: {0})")]
    NotConnected(ConnectionStatus),
    #[error("no active session")]
    NoSession,
    #[error("still waiting for the previous reply")]
    AwaitingReply,
}

/// Errors returned by the coordinator handle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session coordinator has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_exhausted_is_terminal() {
        assert!(TransportError::RetriesExhausted { attempts: 6 }.is_terminal());
        assert!(!TransportError::ConnectFailed("refused".into()).is_terminal());
        assert!(!TransportError::NotConnected.is_terminal());
    }

    #[test]
    fn transport_error_kinds() {
        assert_eq!(TransportError::NotConnected.error_kind(), "not_connected");
        assert_eq!(
            TransportError::ConnectTimeout(Duration::from_secs(20)).error_kind(),
            "connect_timeout"
        );
    }

    #[test]
    fn gateway_status_display() {
        let err = GatewayError::from_status(503, "unavailable".into());
        assert_eq!(err.to_string(), "unexpected status 503: unavailable");
        assert_eq!(err.error_kind(), "status");
    }

    #[test]
    fn payload_error_display() {
        let err = ProtocolPayloadError("model offline".into());
        assert_eq!(err.to_string(), "assistant reported an error: model offline");
    }

    #[test]
    fn validation_converts_into_client_error() {
        let err: ClientError = ValidationError::AwaitingReply.into();
        assert!(matches!(err, ClientError::Validation(ValidationError::AwaitingReply)));
        assert_eq!(err.to_string(), "still waiting for the previous reply");
    }

    #[test]
    fn not_connected_mentions_status() {
        let err = ValidationError::NotConnected(ConnectionStatus::Disconnected);
        assert_eq!(err.to_string(), "not connected (status: disconnected)");
    }
}
