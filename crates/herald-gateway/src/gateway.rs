use async_trait::async_trait;
use serde_json::Value;

use herald_core::{GatewayError, SessionId};

/// Out-of-band session lifecycle calls. Each call is a single attempt;
/// retrying is the caller's decision.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Ask the backend for a fresh session id.
    async fn create_session(&self) -> Result<SessionId, GatewayError>;

    /// Tell the backend a session is no longer used.
    async fn discard_session(&self, id: &SessionId) -> Result<(), GatewayError>;

    /// Probe backend liveness.
    async fn health(&self) -> Result<HealthStatus, GatewayError>;
}

/// Result of a successful health probe.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthStatus {
    pub http_status: u16,
    /// Response body, parsed as JSON when possible.
    pub body: Value,
}

impl HealthStatus {
    /// The `status` field the backend reports, e.g. `"OK"`.
    pub fn label(&self) -> Option<&str> {
        self.body.get("status").and_then(Value::as_str)
    }
}
