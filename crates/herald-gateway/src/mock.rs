//! Scripted [`SessionGateway`] for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;

use herald_core::{GatewayError, SessionId};

use crate::gateway::{HealthStatus, SessionGateway};

/// Returns scripted `create_session` results in call order and records
/// every discard. With an empty script it mints `session-1`, `session-2`, ...
///
/// [`MockGateway::hold`] parks new create calls until [`MockGateway::release`],
/// which lets tests complete them out of order relative to other events.
pub struct MockGateway {
    script: Mutex<VecDeque<Result<SessionId, GatewayError>>>,
    discarded: Mutex<Vec<SessionId>>,
    discard_result: Mutex<Result<(), GatewayError>>,
    health_result: Mutex<Result<HealthStatus, GatewayError>>,
    creates: AtomicUsize,
    held: watch::Sender<bool>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            discarded: Mutex::new(Vec::new()),
            discard_result: Mutex::new(Ok(())),
            health_result: Mutex::new(Ok(HealthStatus {
                http_status: 200,
                body: json!({"status": "OK"}),
            })),
            creates: AtomicUsize::new(0),
            held: watch::Sender::new(false),
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script successful creates returning `ids`, in order.
    pub fn with_sessions<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::new();
        for id in ids {
            gateway.push_create(Ok(SessionId::from_raw(id)));
        }
        gateway
    }

    pub fn push_create(&self, result: Result<SessionId, GatewayError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_discard_result(&self, result: Result<(), GatewayError>) {
        *self.discard_result.lock() = result;
    }

    pub fn set_health(&self, result: Result<HealthStatus, GatewayError>) {
        *self.health_result.lock() = result;
    }

    /// Park create calls until [`MockGateway::release`].
    pub fn hold(&self) {
        let _ = self.held.send_replace(true);
    }

    pub fn release(&self) {
        let _ = self.held.send_replace(false);
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> Vec<SessionId> {
        self.discarded.lock().clone()
    }
}

#[async_trait]
impl SessionGateway for MockGateway {
    async fn create_session(&self) -> Result<SessionId, GatewayError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        // Decide the result at call time so held calls keep their order.
        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(SessionId::from_raw(format!("session-{n}"))));

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
        result
    }

    async fn discard_session(&self, id: &SessionId) -> Result<(), GatewayError> {
        self.discarded.lock().push(id.clone());
        self.discard_result.lock().clone()
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        self.health_result.lock().clone()
    }
}
