//! `reqwest` implementation of [`SessionGateway`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use herald_core::{GatewayError, SessionId};

use crate::gateway::{HealthStatus, SessionGateway};

const USER_AGENT: &str = concat!("herald/", env!("CARGO_PKG_VERSION"));

/// Where the session endpoints live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Mount point of the session routes, e.g. `/api`. May be empty.
    pub api_prefix: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: "/api".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    #[serde(default)]
    session_id: Option<String>,
}

/// HTTP session gateway.
///
/// - `POST {base}{prefix}/session/new` returns `{"sessionId": "..."}`
/// - `DELETE {base}{prefix}/session/{id}`
/// - `GET {base}/health`
pub struct HttpSessionGateway {
    client: Client,
    base: Url,
    prefix: Vec<String>,
    timeout: Duration,
}

impl HttpSessionGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let base = Url::parse(config.base_url.trim())
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        let prefix = config
            .api_prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            client,
            base,
            prefix,
            timeout: config.timeout,
        })
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment.
    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| GatewayError::InvalidUrl(self.base.to_string()))?;
            let _ = path.pop_if_empty();
            let _ = path.extend(segments);
        }
        Ok(url)
    }

    fn session_endpoint<'a>(
        &'a self,
        tail: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, GatewayError> {
        let segments: Vec<&str> = self
            .prefix
            .iter()
            .map(String::as_str)
            .chain(std::iter::once("session"))
            .chain(tail)
            .collect();
        self.endpoint(segments)
    }

    fn map_send_error(&self, error: &reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else if error.is_builder() {
            GatewayError::InvalidUrl(error.to_string())
        } else {
            GatewayError::Network(error.to_string())
        }
    }

    /// Fail non-success statuses with their body.
    async fn check_status(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl SessionGateway for HttpSessionGateway {
    async fn create_session(&self) -> Result<SessionId, GatewayError> {
        let url = self.session_endpoint(["new"])?;
        debug!(url = %url, "creating session");

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        let response = Self::check_status(response).await?;

        let body: CreateSessionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout)
            } else {
                GatewayError::InvalidResponse(e.to_string())
            }
        })?;

        match body.session_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                let id = SessionId::from_raw(id);
                info!(session_id = %id, "session created");
                Ok(id)
            }
            None => {
                warn!("create session response has no sessionId");
                Err(GatewayError::InvalidResponse("missing sessionId".into()))
            }
        }
    }

    async fn discard_session(&self, id: &SessionId) -> Result<(), GatewayError> {
        let url = self.session_endpoint([id.as_str()])?;
        debug!(session_id = %id, "discarding session");

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        let _ = Self::check_status(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        let url = self.endpoint(["health"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        let response = Self::check_status(response).await?;

        let http_status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_send_error(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(HealthStatus { http_status, body })
    }
}
