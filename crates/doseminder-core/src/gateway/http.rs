//! JSON-over-HTTP gateway client.

use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::AdherenceGateway;
use crate::error::GatewayError;
use crate::medication::DoseUpdate;
use crate::storage::config::GatewayConfig;

const USER_AGENT: &str = concat!("doseminder/", env!("CARGO_PKG_VERSION"));

/// Gateway backed by the medication REST API.
///
/// Endpoints, relative to `base_url`:
///
/// - `POST users/{user}/medications/{id}/taken`
/// - `POST users/{user}/medications/{id}/missed`
/// - `PUT  users/{user}/medications/{id}/status` with `{"status": bool}`
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpGateway {
    /// # Errors
    /// Fails if `base_url` is not an absolute http(s) URL or the client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// # Errors
    /// Fails if no base URL is configured or it is invalid.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::Unavailable(
                "gateway.base_url is not configured".to_string(),
            ));
        }
        Self::new(
            &config.base_url,
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(
        &self,
        user_id: &str,
        medication_id: &str,
        action: &str,
    ) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["users", user_id, "medications", medication_id, action]);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<DoseUpdate, GatewayError> {
        debug!(%method, %url, "gateway request");
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode(response: Response) -> Result<DoseUpdate, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gateway rejected request");
            return Err(GatewayError::Status {
                code: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}: {text}")))
    }
}

impl AdherenceGateway for HttpGateway {
    async fn mark_taken(
        &self,
        user_id: &str,
        medication_id: &str,
    ) -> Result<DoseUpdate, GatewayError> {
        let url = self.endpoint(user_id, medication_id, "taken")?;
        self.send(Method::POST, url, None).await
    }

    async fn register_missed(
        &self,
        user_id: &str,
        medication_id: &str,
    ) -> Result<DoseUpdate, GatewayError> {
        let url = self.endpoint(user_id, medication_id, "missed")?;
        self.send(Method::POST, url, None).await
    }

    async fn update_status(
        &self,
        user_id: &str,
        medication_id: &str,
        status: bool,
    ) -> Result<DoseUpdate, GatewayError> {
        let url = self.endpoint(user_id, medication_id, "status")?;
        self.send(Method::PUT, url, Some(json!({ "status": status })))
            .await
    }
}
