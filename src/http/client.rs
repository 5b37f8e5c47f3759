//! Production submitter using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ApiResponse, Submitter};
use crate::error::{BarrageError, Result};
use crate::operation::{EntityOperation, OperationKind};

/// Connection settings for [`ReqwestSubmitter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    /// Root URL of the API; entity collections live directly under it
    pub base_url: String,

    /// Sent as `Authorization: Bearer` when present
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for each individual request in milliseconds
    pub timeout_ms: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://jsonplaceholder.typicode.com".to_string(),
            api_key: None,
            timeout_ms: 30000,
        }
    }
}

/// Submitter that maps each operation onto one JSON REST call.
///
/// | kind   | request                                     |
/// |--------|---------------------------------------------|
/// | Create | `POST {base_url}/{entity_type}`             |
/// | Update | `PUT {base_url}/{entity_type}/{target_id}`  |
/// | Delete | `DELETE {base_url}/{entity_type}/{target_id}` |
#[derive(Clone)]
pub struct ReqwestSubmitter {
    client: reqwest::Client,
    config: SubmitterConfig,
}

impl ReqwestSubmitter {
    pub fn new(config: SubmitterConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Use a preconfigured client (proxies, TLS roots, pooling).
    pub fn with_client(client: reqwest::Client, config: SubmitterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    fn url_for(&self, operation: &EntityOperation) -> Result<String> {
        let base = self.config.base_url.trim_end_matches('/');
        let collection = operation.entity_type().trim_matches('/');

        if !operation.kind().requires_target() {
            return Ok(format!("{base}/{collection}"));
        }

        let target = operation.target_id().ok_or_else(|| {
            BarrageError::InvalidOperation(format!(
                "{} of {} at {} has no target id",
                operation.kind(),
                collection,
                operation.client_index()
            ))
        })?;
        Ok(format!("{base}/{collection}/{target}"))
    }
}

impl Default for ReqwestSubmitter {
    fn default() -> Self {
        Self::new(SubmitterConfig::default())
    }
}

impl ReqwestSubmitter {
    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(self.config.timeout_ms));

        // Only add Authorization header if an api key is configured
        if let Some(api_key) = self.config.api_key.as_deref()
            && !api_key.is_empty()
        {
            return req.bearer_auth(api_key);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, url: &str) -> Result<ApiResponse> {
        let response = req.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Request failed");
            if e.is_timeout() {
                BarrageError::Timeout(Duration::from_millis(self.config.timeout_ms))
            } else {
                BarrageError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), response_len = body.len(), "API rejected request");
            return Err(BarrageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(ApiResponse::from_body(status.as_u16(), body))
    }
}

#[async_trait]
impl Submitter for ReqwestSubmitter {
    #[tracing::instrument(skip(self, operation), fields(client_index = %operation.client_index(), kind = %operation.kind(), entity_type = %operation.entity_type()))]
    async fn submit(&self, operation: &EntityOperation) -> Result<ApiResponse> {
        let url = self.url_for(operation)?;

        let method = match operation.kind() {
            OperationKind::Create => Method::POST,
            OperationKind::Update => Method::PUT,
            OperationKind::Delete => Method::DELETE,
        };

        tracing::debug!(url = %url, method = %method, timeout_ms = self.config.timeout_ms, "Submitting operation");

        let mut req = self.request(method, &url);
        if operation.kind() != OperationKind::Delete {
            req = req.json(operation.payload());
        }

        let response = self.send(req, &url).await?;
        tracing::info!(status = response.status, response_len = response.body.len(), "Operation submitted");
        Ok(response)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<ApiResponse> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = format!("{base}/{}/{entity_id}", entity_type.trim_matches('/'));

        tracing::debug!(url = %url, "Reading entity back");
        self.send(self.request(Method::GET, &url), &url).await
    }
}
