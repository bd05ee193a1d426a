//! Marketplace partner status sync.
//!
//! Partners that sold the original order mirror our return status on their
//! side. Pushes are delivered by the outbox worker after commit and retried
//! with backoff; the engine never calls the partner directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use threadline_core::{LineId, ReturnStatus};

/// Errors from the partner API.
#[derive(Debug, Error)]
pub enum PartnerError {
    /// HTTP request failed.
    #[error("partner request failed: {0}")]
    Request(String),

    /// Partner answered with a non-success status.
    #[error("partner API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Pushes return status changes to the partner platform.
#[async_trait]
pub trait PartnerStatusSync: Send + Sync {
    async fn push_status(&self, line_id: LineId, status: ReturnStatus) -> Result<(), PartnerError>;
}

#[derive(Debug, Serialize)]
struct StatusUpdate {
    line_id: LineId,
    status: ReturnStatus,
}

/// HTTP client for `{base_url}/return-status`.
#[derive(Clone)]
pub struct PartnerClient {
    inner: Arc<PartnerClientInner>,
}

struct PartnerClientInner {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for PartnerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartnerClient")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl PartnerClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be built or the HTTP
    /// client fails to initialise.
    pub fn new(base_url: &Url, api_key: SecretString) -> Result<Self, PartnerError> {
        let endpoint = base_url
            .join("return-status")
            .map_err(|e| PartnerError::Request(format!("invalid partner URL: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PartnerError::Request(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(PartnerClientInner {
                client,
                endpoint,
                api_key,
            }),
        })
    }
}

#[async_trait]
impl PartnerStatusSync for PartnerClient {
    #[instrument(skip(self), fields(line_id = %line_id, status = %status))]
    async fn push_status(&self, line_id: LineId, status: ReturnStatus) -> Result<(), PartnerError> {
        let response = self
            .inner
            .client
            .post(self.inner.endpoint.clone())
            .bearer_auth(self.inner.api_key.expose_secret())
            .json(&StatusUpdate { line_id, status })
            .send()
            .await
            .map_err(|e| PartnerError::Request(e.to_string()))?;

        let code = response.status();
        if !code.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PartnerError::Api {
                status: code.as_u16(),
                message,
            });
        }

        debug!("Partner status pushed");
        Ok(())
    }
}
