//! HTTP client for the courier aggregator API.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};
use url::Url;

use super::{LogisticsBooking, LogisticsError, PickupBooking, PickupRequest};

/// Courier aggregator client.
///
/// Posts booking requests to `{base_url}/pickups` with bearer authentication.
#[derive(Clone)]
pub struct CourierClient {
    inner: Arc<CourierClientInner>,
}

struct CourierClientInner {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for CourierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierClient")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CourierClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be built or the HTTP
    /// client fails to initialise.
    pub fn new(base_url: &Url, api_key: SecretString) -> Result<Self, LogisticsError> {
        let endpoint = base_url
            .join("pickups")
            .map_err(|e| LogisticsError::Request(format!("invalid logistics URL: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LogisticsError::Request(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(CourierClientInner {
                client,
                endpoint,
                api_key,
            }),
        })
    }
}

#[async_trait::async_trait]
impl LogisticsBooking for CourierClient {
    #[instrument(skip(self), fields(batch = %request.batch_number, line_id = %request.line_id))]
    async fn book_pickup(&self, request: &PickupRequest) -> Result<PickupBooking, LogisticsError> {
        let response = self
            .inner
            .client
            .post(self.inner.endpoint.clone())
            .bearer_auth(self.inner.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| LogisticsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, message = %message, "Courier rejected pickup booking");
            return Err(LogisticsError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let booking: PickupBooking = response
            .json()
            .await
            .map_err(|e| LogisticsError::Response(e.to_string()))?;

        info!(courier = %booking.courier, awb = %booking.awb, "Pickup booked");
        Ok(booking)
    }
}
