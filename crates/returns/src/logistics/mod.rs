//! Reverse-pickup booking with the courier aggregator.
//!
//! One booking covers a whole return batch. The booking call happens outside
//! any database transaction; the engine only applies the result.

mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use threadline_core::{BatchNumber, LineId, OrderId, PickupType};

pub use client::CourierClient;

/// Errors from the logistics service.
#[derive(Debug, Error)]
pub enum LogisticsError {
    /// No logistics credentials are configured.
    #[error("logistics booking is not configured")]
    NotConfigured,

    /// HTTP request failed.
    #[error("logistics request failed: {0}")]
    Request(String),

    /// The courier refused the booking.
    #[error("courier rejected booking ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Failed to parse response.
    #[error("logistics response error: {0}")]
    Response(String),
}

/// Booking request for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickupRequest {
    /// The line that triggered the booking.
    pub line_id: LineId,
    pub batch_number: BatchNumber,
    pub order_id: OrderId,
    pub pickup_type: PickupType,
}

/// A confirmed courier booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupBooking {
    pub courier: String,
    pub awb: String,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Books reverse pickups.
#[async_trait]
pub trait LogisticsBooking: Send + Sync {
    /// Book one pickup for the request's batch.
    async fn book_pickup(&self, request: &PickupRequest) -> Result<PickupBooking, LogisticsError>;
}

/// Stand-in used when no courier integration is configured.
///
/// Every automatic booking fails, so staff fall back to manual AWB entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredLogistics;

#[async_trait]
impl LogisticsBooking for UnconfiguredLogistics {
    async fn book_pickup(&self, _request: &PickupRequest) -> Result<PickupBooking, LogisticsError> {
        Err(LogisticsError::NotConfigured)
    }
}
