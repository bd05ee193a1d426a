//! Outbox intents for side effects that run after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadline_core::{BatchNumber, LineId, ReturnReason, ReturnResolution, ReturnStatus};

/// What the worker should do once the transaction that wrote it commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxPayload {
    /// Push the line's new status to the marketplace partner.
    PartnerStatus {
        line_id: LineId,
        status: ReturnStatus,
    },
    /// Announce a newly initiated batch to the ops channel.
    BatchNotification {
        batch: BatchNumber,
        line_count: usize,
        reason: ReturnReason,
        resolution: ReturnResolution,
    },
    /// Create the linked exchange order for a batch's anchor line.
    CreateExchange { line_id: LineId },
}

impl OutboxPayload {
    /// Short name used in logs and the `kind` column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PartnerStatus { .. } => "partner_status",
            Self::BatchNotification { .. } => "batch_notification",
            Self::CreateExchange { .. } => "create_exchange",
        }
    }
}

/// Delivery state of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(type_name = "retail.outbox_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Gave up; needs a human.
    Dead,
}

/// A stored outbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub payload: OutboxPayload,
    pub status: OutboxStatus,
    /// Failed deliveries so far.
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// A fresh pending message, due immediately.
    #[must_use]
    pub fn pending(payload: OutboxPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
        }
    }
}
