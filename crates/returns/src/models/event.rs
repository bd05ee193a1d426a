//! Domain events emitted by return transitions.
//!
//! Events are appended to `retail.return_events` in the same transaction as
//! the state change they describe. Counter updates are derived from them by
//! [`CounterProjection`](crate::services::returns::CounterProjection).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use threadline_core::{
    BatchNumber, CustomerId, ItemCondition, LineId, OrderId, QcItemId, ReturnReason,
    ReturnResolution, SkuId, StaffId,
};

/// Something that happened to a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnEvent {
    /// A new batch was opened for an order.
    BatchInitiated {
        batch: BatchNumber,
        order_id: OrderId,
        customer_id: CustomerId,
        line_ids: Vec<LineId>,
        resolution: ReturnResolution,
    },
    /// A line entered `requested` as part of a batch.
    LineRequested {
        line_id: LineId,
        batch: BatchNumber,
        sku_id: SkuId,
        quantity: i32,
        reason: ReturnReason,
        resolution: ReturnResolution,
    },
    /// A line past its window was initiated under the expired-override policy.
    ExpiredOverrideUsed {
        line_id: LineId,
        days_since_delivery: i64,
        window_days: i64,
    },
    PickupScheduled {
        line_id: LineId,
        batch: BatchNumber,
        courier: Option<String>,
        awb: Option<String>,
        /// Booked through the logistics service rather than entered by hand.
        booked: bool,
    },
    LineReceived {
        line_id: LineId,
        condition: ItemCondition,
        qc_item_id: QcItemId,
    },
    ItemWrittenOff {
        line_id: LineId,
        sku_id: SkuId,
        quantity: i32,
    },
    RefundCalculated {
        line_id: LineId,
        net_amount: Decimal,
    },
    RefundCompleted {
        line_id: LineId,
        reference: Option<String>,
    },
    ExchangeCreated {
        line_id: LineId,
        exchange_order_id: OrderId,
        customer_id: CustomerId,
        price_diff: Decimal,
    },
    ReturnCompleted {
        line_id: LineId,
    },
    ReturnCancelled {
        line_id: LineId,
        batch: Option<BatchNumber>,
        sku_id: SkuId,
        customer_id: CustomerId,
        quantity: i32,
        /// Other lines of the same batch still active after this cancellation.
        other_active_in_batch: u32,
    },
    ReturnRejected {
        line_id: LineId,
        reason: String,
    },
    ReturnArchived {
        line_id: LineId,
        reason: String,
    },
    NotesUpdated {
        line_id: LineId,
    },
    ResolutionOverridden {
        line_id: LineId,
        from: ReturnResolution,
        to: ReturnResolution,
    },
}

impl ReturnEvent {
    /// Stable event type name, as stored in the `event_type` column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BatchInitiated { .. } => "batch_initiated",
            Self::LineRequested { .. } => "line_requested",
            Self::ExpiredOverrideUsed { .. } => "expired_override_used",
            Self::PickupScheduled { .. } => "pickup_scheduled",
            Self::LineReceived { .. } => "line_received",
            Self::ItemWrittenOff { .. } => "item_written_off",
            Self::RefundCalculated { .. } => "refund_calculated",
            Self::RefundCompleted { .. } => "refund_completed",
            Self::ExchangeCreated { .. } => "exchange_created",
            Self::ReturnCompleted { .. } => "return_completed",
            Self::ReturnCancelled { .. } => "return_cancelled",
            Self::ReturnRejected { .. } => "return_rejected",
            Self::ReturnArchived { .. } => "return_archived",
            Self::NotesUpdated { .. } => "notes_updated",
            Self::ResolutionOverridden { .. } => "resolution_overridden",
        }
    }

    /// The line this event is about, if it concerns a single line.
    #[must_use]
    pub const fn line_id(&self) -> Option<LineId> {
        match self {
            Self::BatchInitiated { .. } => None,
            Self::LineRequested { line_id, .. }
            | Self::ExpiredOverrideUsed { line_id, .. }
            | Self::PickupScheduled { line_id, .. }
            | Self::LineReceived { line_id, .. }
            | Self::ItemWrittenOff { line_id, .. }
            | Self::RefundCalculated { line_id, .. }
            | Self::RefundCompleted { line_id, .. }
            | Self::ExchangeCreated { line_id, .. }
            | Self::ReturnCompleted { line_id }
            | Self::ReturnCancelled { line_id, .. }
            | Self::ReturnRejected { line_id, .. }
            | Self::ReturnArchived { line_id, .. }
            | Self::NotesUpdated { line_id }
            | Self::ResolutionOverridden { line_id, .. } => Some(*line_id),
        }
    }
}

/// An event together with who caused it and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// `None` for system actions such as the stale-request sweep.
    pub actor: Option<StaffId>,
    pub occurred_at: DateTime<Utc>,
    pub event: ReturnEvent,
}

impl RecordedEvent {
    #[must_use]
    pub const fn new(actor: Option<StaffId>, occurred_at: DateTime<Utc>, event: ReturnEvent) -> Self {
        Self {
            actor,
            occurred_at,
            event,
        }
    }
}
