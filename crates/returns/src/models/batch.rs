//! The return batch aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use threadline_core::{BatchNumber, LineId, OrderId};

/// Lines of one order that were initiated together and share a pickup.
///
/// The batch number is assigned once, at initiation, and its sequence is
/// unique per order. Membership never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnBatch {
    pub number: BatchNumber,
    pub order_id: OrderId,
    /// Member lines in initiation order.
    pub line_ids: Vec<LineId>,
    pub created_at: DateTime<Utc>,
}

impl ReturnBatch {
    /// Per-order sequence, starting at 1.
    #[must_use]
    pub const fn sequence(&self) -> i32 {
        self.number.sequence()
    }
}
