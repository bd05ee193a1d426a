//! Staff action queue.

use chrono::{DateTime, Utc};
use serde::Serialize;

use threadline_core::{ActionNeeded, BatchNumber, LineId, OrderId, ReturnResolution, ReturnStatus};

use crate::models::ReturnableLine;

/// One open return and what it is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionItem {
    pub line_id: LineId,
    pub order_id: OrderId,
    pub batch_number: Option<BatchNumber>,
    pub status: ReturnStatus,
    pub resolution: Option<ReturnResolution>,
    pub action: ActionNeeded,
    /// Whole days since the return was requested.
    pub days_open: i64,
}

/// The next action for a line, or `None` if it has no open return.
#[must_use]
pub fn action_needed(line: &ReturnableLine) -> Option<ActionNeeded> {
    match line.status? {
        ReturnStatus::Requested => Some(ActionNeeded::SchedulePickup),
        ReturnStatus::Approved => Some(ActionNeeded::Receive),
        ReturnStatus::Inspected => Some(match line.resolution {
            Some(ReturnResolution::Refund) if line.refund.completed_at.is_none() => {
                ActionNeeded::ProcessRefund
            }
            Some(ReturnResolution::Exchange) if line.exchange.order_id.is_none() => {
                ActionNeeded::CreateExchange
            }
            _ => ActionNeeded::Complete,
        }),
        ReturnStatus::Complete
        | ReturnStatus::Cancelled
        | ReturnStatus::Rejected
        | ReturnStatus::Archived => None,
    }
}

/// Build the queue: by action priority, then oldest first.
///
/// Lines without an open return are skipped.
#[must_use]
pub fn build_action_queue(lines: &[ReturnableLine], now: DateTime<Utc>) -> Vec<ActionItem> {
    let mut items: Vec<ActionItem> = lines
        .iter()
        .filter_map(|line| {
            let action = action_needed(line)?;
            let status = line.status?;
            Some(ActionItem {
                line_id: line.id,
                order_id: line.order_id,
                batch_number: line.batch_number.clone(),
                status,
                resolution: line.resolution,
                action,
                days_open: line
                    .requested_at
                    .map_or(0, |at| (now - at).num_days().max(0)),
            })
        })
        .collect();

    items.sort_by(|a, b| {
        a.action
            .priority()
            .cmp(&b.action.priority())
            .then_with(|| b.days_open.cmp(&a.days_open))
            .then_with(|| a.line_id.cmp(&b.line_id))
    });
    items
}
