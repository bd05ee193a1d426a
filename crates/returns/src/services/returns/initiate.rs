//! Return batch initiation.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use threadline_core::{
    BatchNumber, LineId, OrderId, PickupType, ReturnReason, ReturnResolution, ReturnStatus, SkuId,
    StaffId,
};

use super::eligibility::{EligibilityInput, evaluate};
use super::{ReturnEngine, Transition};
use crate::error::ReturnError;
use crate::models::{OutboxPayload, ReturnBatch, ReturnEvent};

/// One line to include in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLineRequest {
    pub line_id: LineId,
    /// Units to return; defaults to the full line quantity.
    pub quantity: Option<i32>,
}

impl From<LineId> for ReturnLineRequest {
    fn from(line_id: LineId) -> Self {
        Self {
            line_id,
            quantity: None,
        }
    }
}

/// Request to open a return batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateReturn {
    /// Lines to return; all must belong to the same order. The first line
    /// prices the exchange.
    pub lines: Vec<ReturnLineRequest>,
    pub reason: ReturnReason,
    pub reason_detail: Option<String>,
    pub resolution: ReturnResolution,
    /// Required when `resolution` is `exchange`.
    pub exchange_sku_id: Option<SkuId>,
    /// How the parcel will come back, if already known.
    pub pickup_type: Option<PickupType>,
    pub notes: Option<String>,
    pub requested_by: StaffId,
}

/// A successfully opened batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiatedBatch {
    pub batch_number: BatchNumber,
    pub order_id: OrderId,
    pub line_ids: Vec<LineId>,
    /// Lines initiated past their window under the override policy.
    pub overridden_lines: Vec<LineId>,
    /// Exchange order created right after commit, if that succeeded.
    pub exchange_order_id: Option<OrderId>,
}

impl ReturnEngine {
    /// Open a return batch for lines of one order.
    ///
    /// All lines are validated before anything is written and the whole batch
    /// commits atomically. For exchanges, the exchange order is created right
    /// after commit; if that fails the batch still succeeds and the queued
    /// `create_exchange` intent retries it.
    ///
    /// # Errors
    ///
    /// - `INVALID_QUANTITY`: no lines, duplicate lines, lines from several
    ///   orders, or a quantity outside `1..=line quantity`
    /// - `LINE_NOT_FOUND`, `ALREADY_ACTIVE`, `WINDOW_EXPIRED`, `NOT_ELIGIBLE`
    /// - `EXCHANGE_SKU_NOT_FOUND`: exchange without a valid target SKU
    #[instrument(skip(self, request), fields(lines = request.lines.len(), resolution = %request.resolution))]
    pub async fn initiate_return(
        &self,
        request: InitiateReturn,
    ) -> Result<InitiatedBatch, ReturnError> {
        let ids = validate_selection(&request.lines)?;
        let anchor = *ids
            .first()
            .ok_or_else(|| ReturnError::InvalidQuantity("at least one line is required".to_string()))?;
        let settings = self.settings().await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut lines = tx.lock_lines(&ids).await?;

        // Keep request order: the first requested line anchors the batch.
        lines.sort_by_key(|l| ids.iter().position(|id| *id == l.id));
        if let Some(missing) = ids.iter().find(|id| !lines.iter().any(|l| l.id == **id)) {
            return Err(ReturnError::LineNotFound(*missing));
        }

        let order_id = lines
            .first()
            .map(|l| l.order_id)
            .ok_or(ReturnError::LineNotFound(anchor))?;
        if lines.iter().any(|l| l.order_id != order_id) {
            return Err(ReturnError::InvalidQuantity(
                "lines belong to more than one order".to_string(),
            ));
        }
        let order = tx.lock_order(order_id).await?.ok_or_else(|| {
            ReturnError::Unknown(format!("order {order_id} of line {anchor} is missing"))
        })?;

        let mut quantities = Vec::with_capacity(lines.len());
        let mut overridden = Vec::new();
        for (line, wanted) in lines.iter().zip(&request.lines) {
            let qty = wanted.quantity.unwrap_or(line.quantity);
            if qty < 1 || qty > line.quantity {
                return Err(ReturnError::InvalidQuantity(format!(
                    "line {} has {} units, cannot return {qty}",
                    line.id, line.quantity
                )));
            }
            quantities.push(qty);

            let sku = tx.sku(line.sku_id).await?.ok_or_else(|| {
                ReturnError::Unknown(format!("SKU {} of line {} is missing", line.sku_id, line.id))
            })?;
            let eligibility = evaluate(&EligibilityInput::for_line(line, &sku), &settings, now);
            if let Some(err) = eligibility.rejection(line.id, &settings) {
                return Err(err);
            }
            if eligibility.is_override() {
                overridden.push((line.id, eligibility.days_since_delivery.unwrap_or_default()));
            }
        }

        let exchange_sku_id = match request.resolution {
            ReturnResolution::Refund => None,
            ReturnResolution::Exchange => {
                let sku_id = request
                    .exchange_sku_id
                    .ok_or(ReturnError::ExchangeSkuNotFound(None))?;
                if tx.sku(sku_id).await?.is_none() {
                    return Err(ReturnError::ExchangeSkuNotFound(Some(sku_id)));
                }
                Some(sku_id)
            }
        };

        let prior = tx.count_batches(order_id).await?;
        let batch_number = BatchNumber::next_for(&order.number, prior);
        let batch = ReturnBatch {
            number: batch_number.clone(),
            order_id,
            line_ids: ids.clone(),
            created_at: now,
        };
        tx.insert_batch(&batch).await?;

        let mut transition = Transition::new(Some(request.requested_by), now);
        transition.record(ReturnEvent::BatchInitiated {
            batch: batch_number.clone(),
            order_id,
            customer_id: order.customer_id,
            line_ids: ids.clone(),
            resolution: request.resolution,
        });

        for (mut line, qty) in lines.into_iter().zip(quantities) {
            line.reset_return();
            line.return_qty = Some(qty);
            line.batch_number = Some(batch_number.clone());
            line.status = Some(ReturnStatus::Requested);
            line.reason = Some(request.reason);
            line.reason_detail.clone_from(&request.reason_detail);
            line.resolution = Some(request.resolution);
            line.requested_at = Some(now);
            line.requested_by = Some(request.requested_by);
            line.notes.clone_from(&request.notes);
            line.pickup.pickup_type = request.pickup_type;
            line.exchange.sku_id = exchange_sku_id;

            transition.record(ReturnEvent::LineRequested {
                line_id: line.id,
                batch: batch_number.clone(),
                sku_id: line.sku_id,
                quantity: qty,
                reason: request.reason,
                resolution: request.resolution,
            });
            transition.save_with_status(line);
        }

        for (line_id, days) in &overridden {
            warn!(line_id = %line_id, days_since_delivery = days, "Return initiated past window by override");
            transition.record(ReturnEvent::ExpiredOverrideUsed {
                line_id: *line_id,
                days_since_delivery: *days,
                window_days: settings.window_days,
            });
        }

        transition.enqueue(OutboxPayload::BatchNotification {
            batch: batch_number.clone(),
            line_count: ids.len(),
            reason: request.reason,
            resolution: request.resolution,
        });
        if exchange_sku_id.is_some() {
            transition.enqueue(OutboxPayload::CreateExchange { line_id: anchor });
        }

        transition.commit(tx.as_mut()).await?;
        drop(tx);

        info!(
            batch = %batch_number,
            order_id = %order_id,
            lines = ids.len(),
            "Return batch initiated"
        );

        let exchange_order_id = if exchange_sku_id.is_some() {
            match self.create_exchange(anchor, Some(request.requested_by)).await {
                Ok(created) => Some(created.exchange_order_id),
                Err(e) => {
                    error!(
                        batch = %batch_number,
                        error = %e,
                        "Exchange creation after initiation failed; left to the outbox"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(InitiatedBatch {
            batch_number,
            order_id,
            line_ids: ids,
            overridden_lines: overridden.into_iter().map(|(id, _)| id).collect(),
            exchange_order_id,
        })
    }
}

/// Reject empty or duplicated selections before touching the store.
fn validate_selection(lines: &[ReturnLineRequest]) -> Result<Vec<LineId>, ReturnError> {
    if lines.is_empty() {
        return Err(ReturnError::InvalidQuantity(
            "at least one line is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(lines.len());
    for request in lines {
        if !seen.insert(request.line_id) {
            return Err(ReturnError::InvalidQuantity(format!(
                "line {} listed more than once",
                request.line_id
            )));
        }
    }
    Ok(lines.iter().map(|l| l.line_id).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection_is_invalid_quantity() {
        let err = validate_selection(&[]).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_QUANTITY");
    }

    #[test]
    fn test_duplicate_selection_is_invalid_quantity() {
        let lines = [LineId::new(1).into(), LineId::new(1).into()];
        let err = validate_selection(&lines).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_QUANTITY");
    }

    #[test]
    fn test_selection_keeps_order() {
        let lines = [LineId::new(9).into(), LineId::new(2).into()];
        assert_eq!(
            validate_selection(&lines).unwrap(),
            vec![LineId::new(9), LineId::new(2)]
        );
    }
}
