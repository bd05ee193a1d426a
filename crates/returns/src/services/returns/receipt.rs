//! Warehouse receipt and inspection.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use threadline_core::{ItemCondition, LineId, QcItemId, ReturnStatus, StaffId};

use super::{ReturnEngine, Transition, lock_line, require_active};
use crate::error::ReturnError;
use crate::models::{NewQcItem, ReturnEvent};

/// A parcel arriving at the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveReturn {
    pub line_id: LineId,
    pub condition: ItemCondition,
    pub notes: Option<String>,
    pub received_by: StaffId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReceivedReturn {
    pub line_id: LineId,
    /// Entry handed to the inspection team.
    pub qc_item_id: QcItemId,
    /// Whether the units were written off as damaged.
    pub written_off: bool,
}

impl ReturnEngine {
    /// Record receipt and inspection of a returned item.
    ///
    /// Accepted from `requested` as well as `approved`, for walk-in drop-offs
    /// that never had a pickup. Creates exactly one QC queue entry for the
    /// recorded return quantity.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `WRONG_STATUS`: already inspected
    #[instrument(skip(self, request), fields(line_id = %request.line_id, condition = %request.condition))]
    pub async fn receive_return(
        &self,
        request: ReceiveReturn,
    ) -> Result<ReceivedReturn, ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), request.line_id).await?;

        let status = require_active(&line)?;
        if !matches!(status, ReturnStatus::Requested | ReturnStatus::Approved) {
            return Err(ReturnError::WrongStatus {
                line_id: line.id,
                actual: status,
                expected: "requested or approved".to_string(),
            });
        }

        let quantity = line.effective_return_qty();
        let qc_item_id = tx
            .insert_qc_item(&NewQcItem {
                line_id: line.id,
                sku_id: line.sku_id,
                quantity,
                condition: request.condition,
                notes: request.notes.clone(),
            })
            .await?;

        line.status = Some(ReturnStatus::Inspected);
        line.inspection.condition = Some(request.condition);
        line.inspection.notes = request.notes;
        line.inspection.inspected_at = Some(now);
        line.inspection.received_by = Some(request.received_by);
        if line.pickup.picked_up_at.is_none() {
            line.pickup.picked_up_at = Some(now);
        }

        let written_off = request.condition.is_write_off();
        let mut transition = Transition::new(Some(request.received_by), now);
        transition.record(ReturnEvent::LineReceived {
            line_id: line.id,
            condition: request.condition,
            qc_item_id,
        });
        if written_off {
            transition.record(ReturnEvent::ItemWrittenOff {
                line_id: line.id,
                sku_id: line.sku_id,
                quantity,
            });
        }
        transition.save_with_status(line);
        transition.commit(tx.as_mut()).await?;

        info!(qc_item_id = %qc_item_id, written_off, "Return received");

        Ok(ReceivedReturn {
            line_id: request.line_id,
            qc_item_id,
            written_off,
        })
    }
}
