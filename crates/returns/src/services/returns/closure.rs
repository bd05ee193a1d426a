//! Completion, cancellation and manual closure.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use threadline_core::{LineId, ReturnResolution, ReturnStatus, StaffId};

use super::{ReturnEngine, Transition, lock_line, require_active, require_status};
use crate::db::ReturnTx;
use crate::error::ReturnError;
use crate::models::{ReturnEvent, ReturnableLine};

/// Closure reason recorded by the stale-request sweep.
pub const AUTO_REJECT_REASON: &str = "auto_rejected_stale_request";

const BATCH_LOCK_ATTEMPTS: usize = 3;

/// A line locked together with the rest of its batch.
struct BatchLock<'a> {
    tx: Box<dyn ReturnTx + 'a>,
    line: ReturnableLine,
    siblings: Vec<ReturnableLine>,
}

/// A staff-initiated terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReturn {
    pub line_id: LineId,
    pub actor: StaffId,
    pub reason: String,
}

/// Requests made before this instant are stale, or `None` if the threshold
/// does not fit the calendar.
fn stale_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|age| now.checked_sub_signed(age))
}

/// Whether the line's resolution has been carried out.
fn require_resolved(line: &ReturnableLine) -> Result<(), ReturnError> {
    match line.resolution {
        Some(ReturnResolution::Refund) if line.refund.completed_at.is_none() => {
            Err(ReturnError::RefundNotCompleted(line.id))
        }
        Some(ReturnResolution::Exchange) if line.exchange.order_id.is_none() => {
            Err(ReturnError::ExchangeNotCreated(line.id))
        }
        _ => Ok(()),
    }
}

impl ReturnEngine {
    /// Close a resolved, inspected return as `complete`.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `REFUND_NOT_COMPLETED`, `EXCHANGE_NOT_CREATED`
    /// - `WRONG_STATUS`: not yet inspected
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn complete_return(
        &self,
        line_id: LineId,
        actor: StaffId,
    ) -> Result<(), ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), line_id).await?;
        require_active(&line)?;
        require_resolved(&line)?;
        require_status(&line, ReturnStatus::Inspected)?;

        line.close(ReturnStatus::Complete, Some(actor), None, now);

        let mut transition = Transition::new(Some(actor), now);
        transition.record(ReturnEvent::ReturnCompleted { line_id });
        transition.save_with_status(line);
        transition.commit(tx.as_mut()).await?;

        info!("Return completed");
        Ok(())
    }

    /// Cancel an in-flight return and reverse its counters.
    ///
    /// The customer's return counter only drops when this was the last
    /// active line of its batch.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    #[instrument(skip(self, reason), fields(line_id = %line_id))]
    pub async fn cancel_return(
        &self,
        line_id: LineId,
        actor: StaffId,
        reason: Option<String>,
    ) -> Result<(), ReturnError> {
        let now = Utc::now();
        let BatchLock {
            mut tx,
            mut line,
            siblings,
        } = self.lock_with_batch(line_id).await?;
        require_active(&line)?;

        let other_active = siblings.iter().filter(|l| l.has_active_return()).count();
        let order = tx.lock_order(line.order_id).await?.ok_or_else(|| {
            ReturnError::Unknown(format!("order {} of line {line_id} is missing", line.order_id))
        })?;

        let quantity = line.effective_return_qty();
        let batch = line.batch_number.clone();
        line.close(ReturnStatus::Cancelled, Some(actor), reason, now);

        let mut transition = Transition::new(Some(actor), now);
        transition.record(ReturnEvent::ReturnCancelled {
            line_id,
            batch,
            sku_id: line.sku_id,
            customer_id: order.customer_id,
            quantity,
            other_active_in_batch: u32::try_from(other_active).unwrap_or(u32::MAX),
        });
        transition.save_with_status(line);
        transition.commit(tx.as_mut()).await?;

        info!(other_active_in_batch = other_active, "Return cancelled");
        Ok(())
    }

    /// Lock a line together with the other lines of its batch.
    ///
    /// Batch rows are locked first and in id order, as pickup scheduling
    /// does, so operations on sibling lines serialise on the same rows. The
    /// batch number is read without a lock and re-read if the line moved to
    /// another batch before the lock was taken.
    async fn lock_with_batch(&self, line_id: LineId) -> Result<BatchLock<'_>, ReturnError> {
        for _ in 0..BATCH_LOCK_ATTEMPTS {
            let batch = self
                .store
                .line(line_id)
                .await?
                .ok_or(ReturnError::LineNotFound(line_id))?
                .batch_number;
            let mut tx = self.store.begin().await?;

            let Some(batch) = batch else {
                let line = lock_line(tx.as_mut(), line_id).await?;
                if line.batch_number.is_none() {
                    return Ok(BatchLock {
                        tx,
                        line,
                        siblings: Vec::new(),
                    });
                }
                continue;
            };

            let mut lines = tx.lock_batch_lines(&batch).await?;
            if let Some(position) = lines.iter().position(|l| l.id == line_id) {
                let line = lines.swap_remove(position);
                return Ok(BatchLock {
                    tx,
                    line,
                    siblings: lines,
                });
            }
        }
        Err(ReturnError::Unknown(format!(
            "line {line_id} moved between batches while being locked"
        )))
    }

    /// Reject an in-flight return.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    pub async fn reject_return(&self, request: CloseReturn) -> Result<(), ReturnError> {
        self.close_manually(
            request.line_id,
            Some(request.actor),
            ReturnStatus::Rejected,
            request.reason,
        )
        .await
    }

    /// Force-close an in-flight return, e.g. when the customer stopped responding.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    pub async fn archive_return(&self, request: CloseReturn) -> Result<(), ReturnError> {
        self.close_manually(
            request.line_id,
            Some(request.actor),
            ReturnStatus::Archived,
            request.reason,
        )
        .await
    }

    #[instrument(skip(self, reason), fields(line_id = %line_id, status = %status))]
    async fn close_manually(
        &self,
        line_id: LineId,
        actor: Option<StaffId>,
        status: ReturnStatus,
        reason: String,
    ) -> Result<(), ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), line_id).await?;
        require_active(&line)?;

        line.close(status, actor, Some(reason.clone()), now);

        let mut transition = Transition::new(actor, now);
        transition.record(match status {
            ReturnStatus::Archived => ReturnEvent::ReturnArchived { line_id, reason },
            _ => ReturnEvent::ReturnRejected { line_id, reason },
        });
        transition.save_with_status(line);
        transition.commit(tx.as_mut()).await?;

        info!("Return closed manually");
        Ok(())
    }

    /// Replace the staff notes on an in-flight return.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    #[instrument(skip(self, notes), fields(line_id = %line_id))]
    pub async fn update_notes(
        &self,
        line_id: LineId,
        notes: Option<String>,
        actor: StaffId,
    ) -> Result<(), ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), line_id).await?;
        require_active(&line)?;

        line.notes = notes;

        let mut transition = Transition::new(Some(actor), now);
        transition.record(ReturnEvent::NotesUpdated { line_id });
        transition.save(line);
        transition.commit(tx.as_mut()).await?;
        Ok(())
    }

    /// Reject `requested` returns older than the policy's auto-reject threshold.
    ///
    /// Each line is rejected in its own transaction; lines that moved on
    /// since they were listed are skipped. Returns the rejected lines.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN` if the store cannot be read. Failures on single
    /// lines are logged and skipped.
    #[instrument(skip(self))]
    pub async fn sweep_stale_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LineId>, ReturnError> {
        let settings = self.settings().await?;
        let Some(days) = settings.auto_reject_after_days else {
            return Ok(Vec::new());
        };
        let Some(cutoff) = stale_cutoff(now, days) else {
            warn!(auto_reject_after_days = days, "Auto-reject threshold out of range, skipping sweep");
            return Ok(Vec::new());
        };
        let candidates = self.store.stale_requested_lines(cutoff).await?;

        let mut rejected = Vec::new();
        for line_id in candidates {
            match self.reject_if_still_requested(line_id, now).await {
                Ok(true) => rejected.push(line_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(line_id = %line_id, error = %e, "Failed to auto-reject stale return");
                }
            }
        }

        if !rejected.is_empty() {
            info!(count = rejected.len(), cutoff = %cutoff, "Stale return requests rejected");
        }
        Ok(rejected)
    }

    async fn reject_if_still_requested(
        &self,
        line_id: LineId,
        now: DateTime<Utc>,
    ) -> Result<bool, ReturnError> {
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), line_id).await?;
        if line.status != Some(ReturnStatus::Requested) {
            return Ok(false);
        }

        let reason = AUTO_REJECT_REASON.to_string();
        line.close(ReturnStatus::Rejected, None, Some(reason.clone()), now);

        let mut transition = Transition::new(None, now);
        transition.record(ReturnEvent::ReturnRejected { line_id, reason });
        transition.save_with_status(line);
        transition.commit(tx.as_mut()).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use threadline_core::{OrderId, SkuId};

    use super::*;

    fn inspected(resolution: ReturnResolution) -> ReturnableLine {
        let mut line = ReturnableLine::new(
            LineId::new(1),
            OrderId::new(1),
            SkuId::new(1),
            1,
            Decimal::new(1000, 0),
            None,
        );
        line.status = Some(ReturnStatus::Inspected);
        line.resolution = Some(resolution);
        line
    }

    #[test]
    fn test_stale_cutoff_rejects_unrepresentable_thresholds() {
        let now = Utc::now();
        assert_eq!(stale_cutoff(now, 30), Some(now - TimeDelta::days(30)));
        assert_eq!(stale_cutoff(now, 1_000_000_000_000_000_000), None);
        assert_eq!(stale_cutoff(now, i64::MAX), None);
        assert_eq!(stale_cutoff(now, 100_000_000), None);
    }

    #[test]
    fn test_refund_needs_completion_timestamp() {
        let mut line = inspected(ReturnResolution::Refund);
        line.refund.net_amount = Some(Decimal::new(1850, 0));
        assert_eq!(
            require_resolved(&line).unwrap_err().code().as_str(),
            "REFUND_NOT_COMPLETED"
        );
        line.refund.completed_at = Some(Utc::now());
        assert!(require_resolved(&line).is_ok());
    }

    #[test]
    fn test_exchange_needs_linked_order() {
        let mut line = inspected(ReturnResolution::Exchange);
        assert_eq!(
            require_resolved(&line).unwrap_err().code().as_str(),
            "EXCHANGE_NOT_CREATED"
        );
        line.exchange.order_id = Some(OrderId::new(2));
        assert!(require_resolved(&line).is_ok());
    }
}
