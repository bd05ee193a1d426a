//! Pickup scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use threadline_core::{BatchNumber, LineId, PickupType, ReturnStatus, StaffId};

use super::{ReturnEngine, Transition, lock_line, require_status};
use crate::error::ReturnError;
use crate::logistics::PickupRequest;
use crate::models::ReturnEvent;

/// Request to schedule the pickup for a line's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePickup {
    pub line_id: LineId,
    /// Overrides the type hinted at initiation.
    pub pickup_type: Option<PickupType>,
    /// Manually entered courier.
    pub courier: Option<String>,
    /// Manually entered tracking number.
    pub awb: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Force automatic booking on or off; inferred when `None`.
    pub auto_book: Option<bool>,
    pub actor: Option<StaffId>,
}

impl SchedulePickup {
    /// Pickup type to use when neither the request nor the line names one.
    const DEFAULT_TYPE: PickupType = PickupType::ArrangedByUs;

    /// A request that lets the engine infer everything.
    #[must_use]
    pub const fn new(line_id: LineId, actor: Option<StaffId>) -> Self {
        Self {
            line_id,
            pickup_type: None,
            courier: None,
            awb: None,
            scheduled_at: None,
            auto_book: None,
            actor,
        }
    }

    /// Whether to book through the logistics service.
    ///
    /// An explicit flag wins. Otherwise we book when we arrange the pickup
    /// ourselves and no AWB was typed in.
    #[must_use]
    pub fn should_auto_book(&self, pickup_type: PickupType) -> bool {
        self.auto_book
            .unwrap_or(pickup_type == PickupType::ArrangedByUs && self.awb.is_none())
    }
}

/// Result of scheduling a pickup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledPickup {
    pub batch_number: BatchNumber,
    /// Lines moved to `approved`: every batch line that was still `requested`.
    pub updated_lines: Vec<LineId>,
    pub pickup_type: PickupType,
    pub courier: Option<String>,
    pub awb: Option<String>,
    /// Whether the courier was booked through the logistics service.
    pub booked: bool,
}

impl ReturnEngine {
    /// Schedule the pickup for a line and every other still-`requested` line
    /// of its batch.
    ///
    /// With automatic booking, the courier is booked between a read and a
    /// write transaction; a failed booking changes nothing.
    ///
    /// # Errors
    ///
    /// - `WRONG_STATUS`: the line is not `requested`
    /// - `NO_ACTIVE_RETURN`: the line has no return
    /// - `PICKUP_BOOKING_FAILED`: the logistics service refused or failed
    #[instrument(skip(self, request), fields(line_id = %request.line_id))]
    pub async fn schedule_pickup(
        &self,
        request: SchedulePickup,
    ) -> Result<ScheduledPickup, ReturnError> {
        let (batch_number, order_id, pickup_type) = {
            let mut tx = self.store.begin().await?;
            let line = lock_line(tx.as_mut(), request.line_id).await?;
            require_status(&line, ReturnStatus::Requested)?;
            let batch_number = line.batch_number.clone().ok_or_else(|| {
                ReturnError::Unknown(format!("requested line {} has no batch", line.id))
            })?;
            let pickup_type = request
                .pickup_type
                .or(line.pickup.pickup_type)
                .unwrap_or(SchedulePickup::DEFAULT_TYPE);
            (batch_number, line.order_id, pickup_type)
        };

        let booked = request.should_auto_book(pickup_type);
        let (courier, awb, scheduled_at) = if booked {
            let booking = self
                .logistics
                .book_pickup(&PickupRequest {
                    line_id: request.line_id,
                    batch_number: batch_number.clone(),
                    order_id,
                    pickup_type,
                })
                .await
                .map_err(|e| {
                    warn!(batch = %batch_number, error = %e, "Pickup booking failed");
                    ReturnError::PickupBookingFailed(e.to_string())
                })?;
            (
                Some(booking.courier),
                Some(booking.awb),
                booking.scheduled_at.or(request.scheduled_at),
            )
        } else {
            (
                request.courier.clone(),
                request.awb.clone(),
                request.scheduled_at,
            )
        };

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let lines = tx.lock_batch_lines(&batch_number).await?;

        // Re-check under lock: another scheduler may have won the race.
        let trigger = match lines.iter().find(|l| l.id == request.line_id) {
            Some(line) => line.clone(),
            None => lock_line(tx.as_mut(), request.line_id).await?,
        };
        require_status(&trigger, ReturnStatus::Requested)?;

        let mut transition = Transition::new(request.actor, now);
        let mut updated = Vec::new();
        for mut line in lines {
            if line.status != Some(ReturnStatus::Requested) {
                continue;
            }
            line.status = Some(ReturnStatus::Approved);
            line.pickup.pickup_type = Some(pickup_type);
            line.pickup.courier.clone_from(&courier);
            line.pickup.awb.clone_from(&awb);
            line.pickup.scheduled_at = scheduled_at;

            transition.record(ReturnEvent::PickupScheduled {
                line_id: line.id,
                batch: batch_number.clone(),
                courier: courier.clone(),
                awb: awb.clone(),
                booked,
            });
            updated.push(line.id);
            transition.save_with_status(line);
        }
        transition.commit(tx.as_mut()).await?;

        info!(
            batch = %batch_number,
            lines = updated.len(),
            booked,
            awb = ?awb,
            "Pickup scheduled"
        );

        Ok(ScheduledPickup {
            batch_number,
            updated_lines: updated,
            pickup_type,
            courier,
            awb,
            booked,
        })
    }
}
