//! The return-augmented order line.
//!
//! Return data lives on the order line row itself rather than in a separate
//! table, so dashboards can read a line and its return in one row. The
//! append-only event log is the audit trail of record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use threadline_core::{
    BatchNumber, ItemCondition, LineId, OrderId, PickupType, RefundAmounts, RefundMethod,
    ReturnReason, ReturnResolution, ReturnStatus, SkuId, StaffId,
};

/// An order line together with its (optional) return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnableLine {
    /// Line ID.
    pub id: LineId,
    /// Parent order.
    pub order_id: OrderId,
    /// SKU that was sold on this line.
    pub sku_id: SkuId,
    /// Units ordered.
    pub quantity: i32,
    /// Price actually charged per unit, after line discounts.
    pub unit_price: Decimal,
    /// When the parcel was delivered to the customer.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Line-level "final sale" override.
    pub non_returnable: bool,

    /// Units being returned; fixed at initiation.
    pub return_qty: Option<i32>,
    /// Batch shared with the other lines initiated together.
    pub batch_number: Option<BatchNumber>,
    /// Lifecycle status; `None` if the line never had a return.
    pub status: Option<ReturnStatus>,
    /// Reason category.
    pub reason: Option<ReturnReason>,
    /// Free-text reason detail.
    pub reason_detail: Option<String>,
    /// Refund or exchange.
    pub resolution: Option<ReturnResolution>,
    /// When the return was requested.
    pub requested_at: Option<DateTime<Utc>>,
    /// Staff member who raised the request.
    pub requested_by: Option<StaffId>,
    /// Staff-editable notes.
    pub notes: Option<String>,

    pub pickup: PickupDetails,
    pub inspection: InspectionDetails,
    pub refund: RefundDetails,
    pub exchange: ExchangeDetails,
    pub closure: ClosureDetails,
}

/// Reverse logistics data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupDetails {
    pub pickup_type: Option<PickupType>,
    pub courier: Option<String>,
    pub awb: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
}

/// Warehouse receipt and inspection data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionDetails {
    pub condition: Option<ItemCondition>,
    pub notes: Option<String>,
    pub inspected_at: Option<DateTime<Utc>>,
    /// Staff member who received and inspected the parcel.
    pub received_by: Option<StaffId>,
}

/// Refund calculation and payout data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDetails {
    pub gross_amount: Option<Decimal>,
    pub discount_clawback: Option<Decimal>,
    pub deductions: Option<Decimal>,
    pub deduction_notes: Option<String>,
    /// Always `gross - clawback - deductions`; written only by the calculator.
    pub net_amount: Option<Decimal>,
    pub method: Option<RefundMethod>,
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reference: Option<String>,
}

impl RefundDetails {
    /// The recorded calculation inputs, if all three are present.
    #[must_use]
    pub const fn amounts(&self) -> Option<RefundAmounts> {
        match (self.gross_amount, self.discount_clawback, self.deductions) {
            (Some(gross), Some(clawback), Some(deductions)) => {
                Some(RefundAmounts::new(gross, clawback, deductions))
            }
            _ => None,
        }
    }

    /// Whether the calculator has run.
    #[must_use]
    pub const fn is_calculated(&self) -> bool {
        self.net_amount.is_some()
    }
}

/// Linked exchange order data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDetails {
    /// SKU the customer wants instead.
    pub sku_id: Option<SkuId>,
    /// Exchange order created for this line.
    pub order_id: Option<OrderId>,
    /// `exchange total - original total`; positive means the customer owes us.
    pub price_diff: Option<Decimal>,
}

/// Terminal-state bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureDetails {
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<StaffId>,
    pub reason: Option<String>,
}

impl ReturnableLine {
    /// A delivered line with no return history.
    #[must_use]
    pub fn new(
        id: LineId,
        order_id: OrderId,
        sku_id: SkuId,
        quantity: i32,
        unit_price: Decimal,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            order_id,
            sku_id,
            quantity,
            unit_price,
            delivered_at,
            non_returnable: false,
            return_qty: None,
            batch_number: None,
            status: None,
            reason: None,
            reason_detail: None,
            resolution: None,
            requested_at: None,
            requested_by: None,
            notes: None,
            pickup: PickupDetails::default(),
            inspection: InspectionDetails::default(),
            refund: RefundDetails::default(),
            exchange: ExchangeDetails::default(),
            closure: ClosureDetails::default(),
        }
    }

    /// Whether the line currently has an in-flight return.
    #[must_use]
    pub fn has_active_return(&self) -> bool {
        self.status.is_some_and(|s| s.is_active())
    }

    /// Units being returned, falling back to the full line quantity.
    #[must_use]
    pub fn effective_return_qty(&self) -> i32 {
        self.return_qty.unwrap_or(self.quantity)
    }

    /// Clear every return field so a new return can start from scratch.
    ///
    /// Only called at initiation, after eligibility has confirmed the previous
    /// return (if any) is terminal. Its history stays in the event log.
    pub fn reset_return(&mut self) {
        self.return_qty = None;
        self.batch_number = None;
        self.status = None;
        self.reason = None;
        self.reason_detail = None;
        self.resolution = None;
        self.requested_at = None;
        self.requested_by = None;
        self.notes = None;
        self.pickup = PickupDetails::default();
        self.inspection = InspectionDetails::default();
        self.refund = RefundDetails::default();
        self.exchange = ExchangeDetails::default();
        self.closure = ClosureDetails::default();
    }

    /// Move into a terminal state, recording who closed it and why.
    ///
    /// `actor` is `None` for system closures such as the stale-request sweep.
    pub fn close(
        &mut self,
        status: ReturnStatus,
        actor: Option<StaffId>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = Some(status);
        self.closure = ClosureDetails {
            closed_at: Some(at),
            closed_by: actor,
            reason,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> ReturnableLine {
        ReturnableLine::new(
            LineId::new(1),
            OrderId::new(10),
            SkuId::new(100),
            2,
            Decimal::new(999, 0),
            None,
        )
    }

    #[test]
    fn test_new_line_has_no_return() {
        let line = line();
        assert!(line.status.is_none());
        assert!(!line.has_active_return());
        assert_eq!(line.effective_return_qty(), 2);
    }

    #[test]
    fn test_terminal_status_is_not_active() {
        let mut line = line();
        line.status = Some(ReturnStatus::Approved);
        assert!(line.has_active_return());
        line.close(ReturnStatus::Cancelled, Some(StaffId::new(5)), None, Utc::now());
        assert!(!line.has_active_return());
        assert_eq!(line.closure.closed_by, Some(StaffId::new(5)));
    }

    #[test]
    fn test_reset_return_clears_previous_cycle() {
        let mut line = line();
        line.status = Some(ReturnStatus::Cancelled);
        line.return_qty = Some(1);
        line.exchange.order_id = Some(OrderId::new(99));
        line.refund.net_amount = Some(Decimal::ONE);
        line.reset_return();
        assert_eq!(line.status, None);
        assert_eq!(line.return_qty, None);
        assert_eq!(line.exchange, ExchangeDetails::default());
        assert!(!line.refund.is_calculated());
    }

    #[test]
    fn test_refund_amounts_need_all_inputs() {
        let mut refund = RefundDetails {
            gross_amount: Some(Decimal::new(2000, 0)),
            deductions: Some(Decimal::new(150, 0)),
            ..RefundDetails::default()
        };
        assert!(refund.amounts().is_none());
        refund.discount_clawback = Some(Decimal::ZERO);
        assert_eq!(refund.amounts().map(|a| a.net()), Some(Decimal::new(1850, 0)));
    }
}
