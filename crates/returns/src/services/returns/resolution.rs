//! Refund calculation and exchange creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use threadline_core::{
    LineId, MONEY_SCALE, OrderId, RefundAmounts, RefundMethod, ReturnResolution, ReturnStatus,
    SkuId, StaffId,
};

use super::{ReturnEngine, Transition, lock_line, require_active};
use crate::error::ReturnError;
use crate::models::{NewExchangeOrder, ReturnEvent, ReturnableLine, Sku};

/// Refund figures entered by staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateRefund {
    pub line_id: LineId,
    pub amounts: RefundAmounts,
    pub deduction_notes: Option<String>,
    pub method: RefundMethod,
    pub notes: Option<String>,
    pub actor: StaffId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundCalculation {
    pub line_id: LineId,
    pub net_amount: Decimal,
}

/// Confirmation that the refund has been paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRefund {
    pub line_id: LineId,
    /// Payment gateway or bank reference.
    pub reference: Option<String>,
    /// Defaults to now.
    pub completed_at: Option<DateTime<Utc>>,
    pub actor: StaffId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedExchange {
    pub line_id: LineId,
    pub exchange_order_id: OrderId,
    pub exchange_order_number: String,
    /// Positive when the customer owes the difference.
    pub price_diff: Decimal,
}

/// Staff switch between refund and exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideResolution {
    pub line_id: LineId,
    pub resolution: ReturnResolution,
    /// Required when switching to `exchange` and the line has no target yet.
    pub exchange_sku_id: Option<SkuId>,
    pub actor: StaffId,
}

/// Unit price charged on the exchange order.
///
/// Same variation keeps what the customer actually paid; a different
/// variation is charged at its list price.
fn exchange_unit_price(line: &ReturnableLine, original: &Sku, exchange: &Sku) -> Decimal {
    if original.variation_id == exchange.variation_id {
        line.unit_price
    } else {
        exchange.mrp
    }
}

fn require_refund_resolution(line: &ReturnableLine) -> Result<(), ReturnError> {
    match line.resolution {
        Some(ReturnResolution::Refund) => Ok(()),
        Some(resolution) => Err(ReturnError::NotRefundResolution {
            line_id: line.id,
            resolution,
        }),
        None => Err(ReturnError::NoActiveReturn(line.id)),
    }
}

fn refund_already_completed(line: &ReturnableLine, status: ReturnStatus) -> ReturnError {
    ReturnError::WrongStatus {
        line_id: line.id,
        actual: status,
        expected: "refund not yet completed".to_string(),
    }
}

impl ReturnEngine {
    /// Record refund figures and derive the net amount.
    ///
    /// Does not move the lifecycle forward. Can be re-run to correct figures
    /// until the refund is completed.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `NOT_REFUND_RESOLUTION`
    /// - `WRONG_STATUS`: the refund was already completed
    /// - `INVALID_AMOUNT`: a negative input, an input finer than a paisa, or a
    ///   negative net
    #[instrument(skip(self, request), fields(line_id = %request.line_id))]
    pub async fn calculate_refund(
        &self,
        request: CalculateRefund,
    ) -> Result<RefundCalculation, ReturnError> {
        let amounts = request.amounts;
        if amounts.has_negative_input() {
            return Err(ReturnError::InvalidAmount(
                "refund amounts cannot be negative".to_string(),
            ));
        }
        if amounts.has_sub_cent_input() {
            return Err(ReturnError::InvalidAmount(format!(
                "refund amounts allow at most {MONEY_SCALE} decimal places"
            )));
        }
        let net = amounts.net();
        if net < Decimal::ZERO {
            return Err(ReturnError::InvalidAmount(format!(
                "net refund would be {net}"
            )));
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), request.line_id).await?;
        let status = require_active(&line)?;
        require_refund_resolution(&line)?;
        if line.refund.completed_at.is_some() {
            return Err(refund_already_completed(&line, status));
        }

        line.refund.gross_amount = Some(amounts.gross);
        line.refund.discount_clawback = Some(amounts.discount_clawback);
        line.refund.deductions = Some(amounts.deductions);
        line.refund.deduction_notes = request.deduction_notes;
        line.refund.net_amount = Some(net);
        line.refund.method = Some(request.method);
        line.refund.notes = request.notes;

        let mut transition = Transition::new(Some(request.actor), now);
        transition.record(ReturnEvent::RefundCalculated {
            line_id: line.id,
            net_amount: net,
        });
        transition.save(line);
        transition.commit(tx.as_mut()).await?;

        info!(net_amount = %net, method = %request.method, "Refund calculated");
        Ok(RefundCalculation {
            line_id: request.line_id,
            net_amount: net,
        })
    }

    /// Record that the calculated refund was paid out.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `NOT_REFUND_RESOLUTION`
    /// - `REFUND_NOT_CALCULATED`
    /// - `WRONG_STATUS`: already completed
    #[instrument(skip(self, request), fields(line_id = %request.line_id))]
    pub async fn complete_refund(&self, request: CompleteRefund) -> Result<(), ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), request.line_id).await?;
        let status = require_active(&line)?;
        require_refund_resolution(&line)?;
        if !line.refund.is_calculated() {
            return Err(ReturnError::RefundNotCalculated(line.id));
        }
        if line.refund.completed_at.is_some() {
            return Err(refund_already_completed(&line, status));
        }

        line.refund.completed_at = Some(request.completed_at.unwrap_or(now));
        line.refund.reference.clone_from(&request.reference);

        let mut transition = Transition::new(Some(request.actor), now);
        transition.record(ReturnEvent::RefundCompleted {
            line_id: line.id,
            reference: request.reference,
        });
        transition.save(line);
        transition.commit(tx.as_mut()).await?;

        info!("Refund completed");
        Ok(())
    }

    /// Create the exchange order for a line and link it back.
    ///
    /// The new order and the line update commit together. Called right after
    /// initiation for the batch's first line, by the outbox worker on retry,
    /// and by staff for the other lines of an exchange batch.
    ///
    /// # Errors
    ///
    /// - `LINE_NOT_FOUND`
    /// - `EXCHANGE_ALREADY_CREATED`
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `EXCHANGE_SKU_NOT_FOUND`: no target SKU recorded, or it vanished
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn create_exchange(
        &self,
        line_id: LineId,
        actor: Option<StaffId>,
    ) -> Result<CreatedExchange, ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), line_id).await?;
        if line.exchange.order_id.is_some() {
            return Err(ReturnError::ExchangeAlreadyCreated(line_id));
        }
        require_active(&line)?;

        let exchange_sku_id = line
            .exchange
            .sku_id
            .ok_or(ReturnError::ExchangeSkuNotFound(None))?;
        let exchange_sku = tx
            .sku(exchange_sku_id)
            .await?
            .ok_or(ReturnError::ExchangeSkuNotFound(Some(exchange_sku_id)))?;
        let original_sku = tx.sku(line.sku_id).await?.ok_or_else(|| {
            ReturnError::Unknown(format!("SKU {} of line {line_id} is missing", line.sku_id))
        })?;
        let order = tx.lock_order(line.order_id).await?.ok_or_else(|| {
            ReturnError::Unknown(format!("order {} of line {line_id} is missing", line.order_id))
        })?;

        let quantity = line.effective_return_qty();
        let unit_price = exchange_unit_price(&line, &original_sku, &exchange_sku);
        let qty = Decimal::from(quantity);
        let price_diff = unit_price * qty - line.unit_price * qty;

        let new_order = NewExchangeOrder {
            number: NewExchangeOrder::number_for(&order, line_id),
            customer_id: order.customer_id,
            original_order_id: order.id,
            sku_id: exchange_sku.id,
            quantity,
            unit_price,
        };
        let exchange_order_id = tx.insert_exchange_order(&new_order).await?;

        line.exchange.order_id = Some(exchange_order_id);
        line.exchange.price_diff = Some(price_diff);

        let mut transition = Transition::new(actor, now);
        transition.record(ReturnEvent::ExchangeCreated {
            line_id,
            exchange_order_id,
            customer_id: order.customer_id,
            price_diff,
        });
        transition.save(line);
        transition.commit(tx.as_mut()).await?;

        info!(
            exchange_order_id = %exchange_order_id,
            order_number = %new_order.number,
            price_diff = %price_diff,
            "Exchange order created"
        );

        Ok(CreatedExchange {
            line_id,
            exchange_order_id,
            exchange_order_number: new_order.number,
            price_diff,
        })
    }

    /// Switch a return between refund and exchange.
    ///
    /// Switching to the current resolution is a no-op.
    ///
    /// # Errors
    ///
    /// - `NO_ACTIVE_RETURN`, `ALREADY_TERMINAL`
    /// - `EXCHANGE_ALREADY_CREATED`: an exchange order is linked
    /// - `WRONG_STATUS`: the refund was already paid out
    /// - `EXCHANGE_SKU_NOT_FOUND`: switching to exchange without a valid SKU
    #[instrument(skip(self, request), fields(line_id = %request.line_id, to = %request.resolution))]
    pub async fn override_resolution(
        &self,
        request: OverrideResolution,
    ) -> Result<(), ReturnError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut line = lock_line(tx.as_mut(), request.line_id).await?;
        let status = require_active(&line)?;
        let Some(from) = line.resolution else {
            return Err(ReturnError::NoActiveReturn(line.id));
        };
        if from == request.resolution {
            return Ok(());
        }
        if line.exchange.order_id.is_some() {
            return Err(ReturnError::ExchangeAlreadyCreated(line.id));
        }
        if line.refund.completed_at.is_some() {
            return Err(refund_already_completed(&line, status));
        }

        match request.resolution {
            ReturnResolution::Exchange => {
                let sku_id = request
                    .exchange_sku_id
                    .or(line.exchange.sku_id)
                    .ok_or(ReturnError::ExchangeSkuNotFound(None))?;
                if tx.sku(sku_id).await?.is_none() {
                    return Err(ReturnError::ExchangeSkuNotFound(Some(sku_id)));
                }
                line.exchange.sku_id = Some(sku_id);
            }
            ReturnResolution::Refund => {
                line.exchange.sku_id = None;
            }
        }
        line.resolution = Some(request.resolution);

        let mut transition = Transition::new(Some(request.actor), now);
        transition.record(ReturnEvent::ResolutionOverridden {
            line_id: line.id,
            from,
            to: request.resolution,
        });
        transition.save(line);
        transition.commit(tx.as_mut()).await?;

        info!(from = %from, "Resolution overridden");
        Ok(())
    }
}
