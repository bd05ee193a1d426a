//! Staff return operations.
//!
//! Each command runs one engine operation against the returns database and
//! prints the result as JSON. Refusals print the `{ code, message }` body.
//!
//! # Usage
//!
//! ```bash
//! threadline returns initiate --staff 3 --line 101 --line 102:1 --reason size_too_small --resolution refund
//! threadline returns pickup 101 --staff 3
//! threadline returns receive 101 --staff 7 --condition resellable
//! threadline returns refund calculate 101 --staff 3 --gross 2000 --deductions 150 --method original_payment
//! threadline returns refund complete 101 --staff 3 --reference UTR123
//! threadline returns complete 101 --staff 3
//! threadline returns queue
//! ```

use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;
use rust_decimal::Decimal;
use serde::Serialize;

use threadline_core::{
    ItemCondition, LineId, PickupType, RefundAmounts, RefundMethod, ReturnReason,
    ReturnResolution, SkuId, StaffId,
};
use threadline_returns::config::ReturnsConfig;
use threadline_returns::db::{PgReturnStore, create_pool};
use threadline_returns::logistics::{CourierClient, LogisticsBooking, UnconfiguredLogistics};
use threadline_returns::services::returns::{
    CalculateRefund, CloseReturn, CompleteRefund, InitiateReturn, OverrideResolution,
    ReceiveReturn, ReturnLineRequest, SchedulePickup,
};
use threadline_returns::{ReturnEngine, ReturnError};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Subcommand)]
pub enum ReturnsAction {
    /// List open returns by the next action they need
    Queue,
    /// Check whether a line can be returned right now
    Eligibility { line: i32 },
    /// Open a return batch for lines of one order
    Initiate {
        #[arg(long)]
        staff: i32,
        /// `LINE` or `LINE:QTY`; repeat for each line. The first line anchors the batch.
        #[arg(long = "line", required = true, value_parser = parse_line_request)]
        lines: Vec<ReturnLineRequest>,
        #[arg(long)]
        reason: ReturnReason,
        #[arg(long)]
        reason_detail: Option<String>,
        #[arg(long)]
        resolution: ReturnResolution,
        /// Target SKU for exchanges
        #[arg(long)]
        exchange_sku: Option<i32>,
        #[arg(long)]
        pickup_type: Option<PickupType>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Schedule the pickup for a line's batch
    Pickup {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        pickup_type: Option<PickupType>,
        #[arg(long)]
        courier: Option<String>,
        #[arg(long)]
        awb: Option<String>,
        /// Force automatic booking on or off
        #[arg(long)]
        auto_book: Option<bool>,
    },
    /// Record warehouse receipt and inspection
    Receive {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        condition: ItemCondition,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Refund calculation and payout
    Refund {
        #[command(subcommand)]
        action: RefundAction,
    },
    /// Create the exchange order for a line
    Exchange {
        line: i32,
        #[arg(long)]
        staff: i32,
    },
    /// Switch a return between refund and exchange
    Override {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        resolution: ReturnResolution,
        #[arg(long)]
        exchange_sku: Option<i32>,
    },
    /// Close a resolved return
    Complete {
        line: i32,
        #[arg(long)]
        staff: i32,
    },
    /// Cancel an in-flight return
    Cancel {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject an in-flight return
    Reject {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        reason: String,
    },
    /// Force-close an in-flight return
    Archive {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        reason: String,
    },
    /// Replace the notes on an in-flight return
    Notes {
        line: i32,
        #[arg(long)]
        staff: i32,
        /// New notes; omit to clear
        #[arg(long)]
        text: Option<String>,
    },
    /// Show a line's return and its audit trail
    Show { line: i32 },
}

#[derive(Subcommand)]
pub enum RefundAction {
    /// Record refund figures and derive the net amount
    Calculate {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        gross: Decimal,
        #[arg(long, default_value = "0")]
        clawback: Decimal,
        #[arg(long, default_value = "0")]
        deductions: Decimal,
        #[arg(long)]
        deduction_notes: Option<String>,
        #[arg(long)]
        method: RefundMethod,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record that the refund was paid out
    Complete {
        line: i32,
        #[arg(long)]
        staff: i32,
        #[arg(long)]
        reference: Option<String>,
    },
}

/// Parse `LINE` or `LINE:QTY`.
fn parse_line_request(raw: &str) -> Result<ReturnLineRequest, String> {
    let (line, quantity) = match raw.split_once(':') {
        Some((line, qty)) => (
            line,
            Some(
                qty.trim()
                    .parse::<i32>()
                    .map_err(|e| format!("invalid quantity in '{raw}': {e}"))?,
            ),
        ),
        None => (raw, None),
    };
    let line_id = line
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid line id in '{raw}': {e}"))?;
    Ok(ReturnLineRequest {
        line_id: LineId::new(line_id),
        quantity,
    })
}

/// Build an engine on the configured database and courier.
async fn engine() -> Result<ReturnEngine, Box<dyn std::error::Error>> {
    let config = ReturnsConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let logistics: Arc<dyn LogisticsBooking> = match &config.logistics {
        Some(api) => Arc::new(CourierClient::new(&api.base_url, api.api_key.clone())?),
        None => Arc::new(UnconfiguredLogistics),
    };
    Ok(ReturnEngine::new(Arc::new(PgReturnStore::new(pool)), logistics))
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a domain refusal as its error body; pass infrastructure failures up.
fn finish<T: Serialize>(result: Result<T, ReturnError>) -> CommandResult {
    match result {
        Ok(value) => print_json(&value),
        Err(e) if e.is_unexpected() => Err(e.into()),
        Err(e) => {
            print_json(&e.body())?;
            Err(e.into())
        }
    }
}

#[derive(Serialize)]
struct Done {
    line_id: LineId,
    ok: bool,
}

const fn done(line: i32) -> Done {
    Done {
        line_id: LineId::new(line),
        ok: true,
    }
}

/// Run a returns subcommand.
///
/// # Errors
///
/// Returns an error if the engine cannot be built or the operation fails.
#[allow(clippy::too_many_lines)]
pub async fn run(action: ReturnsAction) -> CommandResult {
    let engine = engine().await?;

    match action {
        ReturnsAction::Queue => finish(engine.action_queue().await),
        ReturnsAction::Eligibility { line } => finish(engine.eligibility(LineId::new(line)).await),
        ReturnsAction::Initiate {
            staff,
            lines,
            reason,
            reason_detail,
            resolution,
            exchange_sku,
            pickup_type,
            notes,
        } => finish(
            engine
                .initiate_return(InitiateReturn {
                    lines,
                    reason,
                    reason_detail,
                    resolution,
                    exchange_sku_id: exchange_sku.map(SkuId::new),
                    pickup_type,
                    notes,
                    requested_by: StaffId::new(staff),
                })
                .await,
        ),
        ReturnsAction::Pickup {
            line,
            staff,
            pickup_type,
            courier,
            awb,
            auto_book,
        } => finish(
            engine
                .schedule_pickup(SchedulePickup {
                    pickup_type,
                    courier,
                    awb,
                    auto_book,
                    ..SchedulePickup::new(LineId::new(line), Some(StaffId::new(staff)))
                })
                .await,
        ),
        ReturnsAction::Receive {
            line,
            staff,
            condition,
            notes,
        } => finish(
            engine
                .receive_return(ReceiveReturn {
                    line_id: LineId::new(line),
                    condition,
                    notes,
                    received_by: StaffId::new(staff),
                })
                .await,
        ),
        ReturnsAction::Refund { action } => match action {
            RefundAction::Calculate {
                line,
                staff,
                gross,
                clawback,
                deductions,
                deduction_notes,
                method,
                notes,
            } => finish(
                engine
                    .calculate_refund(CalculateRefund {
                        line_id: LineId::new(line),
                        amounts: RefundAmounts::new(gross, clawback, deductions),
                        deduction_notes,
                        method,
                        notes,
                        actor: StaffId::new(staff),
                    })
                    .await,
            ),
            RefundAction::Complete {
                line,
                staff,
                reference,
            } => finish(
                engine
                    .complete_refund(CompleteRefund {
                        line_id: LineId::new(line),
                        reference,
                        completed_at: Some(Utc::now()),
                        actor: StaffId::new(staff),
                    })
                    .await
                    .map(|()| done(line)),
            ),
        },
        ReturnsAction::Exchange { line, staff } => finish(
            engine
                .create_exchange(LineId::new(line), Some(StaffId::new(staff)))
                .await,
        ),
        ReturnsAction::Override {
            line,
            staff,
            resolution,
            exchange_sku,
        } => finish(
            engine
                .override_resolution(OverrideResolution {
                    line_id: LineId::new(line),
                    resolution,
                    exchange_sku_id: exchange_sku.map(SkuId::new),
                    actor: StaffId::new(staff),
                })
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Complete { line, staff } => finish(
            engine
                .complete_return(LineId::new(line), StaffId::new(staff))
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Cancel {
            line,
            staff,
            reason,
        } => finish(
            engine
                .cancel_return(LineId::new(line), StaffId::new(staff), reason)
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Reject {
            line,
            staff,
            reason,
        } => finish(
            engine
                .reject_return(CloseReturn {
                    line_id: LineId::new(line),
                    actor: StaffId::new(staff),
                    reason,
                })
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Archive {
            line,
            staff,
            reason,
        } => finish(
            engine
                .archive_return(CloseReturn {
                    line_id: LineId::new(line),
                    actor: StaffId::new(staff),
                    reason,
                })
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Notes { line, staff, text } => finish(
            engine
                .update_notes(LineId::new(line), text, StaffId::new(staff))
                .await
                .map(|()| done(line)),
        ),
        ReturnsAction::Show { line } => {
            let line_id = LineId::new(line);
            let store = engine.store();
            let Some(record) = store.line(line_id).await? else {
                return finish::<()>(Err(ReturnError::LineNotFound(line_id)));
            };
            let events = store.line_events(line_id).await?;
            let qc_items = store.qc_items(line_id).await?;
            print_json(&serde_json::json!({
                "line": record,
                "events": events,
                "qc_items": qc_items,
            }))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_without_quantity() {
        let request = parse_line_request("101").unwrap();
        assert_eq!(request.line_id, LineId::new(101));
        assert_eq!(request.quantity, None);
    }

    #[test]
    fn test_parse_line_with_quantity() {
        let request = parse_line_request("102:1").unwrap();
        assert_eq!(request.line_id, LineId::new(102));
        assert_eq!(request.quantity, Some(1));
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line_request("abc").is_err());
        assert!(parse_line_request("5:x").is_err());
    }
}
