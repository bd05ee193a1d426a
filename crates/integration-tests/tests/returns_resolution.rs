//! Integration tests for refunds, exchanges and completion.

#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;
use threadline_core::{
    ItemCondition, LineId, RefundAmounts, RefundMethod, ReturnErrorCode, ReturnResolution,
    ReturnStatus, SkuId,
};
use threadline_integration_tests::{
    CUSTOMER, LINE_A, LINE_B, LINE_C, ORDER, SKU_BLUE_L, SKU_RED_M, STAFF, TestContext,
};
use threadline_returns::services::returns::{
    CalculateRefund, CompleteRefund, OverrideResolution, ReceiveReturn,
};

fn amounts(gross: i64, clawback: i64, deductions: i64) -> RefundAmounts {
    RefundAmounts::new(
        Decimal::new(gross, 0),
        Decimal::new(clawback, 0),
        Decimal::new(deductions, 0),
    )
}

fn calculate(line_id: LineId, amounts: RefundAmounts) -> CalculateRefund {
    CalculateRefund {
        line_id,
        amounts,
        deduction_notes: Some("missing tag".to_string()),
        method: RefundMethod::OriginalPayment,
        notes: None,
        actor: STAFF,
    }
}

fn complete_refund(line_id: LineId) -> CompleteRefund {
    CompleteRefund {
        line_id,
        reference: Some("pay_NX81".to_string()),
        completed_at: None,
        actor: STAFF,
    }
}

async fn receive(ctx: &TestContext, line_id: LineId) {
    ctx.engine
        .receive_return(ReceiveReturn {
            line_id,
            condition: ItemCondition::Resellable,
            notes: None,
            received_by: STAFF,
        })
        .await
        .expect("received");
}

// =============================================================================
// Refunds
// =============================================================================

#[tokio::test]
async fn test_refund_lifecycle_to_complete() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    receive(&ctx, LINE_B).await;

    let calculation = ctx
        .engine
        .calculate_refund(calculate(LINE_B, amounts(2000, 0, 150)))
        .await
        .expect("calculated");
    assert_eq!(calculation.net_amount, Decimal::new(1850, 0));

    let err = ctx.engine.complete_return(LINE_B, STAFF).await.unwrap_err();
    assert_eq!(err.code(), ReturnErrorCode::RefundNotCompleted);

    ctx.engine
        .complete_refund(complete_refund(LINE_B))
        .await
        .expect("refund completed");
    ctx.engine
        .complete_return(LINE_B, STAFF)
        .await
        .expect("return completed");

    let line = ctx.line(LINE_B).await.expect("line exists");
    assert_eq!(line.status, Some(ReturnStatus::Complete));
    assert_eq!(line.refund.net_amount, Some(Decimal::new(1850, 0)));
    assert_eq!(line.refund.reference.as_deref(), Some("pay_NX81"));
    assert!(line.refund.completed_at.is_some());
    assert_eq!(line.closure.closed_by, Some(STAFF));
}

#[tokio::test]
async fn test_recalculation_replaces_figures() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");

    ctx.engine
        .calculate_refund(calculate(LINE_B, amounts(1500, 0, 0)))
        .await
        .expect("first calculation");
    let second = ctx
        .engine
        .calculate_refund(calculate(LINE_B, amounts(1500, 200, 100)))
        .await
        .expect("second calculation");

    assert_eq!(second.net_amount, Decimal::new(1200, 0));
    let line = ctx.line(LINE_B).await.expect("line exists");
    assert_eq!(line.refund.discount_clawback, Some(Decimal::new(200, 0)));
    assert_eq!(line.refund.net_amount, Some(Decimal::new(1200, 0)));
    // Calculating does not move the lifecycle.
    assert_eq!(line.status, Some(ReturnStatus::Requested));
}

#[tokio::test]
async fn test_negative_amounts_are_invalid() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");

    let negative_input = ctx
        .engine
        .calculate_refund(calculate(LINE_B, amounts(1500, -10, 0)))
        .await
        .unwrap_err();
    let negative_net = ctx
        .engine
        .calculate_refund(calculate(LINE_B, amounts(100, 50, 100)))
        .await
        .unwrap_err();

    assert_eq!(negative_input.code(), ReturnErrorCode::InvalidAmount);
    assert_eq!(negative_net.code(), ReturnErrorCode::InvalidAmount);
    let line = ctx.line(LINE_B).await.expect("line exists");
    assert!(!line.refund.is_calculated());
}

#[tokio::test]
async fn test_refund_amounts_finer_than_paise_are_rejected() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    let fine = RefundAmounts::new(Decimal::new(1_006, 3), Decimal::new(4, 3), Decimal::new(4, 3));

    let err = ctx
        .engine
        .calculate_refund(calculate(LINE_B, fine))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::InvalidAmount);
    assert!(!ctx.line(LINE_B).await.expect("line exists").refund.is_calculated());

    let whole = RefundAmounts::new(Decimal::new(1_500_000, 3), Decimal::new(250, 2), Decimal::ZERO);
    let calculated = ctx
        .engine
        .calculate_refund(calculate(LINE_B, whole))
        .await
        .expect("trailing zeros are fine");
    assert_eq!(calculated.net_amount, Decimal::new(149_750, 2));
}

#[tokio::test]
async fn test_refund_must_be_calculated_before_completion() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");

    let err = ctx
        .engine
        .complete_refund(complete_refund(LINE_B))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::RefundNotCalculated);
}

#[tokio::test]
async fn test_completed_refund_is_frozen() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    ctx.engine
        .calculate_refund(calculate(LINE_B, amounts(1500, 0, 0)))
        .await
        .expect("calculated");
    ctx.engine
        .complete_refund(complete_refund(LINE_B))
        .await
        .expect("refund completed");

    let recalc = ctx
        .engine
        .calculate_refund(calculate(LINE_B, amounts(1000, 0, 0)))
        .await
        .unwrap_err();
    let again = ctx
        .engine
        .complete_refund(complete_refund(LINE_B))
        .await
        .unwrap_err();

    assert_eq!(recalc.code(), ReturnErrorCode::WrongStatus);
    assert_eq!(again.code(), ReturnErrorCode::WrongStatus);
}

#[tokio::test]
async fn test_refund_on_exchange_line_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.initiate(&[LINE_A], ReturnResolution::Exchange, Some(SKU_BLUE_L))
        .await
        .expect("batch initiated");

    let err = ctx
        .engine
        .calculate_refund(calculate(LINE_A, amounts(2000, 0, 0)))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::NotRefundResolution);
}

#[tokio::test]
async fn test_completion_requires_inspection() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    ctx.engine
        .calculate_refund(calculate(LINE_B, amounts(1500, 0, 0)))
        .await
        .expect("calculated");
    ctx.engine
        .complete_refund(complete_refund(LINE_B))
        .await
        .expect("refund completed");

    let err = ctx.engine.complete_return(LINE_B, STAFF).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::WrongStatus);
}

// =============================================================================
// Exchanges
// =============================================================================

#[tokio::test]
async fn test_same_variation_exchange_keeps_paid_price() {
    let ctx = TestContext::new().await;

    let batch = ctx
        .initiate(&[LINE_A], ReturnResolution::Exchange, Some(SKU_BLUE_L))
        .await
        .expect("batch initiated");

    let exchange_order_id = batch.exchange_order_id.expect("exchange created inline");
    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.exchange.order_id, Some(exchange_order_id));
    assert_eq!(line.exchange.price_diff, Some(Decimal::ZERO));

    let order = ctx
        .store
        .orders()
        .await
        .into_iter()
        .find(|o| o.id == exchange_order_id)
        .expect("exchange order stored");
    assert_eq!(order.number, "64168-EX-11");
    assert!(order.is_exchange);
    assert_eq!(order.original_order_id, Some(ORDER));
    assert_eq!(order.customer_id, CUSTOMER);

    let exchange_lines = ctx.store.order_lines(exchange_order_id).await;
    assert_eq!(exchange_lines.len(), 1);
    let exchange_line = exchange_lines.first().expect("exchange line");
    assert_eq!(exchange_line.sku_id, SKU_BLUE_L);
    assert_eq!(exchange_line.quantity, 2);
    assert_eq!(exchange_line.unit_price, Decimal::new(2000, 0));

    assert_eq!(
        ctx.customer(CUSTOMER).await.expect("customer").exchange_count,
        1
    );
}

#[tokio::test]
async fn test_cross_variation_exchange_charges_list_price() {
    let ctx = TestContext::new().await;

    ctx.initiate(&[LINE_C], ReturnResolution::Exchange, Some(SKU_RED_M))
        .await
        .expect("batch initiated");

    let line = ctx.line(LINE_C).await.expect("line exists");
    // Red M lists at 2799; blue L was bought at 1800.
    assert_eq!(line.exchange.price_diff, Some(Decimal::new(999, 0)));

    // Two units of blue M bought at 2000 each.
    ctx.initiate(&[LINE_A], ReturnResolution::Exchange, Some(SKU_RED_M))
        .await
        .expect("batch initiated");
    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.exchange.price_diff, Some(Decimal::new(1598, 0)));
}

#[tokio::test]
async fn test_exchange_is_created_once() {
    let ctx = TestContext::new().await;
    ctx.initiate(&[LINE_A], ReturnResolution::Exchange, Some(SKU_BLUE_L))
        .await
        .expect("batch initiated");

    let err = ctx
        .engine
        .create_exchange(LINE_A, Some(STAFF))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::ExchangeAlreadyCreated);
    let exchange_orders = ctx
        .store
        .orders()
        .await
        .into_iter()
        .filter(|o| o.is_exchange)
        .count();
    assert_eq!(exchange_orders, 1);
}

#[tokio::test]
async fn test_only_anchor_line_gets_automatic_exchange() {
    let ctx = TestContext::new().await;
    ctx.initiate(&[LINE_A, LINE_C], ReturnResolution::Exchange, Some(SKU_BLUE_L))
        .await
        .expect("batch initiated");
    receive(&ctx, LINE_C).await;

    let line = ctx.line(LINE_C).await.expect("line exists");
    assert_eq!(line.exchange.order_id, None);
    let err = ctx.engine.complete_return(LINE_C, STAFF).await.unwrap_err();
    assert_eq!(err.code(), ReturnErrorCode::ExchangeNotCreated);

    let created = ctx
        .engine
        .create_exchange(LINE_C, Some(STAFF))
        .await
        .expect("exchange created");
    assert_eq!(created.exchange_order_number, "64168-EX-13");

    ctx.engine
        .complete_return(LINE_C, STAFF)
        .await
        .expect("return completed");
    assert_eq!(ctx.status(LINE_C).await, Some(ReturnStatus::Complete));
    assert_eq!(
        ctx.customer(CUSTOMER).await.expect("customer").exchange_count,
        2
    );
}

// =============================================================================
// Resolution override
// =============================================================================

#[tokio::test]
async fn test_override_refund_to_exchange() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_C]).await.expect("batch initiated");

    ctx.engine
        .override_resolution(OverrideResolution {
            line_id: LINE_C,
            resolution: ReturnResolution::Exchange,
            exchange_sku_id: Some(SKU_BLUE_L),
            actor: STAFF,
        })
        .await
        .expect("overridden");

    let line = ctx.line(LINE_C).await.expect("line exists");
    assert_eq!(line.resolution, Some(ReturnResolution::Exchange));
    assert_eq!(line.exchange.sku_id, Some(SKU_BLUE_L));

    ctx.engine
        .create_exchange(LINE_C, Some(STAFF))
        .await
        .expect("exchange created");
}

#[tokio::test]
async fn test_override_to_exchange_needs_known_sku() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_C]).await.expect("batch initiated");

    let err = ctx
        .engine
        .override_resolution(OverrideResolution {
            line_id: LINE_C,
            resolution: ReturnResolution::Exchange,
            exchange_sku_id: Some(SkuId::new(404)),
            actor: STAFF,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::ExchangeSkuNotFound);
    assert_eq!(
        ctx.line(LINE_C).await.expect("line exists").resolution,
        Some(ReturnResolution::Refund)
    );
}

#[tokio::test]
async fn test_override_after_exchange_created_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.initiate(&[LINE_A], ReturnResolution::Exchange, Some(SKU_BLUE_L))
        .await
        .expect("batch initiated");

    let err = ctx
        .engine
        .override_resolution(OverrideResolution {
            line_id: LINE_A,
            resolution: ReturnResolution::Refund,
            exchange_sku_id: None,
            actor: STAFF,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::ExchangeAlreadyCreated);
}
