//! Integration tests for return batch initiation.
//!
//! Covers batch numbering, eligibility rejections, quantity bounds, counter
//! increments and all-or-nothing commits.

#![allow(clippy::unwrap_used)]

use threadline_core::{
    BatchNumber, EligibilityReason, LineId, ReturnErrorCode, ReturnResolution, ReturnStatus, SkuId,
};
use threadline_integration_tests::{
    CUSTOMER, LINE_A, LINE_B, LINE_C, LINE_FINAL_SALE, LINE_OTHER_ORDER, LINE_UNDELIVERED,
    ORDER_NUMBER, SKU_BLUE_L, SKU_BLUE_M, SKU_RED_M, STAFF, TestContext, days_ago,
    initiate_request,
};
use threadline_returns::models::{OutboxPayload, ReturnEvent, ReturnSettings};
use threadline_returns::services::returns::ReturnLineRequest;

fn with_qty(line_id: LineId, quantity: i32) -> ReturnLineRequest {
    ReturnLineRequest {
        line_id,
        quantity: Some(quantity),
    }
}

// =============================================================================
// Batch numbering
// =============================================================================

#[tokio::test]
async fn test_batches_are_numbered_per_order() {
    let ctx = TestContext::new().await;

    let first = ctx.initiate_refund(&[LINE_A]).await.expect("first batch");
    let second = ctx.initiate_refund(&[LINE_B]).await.expect("second batch");

    assert_eq!(first.batch_number.to_string(), "64168/1");
    assert_eq!(second.batch_number.to_string(), "64168/2");
    assert_eq!(second.batch_number.order_number(), ORDER_NUMBER);
}

#[tokio::test]
async fn test_all_lines_share_the_batch() {
    let ctx = TestContext::new().await;

    let batch = ctx
        .initiate_refund(&[LINE_C, LINE_A])
        .await
        .expect("batch initiated");

    assert_eq!(batch.line_ids, vec![LINE_C, LINE_A]);
    for id in [LINE_A, LINE_C] {
        let line = ctx.line(id).await.expect("line exists");
        assert_eq!(line.status, Some(ReturnStatus::Requested));
        assert_eq!(line.batch_number, Some(BatchNumber::new(ORDER_NUMBER, 1)));
        assert_eq!(line.requested_by, Some(STAFF));
    }
    assert_eq!(ctx.status(LINE_B).await, None);
}

#[tokio::test]
async fn test_lines_can_return_again_after_cancellation() {
    let ctx = TestContext::new().await;
    let first = ctx
        .initiate_refund(&[LINE_A, LINE_B])
        .await
        .expect("first batch");
    assert_eq!(first.batch_number.to_string(), "64168/1");
    for id in [LINE_A, LINE_B] {
        ctx.engine
            .cancel_return(id, STAFF, None)
            .await
            .expect("cancelled");
    }

    let again = ctx
        .initiate_refund(&[LINE_A, LINE_B])
        .await
        .expect("second batch");

    assert_eq!(again.batch_number.to_string(), "64168/2");
    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.status, Some(ReturnStatus::Requested));
    assert!(line.closure.closed_at.is_none());
    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 1);
}

// =============================================================================
// Eligibility
// =============================================================================

#[tokio::test]
async fn test_second_initiation_is_already_active() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("first batch");

    let err = ctx.initiate_refund(&[LINE_A]).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::AlreadyActive);
    let eligibility = ctx.engine.eligibility(LINE_A).await.expect("eligibility");
    assert!(!eligibility.eligible);
    assert_eq!(eligibility.reason, EligibilityReason::AlreadyActive);
}

#[tokio::test]
async fn test_final_sale_and_undelivered_lines_are_not_eligible() {
    let ctx = TestContext::new().await;

    let final_sale = ctx.initiate_refund(&[LINE_FINAL_SALE]).await.unwrap_err();
    let undelivered = ctx.initiate_refund(&[LINE_UNDELIVERED]).await.unwrap_err();

    assert_eq!(final_sale.code(), ReturnErrorCode::NotEligible);
    assert!(final_sale.to_string().contains("final sale"));
    assert_eq!(undelivered.code(), ReturnErrorCode::NotEligible);
}

#[tokio::test]
async fn test_expired_window_is_rejected_without_override() {
    let ctx = TestContext::new().await;
    let mut line = ctx.line(LINE_A).await.expect("line exists");
    line.delivered_at = Some(days_ago(20));
    ctx.store.insert_line(line).await;

    let err = ctx.initiate_refund(&[LINE_A]).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::WindowExpired);
    assert_eq!(ctx.status(LINE_A).await, None);
}

#[tokio::test]
async fn test_expired_override_initiates_and_records_the_override() {
    let ctx = TestContext::new().await;
    ctx.set_settings(ReturnSettings {
        allow_expired_override: true,
        ..ReturnSettings::default()
    })
    .await;
    let mut line = ctx.line(LINE_A).await.expect("line exists");
    line.delivered_at = Some(days_ago(20));
    ctx.store.insert_line(line).await;

    let eligibility = ctx.engine.eligibility(LINE_A).await.expect("eligibility");
    assert!(eligibility.eligible);
    assert_eq!(eligibility.reason, EligibilityReason::ExpiredOverride);

    let batch = ctx.initiate_refund(&[LINE_A]).await.expect("initiated");

    assert_eq!(batch.overridden_lines, vec![LINE_A]);
    let overrides: Vec<_> = ctx
        .store
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e.event {
            ReturnEvent::ExpiredOverrideUsed {
                line_id,
                days_since_delivery,
                window_days,
            } => Some((line_id, days_since_delivery, window_days)),
            _ => None,
        })
        .collect();
    assert_eq!(overrides, vec![(LINE_A, 20, 14)]);
}

#[tokio::test]
async fn test_nearing_expiry_is_flagged() {
    let ctx = TestContext::new().await;
    let mut line = ctx.line(LINE_B).await.expect("line exists");
    line.delivered_at = Some(days_ago(12));
    ctx.store.insert_line(line).await;

    let eligibility = ctx.engine.eligibility(LINE_B).await.expect("eligibility");

    assert!(eligibility.eligible);
    assert!(eligibility.nearing_expiry);
    assert_eq!(eligibility.days_since_delivery, Some(12));
}

#[tokio::test]
async fn test_unknown_line_is_not_found() {
    let ctx = TestContext::new().await;

    let err = ctx
        .initiate_refund(&[LineId::new(999)])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::LineNotFound);
}

// =============================================================================
// Quantities and selection
// =============================================================================

#[tokio::test]
async fn test_quantity_must_be_within_line_quantity() {
    let ctx = TestContext::new().await;

    for qty in [0, -1, 3] {
        let err = ctx
            .engine
            .initiate_return(initiate_request(
                vec![with_qty(LINE_A, qty)],
                ReturnResolution::Refund,
                None,
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ReturnErrorCode::InvalidQuantity, "qty {qty}");
    }

    ctx.engine
        .initiate_return(initiate_request(
            vec![with_qty(LINE_A, 1)],
            ReturnResolution::Refund,
            None,
        ))
        .await
        .expect("partial quantity accepted");
    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.return_qty, Some(1));
}

#[tokio::test]
async fn test_lines_from_two_orders_are_rejected() {
    let ctx = TestContext::new().await;

    let err = ctx
        .initiate_refund(&[LINE_A, LINE_OTHER_ORDER])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::InvalidQuantity);
    assert_eq!(ctx.status(LINE_A).await, None);
}

#[tokio::test]
async fn test_exchange_without_target_sku_is_rejected() {
    let ctx = TestContext::new().await;

    let missing = ctx
        .initiate(&[LINE_A], ReturnResolution::Exchange, None)
        .await
        .unwrap_err();
    let unknown = ctx
        .initiate(
            &[LINE_A],
            ReturnResolution::Exchange,
            Some(SkuId::new(404)),
        )
        .await
        .unwrap_err();

    assert_eq!(missing.code(), ReturnErrorCode::ExchangeSkuNotFound);
    assert_eq!(unknown.code(), ReturnErrorCode::ExchangeSkuNotFound);
    assert!(ctx.store.events().await.is_empty());
}

// =============================================================================
// Counters, events and outbox
// =============================================================================

#[tokio::test]
async fn test_initiation_bumps_counters_once_per_batch() {
    let ctx = TestContext::new().await;

    ctx.initiate_refund(&[LINE_A, LINE_C])
        .await
        .expect("batch initiated");

    let customer = ctx.customer(CUSTOMER).await.expect("customer");
    assert_eq!(customer.return_count, 1);
    assert_eq!(ctx.sku(SKU_BLUE_M).await.expect("sku").return_count, 2);
    assert_eq!(ctx.sku(SKU_BLUE_L).await.expect("sku").return_count, 1);
    assert_eq!(ctx.sku(SKU_RED_M).await.expect("sku").return_count, 0);
}

#[tokio::test]
async fn test_initiation_queues_notification_and_partner_statuses() {
    let ctx = TestContext::new().await;

    ctx.initiate_refund(&[LINE_A, LINE_B])
        .await
        .expect("batch initiated");

    let payloads: Vec<_> = ctx.store.outbox().await.into_iter().map(|m| m.payload).collect();
    assert!(payloads.contains(&OutboxPayload::PartnerStatus {
        line_id: LINE_A,
        status: ReturnStatus::Requested,
    }));
    assert!(payloads.contains(&OutboxPayload::PartnerStatus {
        line_id: LINE_B,
        status: ReturnStatus::Requested,
    }));
    let notifications = payloads
        .iter()
        .filter(|p| matches!(p, OutboxPayload::BatchNotification { line_count: 2, .. }))
        .count();
    assert_eq!(notifications, 1);
}

// =============================================================================
// Atomicity
// =============================================================================

#[tokio::test]
async fn test_failed_line_write_rolls_back_the_whole_batch() {
    let ctx = TestContext::new().await;
    ctx.store.fail_saving_line(LINE_B).await;

    let err = ctx.initiate_refund(&[LINE_A, LINE_B]).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::Unknown);
    assert_eq!(ctx.status(LINE_A).await, None);
    assert_eq!(ctx.status(LINE_B).await, None);
    assert!(ctx.store.events().await.is_empty());
    assert!(ctx.store.outbox().await.is_empty());
    assert_eq!(ctx.sku(SKU_BLUE_M).await.expect("sku").return_count, 0);
    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 0);

    // The batch sequence was not consumed either.
    let retry = ctx
        .initiate_refund(&[LINE_A, LINE_B])
        .await
        .expect("retry succeeds");
    assert_eq!(retry.batch_number.to_string(), "64168/1");
}

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() {
    let ctx = TestContext::new().await;
    ctx.store.fail_next_commit().await;

    let err = ctx.initiate_refund(&[LINE_A]).await.unwrap_err();

    assert!(err.is_unexpected());
    assert_eq!(ctx.status(LINE_A).await, None);
    assert!(ctx.store.events().await.is_empty());
}

#[tokio::test]
async fn test_error_body_carries_stable_code() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("first batch");

    let err = ctx.initiate_refund(&[LINE_A]).await.unwrap_err();
    let body = serde_json::to_value(err.body()).expect("serializes");

    assert_eq!(body.get("code").and_then(|c| c.as_str()), Some("ALREADY_ACTIVE"));
    assert!(
        body.get("message")
            .and_then(|m| m.as_str())
            .is_some_and(|m| m.contains("11"))
    );
}
