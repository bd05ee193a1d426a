//! Integration tests for the stale-request sweep and the staff action queue.

use chrono::Utc;
use threadline_core::{ActionNeeded, ItemCondition, LineId, ReturnStatus};
use threadline_integration_tests::{
    LINE_A, LINE_B, LINE_C, STAFF, TestContext, days_ago,
};
use threadline_returns::models::{RETURN_SETTINGS_KEY, ReturnEvent, ReturnSettings};
use threadline_returns::services::returns::{AUTO_REJECT_REASON, ReceiveReturn, SchedulePickup};

/// Pretend the return on `line_id` was requested `days` ago.
async fn backdate(ctx: &TestContext, line_id: LineId, days: i64) {
    let mut line = ctx.line(line_id).await.expect("line exists");
    line.requested_at = Some(days_ago(days));
    ctx.store.insert_line(line).await;
}

// =============================================================================
// Stale-request sweep
// =============================================================================

#[tokio::test]
async fn test_sweep_rejects_only_stale_requests() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("stale batch");
    ctx.initiate_refund(&[LINE_B]).await.expect("fresh batch");
    ctx.initiate_refund(&[LINE_C]).await.expect("approved batch");
    ctx.engine
        .schedule_pickup(SchedulePickup::new(LINE_C, Some(STAFF)))
        .await
        .expect("pickup scheduled");
    backdate(&ctx, LINE_A, 40).await;
    backdate(&ctx, LINE_C, 40).await;

    let rejected = ctx
        .engine
        .sweep_stale_requests(Utc::now())
        .await
        .expect("swept");

    assert_eq!(rejected, vec![LINE_A]);
    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.status, Some(ReturnStatus::Rejected));
    assert_eq!(line.closure.reason.as_deref(), Some(AUTO_REJECT_REASON));
    assert_eq!(line.closure.closed_by, None);
    assert_eq!(ctx.status(LINE_B).await, Some(ReturnStatus::Requested));
    assert_eq!(ctx.status(LINE_C).await, Some(ReturnStatus::Approved));

    let events = ctx.store.events().await;
    let sweep_event = events.last().expect("events recorded");
    assert_eq!(sweep_event.actor, None);
    assert_eq!(
        sweep_event.event,
        ReturnEvent::ReturnRejected {
            line_id: LINE_A,
            reason: AUTO_REJECT_REASON.to_string(),
        }
    );
}

#[tokio::test]
async fn test_sweep_respects_threshold_and_can_be_disabled() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("batch initiated");
    backdate(&ctx, LINE_A, 20).await;

    let under_default = ctx
        .engine
        .sweep_stale_requests(Utc::now())
        .await
        .expect("swept");
    assert!(under_default.is_empty());

    ctx.set_settings(ReturnSettings {
        auto_reject_after_days: None,
        ..ReturnSettings::default()
    })
    .await;
    backdate(&ctx, LINE_A, 400).await;
    let disabled = ctx
        .engine
        .sweep_stale_requests(Utc::now())
        .await
        .expect("swept");
    assert!(disabled.is_empty());
    assert_eq!(ctx.status(LINE_A).await, Some(ReturnStatus::Requested));

    ctx.set_settings(ReturnSettings {
        auto_reject_after_days: Some(10),
        ..ReturnSettings::default()
    })
    .await;
    let tightened = ctx
        .engine
        .sweep_stale_requests(Utc::now())
        .await
        .expect("swept");
    assert_eq!(tightened, vec![LINE_A]);
}

#[tokio::test]
async fn test_out_of_range_threshold_falls_back_to_default() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("stale batch");
    ctx.initiate_refund(&[LINE_B]).await.expect("fresh batch");
    backdate(&ctx, LINE_A, 40).await;
    backdate(&ctx, LINE_B, 20).await;
    ctx.store
        .set_setting(
            RETURN_SETTINGS_KEY,
            serde_json::json!({ "auto_reject_after_days": 1_000_000_000_000_000_000_i64 }),
        )
        .await;

    let rejected = ctx
        .engine
        .sweep_stale_requests(Utc::now())
        .await
        .expect("swept");

    assert_eq!(rejected, vec![LINE_A]);
    assert_eq!(ctx.status(LINE_B).await, Some(ReturnStatus::Requested));
}

// =============================================================================
// Action queue
// =============================================================================

#[tokio::test]
async fn test_action_queue_orders_warehouse_work_first() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("batch initiated");
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    ctx.initiate_refund(&[LINE_C]).await.expect("batch initiated");
    ctx.engine
        .schedule_pickup(SchedulePickup::new(LINE_B, Some(STAFF)))
        .await
        .expect("pickup scheduled");
    ctx.engine
        .receive_return(ReceiveReturn {
            line_id: LINE_C,
            condition: ItemCondition::Resellable,
            notes: None,
            received_by: STAFF,
        })
        .await
        .expect("received");
    backdate(&ctx, LINE_A, 3).await;

    let queue = ctx.engine.action_queue().await.expect("queue");

    let order: Vec<(LineId, ActionNeeded)> =
        queue.iter().map(|item| (item.line_id, item.action)).collect();
    assert_eq!(
        order,
        vec![
            (LINE_C, ActionNeeded::ProcessRefund),
            (LINE_B, ActionNeeded::Receive),
            (LINE_A, ActionNeeded::SchedulePickup),
        ]
    );
    assert_eq!(queue.last().map(|item| item.days_open), Some(3));
}

#[tokio::test]
async fn test_closed_returns_leave_the_queue() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A, LINE_B])
        .await
        .expect("batch initiated");
    ctx.engine
        .cancel_return(LINE_A, STAFF, None)
        .await
        .expect("cancelled");

    let queue = ctx.engine.action_queue().await.expect("queue");

    let lines: Vec<LineId> = queue.iter().map(|item| item.line_id).collect();
    assert_eq!(lines, vec![LINE_B]);
}
