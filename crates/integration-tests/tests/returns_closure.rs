//! Integration tests for cancellation, rejection, archival and notes.

#![allow(clippy::unwrap_used)]

use threadline_core::{ItemCondition, LineId, ReturnErrorCode, ReturnStatus, StaffId};
use threadline_integration_tests::{
    CUSTOMER, LINE_A, LINE_B, LINE_C, SKU_BLUE_L, SKU_BLUE_M, STAFF, TestContext,
};
use threadline_returns::models::{OutboxPayload, ReturnEvent};
use threadline_returns::services::returns::{CloseReturn, ReceiveReturn};

fn close(line_id: LineId, reason: &str) -> CloseReturn {
    CloseReturn {
        line_id,
        actor: STAFF,
        reason: reason.to_string(),
    }
}

// =============================================================================
// Cancellation counters
// =============================================================================

#[tokio::test]
async fn test_customer_counter_drops_only_with_last_active_line() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A, LINE_C])
        .await
        .expect("batch initiated");

    ctx.engine
        .cancel_return(LINE_A, STAFF, Some("customer kept it".to_string()))
        .await
        .expect("first cancel");

    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 1);
    assert_eq!(ctx.sku(SKU_BLUE_M).await.expect("sku").return_count, 0);
    assert_eq!(ctx.sku(SKU_BLUE_L).await.expect("sku").return_count, 1);

    ctx.engine
        .cancel_return(LINE_C, STAFF, None)
        .await
        .expect("second cancel");

    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 0);
    assert_eq!(ctx.sku(SKU_BLUE_L).await.expect("sku").return_count, 0);
}

#[tokio::test]
async fn test_cancel_records_how_many_batch_lines_stay_active() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A, LINE_B, LINE_C])
        .await
        .expect("batch initiated");

    ctx.engine
        .cancel_return(LINE_B, STAFF, None)
        .await
        .expect("cancelled");

    let remaining: Vec<u32> = ctx
        .store
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e.event {
            ReturnEvent::ReturnCancelled {
                other_active_in_batch,
                ..
            } => Some(other_active_in_batch),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, vec![2]);
}

#[tokio::test]
async fn test_cancel_records_closure_and_notifies_partner() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("batch initiated");

    ctx.engine
        .cancel_return(LINE_A, STAFF, Some("duplicate request".to_string()))
        .await
        .expect("cancelled");

    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.status, Some(ReturnStatus::Cancelled));
    assert_eq!(line.closure.closed_by, Some(STAFF));
    assert_eq!(line.closure.reason.as_deref(), Some("duplicate request"));
    assert!(line.closure.closed_at.is_some());
    assert!(ctx.store.outbox().await.into_iter().any(|m| m.payload
        == OutboxPayload::PartnerStatus {
            line_id: LINE_A,
            status: ReturnStatus::Cancelled,
        }));
}

#[tokio::test]
async fn test_terminal_return_cannot_be_cancelled_again() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("batch initiated");
    ctx.engine
        .cancel_return(LINE_A, STAFF, None)
        .await
        .expect("cancelled");

    let err = ctx.engine.cancel_return(LINE_A, STAFF, None).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::AlreadyTerminal);
    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 0);
}

#[tokio::test]
async fn test_line_without_return_cannot_be_cancelled() {
    let ctx = TestContext::new().await;

    let err = ctx.engine.cancel_return(LINE_B, STAFF, None).await.unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::NoActiveReturn);
}

// =============================================================================
// Reject and archive
// =============================================================================

#[tokio::test]
async fn test_reject_keeps_counters() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_A]).await.expect("batch initiated");

    ctx.engine
        .reject_return(close(LINE_A, "worn and washed"))
        .await
        .expect("rejected");

    let line = ctx.line(LINE_A).await.expect("line exists");
    assert_eq!(line.status, Some(ReturnStatus::Rejected));
    assert_eq!(line.closure.reason.as_deref(), Some("worn and washed"));
    assert_eq!(ctx.customer(CUSTOMER).await.expect("customer").return_count, 1);
    assert_eq!(ctx.sku(SKU_BLUE_M).await.expect("sku").return_count, 2);
}

#[tokio::test]
async fn test_archive_closes_inspected_return() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_C]).await.expect("batch initiated");
    ctx.engine
        .receive_return(ReceiveReturn {
            line_id: LINE_C,
            condition: ItemCondition::Resellable,
            notes: None,
            received_by: STAFF,
        })
        .await
        .expect("received");

    ctx.engine
        .archive_return(close(LINE_C, "customer unreachable"))
        .await
        .expect("archived");

    assert_eq!(ctx.status(LINE_C).await, Some(ReturnStatus::Archived));
    let err = ctx
        .engine
        .reject_return(close(LINE_C, "too late"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ReturnErrorCode::AlreadyTerminal);
}

// =============================================================================
// Notes
// =============================================================================

#[tokio::test]
async fn test_notes_update_is_audited() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    let editor = StaffId::new(9);

    ctx.engine
        .update_notes(LINE_B, Some("called customer twice".to_string()), editor)
        .await
        .expect("notes updated");

    let line = ctx.line(LINE_B).await.expect("line exists");
    assert_eq!(line.notes.as_deref(), Some("called customer twice"));
    let events = ctx.store.events().await;
    let last = events.last().expect("events recorded");
    assert_eq!(last.actor, Some(editor));
    assert_eq!(last.event, ReturnEvent::NotesUpdated { line_id: LINE_B });
}

#[tokio::test]
async fn test_notes_on_closed_return_are_frozen() {
    let ctx = TestContext::new().await;
    ctx.initiate_refund(&[LINE_B]).await.expect("batch initiated");
    ctx.engine
        .cancel_return(LINE_B, STAFF, None)
        .await
        .expect("cancelled");

    let err = ctx
        .engine
        .update_notes(LINE_B, Some("late note".to_string()), STAFF)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ReturnErrorCode::AlreadyTerminal);
}
