//! Integration tests for the Threadline return engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p threadline-integration-tests
//! ```
//!
//! Tests drive [`ReturnEngine`] end to end against the in-memory store, with
//! fake collaborators standing in for the courier, the partner platform and
//! Slack. Nothing here needs a database or network access.
//!
//! # Seeded Data
//!
//! Order `64168` for customer 7, delivered five days ago:
//!
//! | Line | SKU | Variation | Qty | Unit price |
//! |------|-----|-----------|-----|------------|
//! | 11 | 100 (blue M) | 1 | 2 | 2000 |
//! | 12 | 200 (red M) | 2 | 1 | 1500 |
//! | 13 | 101 (blue L) | 1 | 1 | 1800 |
//! | 14 | 300 (final sale) | 3 | 1 | 900 |
//!
//! Line 15 (SKU 100) is on the same order but not yet delivered. Order
//! `70001` (line 51) belongs to another customer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use threadline_core::{
    BatchNumber, CustomerId, LineId, OrderId, ProductId, ReturnReason, ReturnResolution,
    ReturnStatus, SkuId, StaffId, VariationId,
};
use threadline_returns::db::{InMemoryReturnStore, ReturnStore};
use threadline_returns::logistics::{LogisticsBooking, LogisticsError, PickupBooking, PickupRequest};
use threadline_returns::models::{
    Customer, Order, ReturnSettings, ReturnableLine, Sku,
};
use threadline_returns::partner::{PartnerError, PartnerStatusSync};
use threadline_returns::services::returns::{InitiateReturn, InitiatedBatch, ReturnLineRequest};
use threadline_returns::slack::{BatchNotifier, SlackError};
use threadline_returns::{OutboxWorker, ReturnEngine, ReturnError};

// =============================================================================
// Seed identifiers
// =============================================================================

pub const ORDER_NUMBER: &str = "64168";
pub const ORDER: OrderId = OrderId::new(1);
pub const CUSTOMER: CustomerId = CustomerId::new(7);

pub const OTHER_ORDER: OrderId = OrderId::new(50);
pub const OTHER_CUSTOMER: CustomerId = CustomerId::new(8);

pub const STAFF: StaffId = StaffId::new(3);

pub const SKU_BLUE_M: SkuId = SkuId::new(100);
pub const SKU_BLUE_L: SkuId = SkuId::new(101);
pub const SKU_RED_M: SkuId = SkuId::new(200);
pub const SKU_FINAL_SALE: SkuId = SkuId::new(300);

/// Two units of blue M at 2000.
pub const LINE_A: LineId = LineId::new(11);
/// One unit of red M at 1500.
pub const LINE_B: LineId = LineId::new(12);
/// One unit of blue L at 1800.
pub const LINE_C: LineId = LineId::new(13);
pub const LINE_FINAL_SALE: LineId = LineId::new(14);
pub const LINE_UNDELIVERED: LineId = LineId::new(15);
pub const LINE_OTHER_ORDER: LineId = LineId::new(51);

/// Courier returned by [`FakeLogistics::booking`].
pub const COURIER: &str = "Delhivery";
/// Tracking number returned by [`FakeLogistics::booking`].
pub const AWB: &str = "DLV1234567";

/// A timestamp `days` whole days in the past.
#[must_use]
pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

fn sku(id: SkuId, variation: i32, mrp: i64) -> Sku {
    Sku {
        id,
        product_id: ProductId::new(variation),
        variation_id: VariationId::new(variation),
        code: format!("TL-{id}"),
        mrp: Decimal::new(mrp, 0),
        is_returnable: true,
        non_returnable_reason: None,
        return_count: 0,
        write_off_count: 0,
    }
}

fn line(id: LineId, order_id: OrderId, sku_id: SkuId, quantity: i32, unit_price: i64) -> ReturnableLine {
    ReturnableLine::new(
        id,
        order_id,
        sku_id,
        quantity,
        Decimal::new(unit_price, 0),
        Some(days_ago(5)),
    )
}

// =============================================================================
// Fake collaborators
// =============================================================================

/// Courier aggregator that either books every pickup or refuses every one.
#[derive(Debug, Default)]
pub struct FakeLogistics {
    refusal: Option<String>,
    requests: Mutex<Vec<PickupRequest>>,
}

impl FakeLogistics {
    /// Books every pickup with [`COURIER`] and [`AWB`].
    #[must_use]
    pub fn booking() -> Self {
        Self::default()
    }

    /// Refuses every pickup with `message`.
    #[must_use]
    pub fn refusing(message: &str) -> Self {
        Self {
            refusal: Some(message.to_string()),
            requests: Mutex::default(),
        }
    }

    /// Booking requests received so far.
    pub async fn requests(&self) -> Vec<PickupRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LogisticsBooking for FakeLogistics {
    async fn book_pickup(&self, request: &PickupRequest) -> Result<PickupBooking, LogisticsError> {
        self.requests.lock().await.push(request.clone());
        match &self.refusal {
            Some(message) => Err(LogisticsError::Rejected {
                status: 422,
                message: message.clone(),
            }),
            None => Ok(PickupBooking {
                courier: COURIER.to_string(),
                awb: AWB.to_string(),
                scheduled_at: None,
            }),
        }
    }
}

/// Partner platform that records pushes and fails the first `failures`.
#[derive(Debug, Default)]
pub struct RecordingPartner {
    failures: usize,
    attempts: Mutex<usize>,
    pushed: Mutex<Vec<(LineId, ReturnStatus)>>,
}

impl RecordingPartner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers 503 to the first `failures` pushes.
    #[must_use]
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Statuses accepted so far, in delivery order.
    pub async fn pushed(&self) -> Vec<(LineId, ReturnStatus)> {
        self.pushed.lock().await.clone()
    }
}

#[async_trait]
impl PartnerStatusSync for RecordingPartner {
    async fn push_status(&self, line_id: LineId, status: ReturnStatus) -> Result<(), PartnerError> {
        let mut attempts = self.attempts.lock().await;
        *attempts += 1;
        if *attempts <= self.failures {
            return Err(PartnerError::Api {
                status: 503,
                message: "partner unavailable".to_string(),
            });
        }
        self.pushed.lock().await.push((line_id, status));
        Ok(())
    }
}

/// Ops channel that records batch announcements.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    announced: Mutex<Vec<(BatchNumber, usize)>>,
}

impl RecordingNotifier {
    /// Batches announced so far with their line counts.
    pub async fn announced(&self) -> Vec<(BatchNumber, usize)> {
        self.announced.lock().await.clone()
    }
}

#[async_trait]
impl BatchNotifier for RecordingNotifier {
    async fn batch_initiated(
        &self,
        batch: &BatchNumber,
        line_count: usize,
        _reason: ReturnReason,
        _resolution: ReturnResolution,
    ) -> Result<(), SlackError> {
        self.announced.lock().await.push((batch.clone(), line_count));
        Ok(())
    }
}

// =============================================================================
// Test context
// =============================================================================

/// A seeded store, an engine over it and its fake courier.
pub struct TestContext {
    pub store: InMemoryReturnStore,
    pub engine: ReturnEngine,
    pub logistics: Arc<FakeLogistics>,
}

impl TestContext {
    /// Seeded context whose courier books every pickup.
    pub async fn new() -> Self {
        Self::with_logistics(FakeLogistics::booking()).await
    }

    /// Seeded context with the given courier.
    pub async fn with_logistics(logistics: FakeLogistics) -> Self {
        let store = InMemoryReturnStore::new();
        seed(&store).await;
        let logistics = Arc::new(logistics);
        let engine = ReturnEngine::new(
            Arc::new(store.clone()),
            Arc::clone(&logistics) as Arc<dyn LogisticsBooking>,
        );
        Self {
            store,
            engine,
            logistics,
        }
    }

    /// Replace the stored return policy.
    pub async fn set_settings(&self, settings: ReturnSettings) {
        self.store.set_return_settings(settings).await;
    }

    /// Outbox worker over this context's engine.
    #[must_use]
    pub fn worker(
        &self,
        partner: Option<Arc<RecordingPartner>>,
        notifier: Option<Arc<RecordingNotifier>>,
    ) -> OutboxWorker {
        OutboxWorker::new(
            self.engine.clone(),
            partner.map(|p| p as Arc<dyn PartnerStatusSync>),
            notifier.map(|n| n as Arc<dyn BatchNotifier>),
        )
    }

    /// Open a batch for `lines` (full quantities) with reason `size_too_small`.
    ///
    /// # Errors
    ///
    /// Whatever [`ReturnEngine::initiate_return`] fails with.
    pub async fn initiate(
        &self,
        lines: &[LineId],
        resolution: ReturnResolution,
        exchange_sku_id: Option<SkuId>,
    ) -> Result<InitiatedBatch, ReturnError> {
        self.engine
            .initiate_return(initiate_request(
                lines.iter().copied().map(ReturnLineRequest::from).collect(),
                resolution,
                exchange_sku_id,
            ))
            .await
    }

    /// Open a refund batch for `lines`.
    ///
    /// # Errors
    ///
    /// Whatever [`ReturnEngine::initiate_return`] fails with.
    pub async fn initiate_refund(&self, lines: &[LineId]) -> Result<InitiatedBatch, ReturnError> {
        self.initiate(lines, ReturnResolution::Refund, None).await
    }

    /// Current state of a line.
    pub async fn line(&self, id: LineId) -> Option<ReturnableLine> {
        self.store.line(id).await.ok().flatten()
    }

    /// Current state of a SKU and its counters.
    pub async fn sku(&self, id: SkuId) -> Option<Sku> {
        self.store.sku(id).await.ok().flatten()
    }

    /// Current state of a customer and their counters.
    pub async fn customer(&self, id: CustomerId) -> Option<Customer> {
        self.store.customer(id).await.ok().flatten()
    }

    /// Status of a line's return, if it has one.
    pub async fn status(&self, id: LineId) -> Option<ReturnStatus> {
        self.line(id).await.and_then(|l| l.status)
    }
}

/// An initiation request with reason `size_too_small` raised by [`STAFF`].
#[must_use]
pub fn initiate_request(
    lines: Vec<ReturnLineRequest>,
    resolution: ReturnResolution,
    exchange_sku_id: Option<SkuId>,
) -> InitiateReturn {
    InitiateReturn {
        lines,
        reason: ReturnReason::SizeTooSmall,
        reason_detail: None,
        resolution,
        exchange_sku_id,
        pickup_type: None,
        notes: None,
        requested_by: STAFF,
    }
}

/// Load the orders, SKUs and customers described in the crate docs.
pub async fn seed(store: &InMemoryReturnStore) {
    for customer in [CUSTOMER, OTHER_CUSTOMER] {
        store
            .insert_customer(Customer {
                id: customer,
                return_count: 0,
                exchange_count: 0,
            })
            .await;
    }

    store.insert_sku(sku(SKU_BLUE_M, 1, 2499)).await;
    store.insert_sku(sku(SKU_BLUE_L, 1, 2499)).await;
    store.insert_sku(sku(SKU_RED_M, 2, 2799)).await;
    store
        .insert_sku(Sku {
            is_returnable: false,
            non_returnable_reason: Some("final sale".to_string()),
            ..sku(SKU_FINAL_SALE, 3, 1299)
        })
        .await;

    store
        .insert_order(Order {
            id: ORDER,
            number: ORDER_NUMBER.to_string(),
            customer_id: CUSTOMER,
            is_exchange: false,
            original_order_id: None,
        })
        .await;
    store
        .insert_order(Order {
            id: OTHER_ORDER,
            number: "70001".to_string(),
            customer_id: OTHER_CUSTOMER,
            is_exchange: false,
            original_order_id: None,
        })
        .await;

    store.insert_line(line(LINE_A, ORDER, SKU_BLUE_M, 2, 2000)).await;
    store.insert_line(line(LINE_B, ORDER, SKU_RED_M, 1, 1500)).await;
    store.insert_line(line(LINE_C, ORDER, SKU_BLUE_L, 1, 1800)).await;
    store
        .insert_line(line(LINE_FINAL_SALE, ORDER, SKU_FINAL_SALE, 1, 900))
        .await;
    store
        .insert_line(ReturnableLine {
            delivered_at: None,
            ..line(LINE_UNDELIVERED, ORDER, SKU_BLUE_M, 1, 2000)
        })
        .await;
    store
        .insert_line(line(LINE_OTHER_ORDER, OTHER_ORDER, SKU_BLUE_M, 1, 2000))
        .await;
}
