//! `PostgreSQL` implementation of the return store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use threadline_core::{
    BatchNumber, CustomerId, ItemCondition, LineId, OrderId, PickupType, ProductId, QcItemId,
    RefundMethod, ReturnReason, ReturnResolution, ReturnStatus, SkuId, StaffId, VariationId,
};

use super::{RepositoryError, ReturnStore, ReturnTx, settings};
use crate::models::{
    ClosureDetails, Customer, ExchangeDetails, InspectionDetails, NewExchangeOrder, NewQcItem,
    Order, OutboxMessage, OutboxPayload, OutboxStatus, PickupDetails, QcQueueItem, RecordedEvent,
    RefundDetails, ReturnBatch, ReturnEvent, ReturnableLine, Sku,
};
use crate::services::returns::CounterDelta;

const LINE_COLUMNS: &str = r"
    id, order_id, sku_id, quantity, unit_price, delivered_at, non_returnable,
    return_qty, batch_number, return_status, return_reason, return_reason_detail,
    return_resolution, return_requested_at, return_requested_by, return_notes,
    pickup_type, pickup_courier, pickup_awb, pickup_scheduled_at, picked_up_at,
    inspection_condition, inspection_notes, inspected_at, received_by,
    refund_gross, refund_discount_clawback, refund_deductions, refund_deduction_notes,
    refund_net, refund_method, refund_notes, refund_completed_at, refund_reference,
    exchange_sku_id, exchange_order_id, exchange_price_diff,
    closed_at, closed_by, closure_reason
";

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: LineId,
    order_id: OrderId,
    sku_id: SkuId,
    quantity: i32,
    unit_price: Decimal,
    delivered_at: Option<DateTime<Utc>>,
    non_returnable: bool,
    return_qty: Option<i32>,
    batch_number: Option<BatchNumber>,
    return_status: Option<ReturnStatus>,
    return_reason: Option<ReturnReason>,
    return_reason_detail: Option<String>,
    return_resolution: Option<ReturnResolution>,
    return_requested_at: Option<DateTime<Utc>>,
    return_requested_by: Option<StaffId>,
    return_notes: Option<String>,
    pickup_type: Option<PickupType>,
    pickup_courier: Option<String>,
    pickup_awb: Option<String>,
    pickup_scheduled_at: Option<DateTime<Utc>>,
    picked_up_at: Option<DateTime<Utc>>,
    inspection_condition: Option<ItemCondition>,
    inspection_notes: Option<String>,
    inspected_at: Option<DateTime<Utc>>,
    received_by: Option<StaffId>,
    refund_gross: Option<Decimal>,
    refund_discount_clawback: Option<Decimal>,
    refund_deductions: Option<Decimal>,
    refund_deduction_notes: Option<String>,
    refund_net: Option<Decimal>,
    refund_method: Option<RefundMethod>,
    refund_notes: Option<String>,
    refund_completed_at: Option<DateTime<Utc>>,
    refund_reference: Option<String>,
    exchange_sku_id: Option<SkuId>,
    exchange_order_id: Option<OrderId>,
    exchange_price_diff: Option<Decimal>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<StaffId>,
    closure_reason: Option<String>,
}

impl From<LineRow> for ReturnableLine {
    fn from(row: LineRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            sku_id: row.sku_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            delivered_at: row.delivered_at,
            non_returnable: row.non_returnable,
            return_qty: row.return_qty,
            batch_number: row.batch_number,
            status: row.return_status,
            reason: row.return_reason,
            reason_detail: row.return_reason_detail,
            resolution: row.return_resolution,
            requested_at: row.return_requested_at,
            requested_by: row.return_requested_by,
            notes: row.return_notes,
            pickup: PickupDetails {
                pickup_type: row.pickup_type,
                courier: row.pickup_courier,
                awb: row.pickup_awb,
                scheduled_at: row.pickup_scheduled_at,
                picked_up_at: row.picked_up_at,
            },
            inspection: InspectionDetails {
                condition: row.inspection_condition,
                notes: row.inspection_notes,
                inspected_at: row.inspected_at,
                received_by: row.received_by,
            },
            refund: RefundDetails {
                gross_amount: row.refund_gross,
                discount_clawback: row.refund_discount_clawback,
                deductions: row.refund_deductions,
                deduction_notes: row.refund_deduction_notes,
                net_amount: row.refund_net,
                method: row.refund_method,
                notes: row.refund_notes,
                completed_at: row.refund_completed_at,
                reference: row.refund_reference,
            },
            exchange: ExchangeDetails {
                sku_id: row.exchange_sku_id,
                order_id: row.exchange_order_id,
                price_diff: row.exchange_price_diff,
            },
            closure: ClosureDetails {
                closed_at: row.closed_at,
                closed_by: row.closed_by,
                reason: row.closure_reason,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    number: String,
    customer_id: CustomerId,
    is_exchange: bool,
    original_order_id: Option<OrderId>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            number: row.number,
            customer_id: row.customer_id,
            is_exchange: row.is_exchange,
            original_order_id: row.original_order_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SkuRow {
    id: SkuId,
    product_id: ProductId,
    variation_id: VariationId,
    code: String,
    mrp: Decimal,
    is_returnable: bool,
    non_returnable_reason: Option<String>,
    return_count: i32,
    write_off_count: i32,
}

impl From<SkuRow> for Sku {
    fn from(row: SkuRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            variation_id: row.variation_id,
            code: row.code,
            mrp: row.mrp,
            is_returnable: row.is_returnable,
            non_returnable_reason: row.non_returnable_reason,
            return_count: row.return_count,
            write_off_count: row.write_off_count,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    actor: Option<StaffId>,
    occurred_at: DateTime<Utc>,
    payload: Json<ReturnEvent>,
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    payload: Json<OutboxPayload>,
    status: OutboxStatus,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            payload: row.payload.0,
            status: row.status,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QcRow {
    id: QcItemId,
    line_id: LineId,
    sku_id: SkuId,
    quantity: i32,
    condition: ItemCondition,
    notes: Option<String>,
}

fn line_ids(ids: &[LineId]) -> Vec<i32> {
    ids.iter().map(LineId::as_i32).collect()
}

// =============================================================================
// Store
// =============================================================================

/// Return store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgReturnStore {
    pool: PgPool,
}

impl PgReturnStore {
    /// Create a new store on a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReturnStore for PgReturnStore {
    async fn begin(&self) -> Result<Box<dyn ReturnTx + '_>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReturnTx { tx: Some(tx) }))
    }

    async fn line(&self, id: LineId) -> Result<Option<ReturnableLine>, RepositoryError> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM retail.order_lines WHERE id = $1");
        let row = sqlx::query_as::<_, LineRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn open_return_lines(&self) -> Result<Vec<ReturnableLine>, RepositoryError> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM retail.order_lines
             WHERE return_status IN ('requested', 'approved', 'inspected')
             ORDER BY return_requested_at, id"
        );
        let rows = sqlx::query_as::<_, LineRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn stale_requested_lines(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LineId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, LineId>(
            r"
            SELECT id FROM retail.order_lines
            WHERE return_status = 'requested' AND return_requested_at < $1
            ORDER BY return_requested_at
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        let row = sqlx::query_as::<_, SkuRow>(SKU_SELECT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query_as::<_, (CustomerId, i32, i32)>(
            "SELECT id, return_count, exchange_count FROM retail.customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, return_count, exchange_count)| Customer {
            id,
            return_count,
            exchange_count,
        }))
    }

    async fn line_events(&self, id: LineId) -> Result<Vec<RecordedEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r"
            SELECT actor, occurred_at, payload
            FROM retail.return_events WHERE line_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RecordedEvent::new(row.actor, row.occurred_at, row.payload.0))
            .collect())
    }

    async fn qc_items(&self, line_id: LineId) -> Result<Vec<QcQueueItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, QcRow>(
            r"
            SELECT id, line_id, sku_id, quantity, condition, notes
            FROM retail.qc_queue WHERE line_id = $1
            ORDER BY id
            ",
        )
        .bind(line_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| QcQueueItem {
                id: row.id,
                item: NewQcItem {
                    line_id: row.line_id,
                    sku_id: row.sku_id,
                    quantity: row.quantity,
                    condition: row.condition,
                    notes: row.notes,
                },
            })
            .collect())
    }

    async fn setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError> {
        Ok(settings::get_setting(&self.pool, key).await?)
    }

    async fn claim_outbox(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, RepositoryError> {
        let lease = TimeDelta::from_std(lease)
            .map_err(|e| RepositoryError::Conflict(format!("invalid outbox lease: {e}")))?;
        let rows = sqlx::query_as::<_, OutboxRow>(
            r"
            UPDATE retail.outbox SET next_attempt_at = $3
            WHERE id IN (
                SELECT id FROM retail.outbox
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, status, attempts, next_attempt_at, last_error, created_at
            ",
        )
        .bind(now)
        .bind(limit)
        .bind(now + lease)
        .fetch_all(&self.pool)
        .await?;
        let mut messages: Vec<OutboxMessage> = rows.into_iter().map(Into::into).collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn mark_outbox_delivered(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE retail.outbox SET status = 'delivered', delivered_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE retail.outbox
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_outbox_dead(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE retail.outbox
            SET status = 'dead', attempts = attempts + 1, last_error = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const SKU_SELECT: &str = r"
    SELECT id, product_id, variation_id, code, mrp, is_returnable,
           non_returnable_reason, return_count, write_off_count
    FROM retail.skus WHERE id = $1
";

// =============================================================================
// Transaction
// =============================================================================

/// A transaction on [`PgReturnStore`]. Rolls back on drop unless committed.
pub struct PgReturnTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgReturnTx {
    fn conn(&mut self) -> Result<&mut PgConnection, RepositoryError> {
        self.tx
            .as_deref_mut()
            .ok_or(RepositoryError::TransactionClosed)
    }
}

#[async_trait]
impl ReturnTx for PgReturnTx {
    async fn lock_lines(&mut self, ids: &[LineId]) -> Result<Vec<ReturnableLine>, RepositoryError> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM retail.order_lines WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, LineRow>(&sql)
            .bind(line_ids(ids))
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn lock_batch_lines(
        &mut self,
        batch: &BatchNumber,
    ) -> Result<Vec<ReturnableLine>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {LINE_COLUMNS} FROM retail.order_lines
            WHERE id = ANY(SELECT unnest(line_ids) FROM retail.return_batches WHERE number = $1)
              AND batch_number = $1
            ORDER BY id
            FOR UPDATE
            "
        );
        let rows = sqlx::query_as::<_, LineRow>(&sql)
            .bind(batch)
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, number, customer_id, is_exchange, original_order_id
            FROM retail.orders WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn sku(&mut self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        let row = sqlx::query_as::<_, SkuRow>(SKU_SELECT)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn count_batches(&mut self, order_id: OrderId) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT number) FROM retail.return_batches WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_one(self.conn()?)
        .await?;
        Ok(count)
    }

    async fn insert_batch(&mut self, batch: &ReturnBatch) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO retail.return_batches (number, order_id, sequence, line_ids, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&batch.number)
        .bind(batch.order_id)
        .bind(batch.sequence())
        .bind(line_ids(&batch.line_ids))
        .bind(batch.created_at)
        .execute(self.conn()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("batch {} already exists", batch.number)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_line(&mut self, line: &ReturnableLine) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE retail.order_lines SET
                return_qty = $2, batch_number = $3, return_status = $4, return_reason = $5,
                return_reason_detail = $6, return_resolution = $7, return_requested_at = $8,
                return_requested_by = $9, return_notes = $10,
                pickup_type = $11, pickup_courier = $12, pickup_awb = $13,
                pickup_scheduled_at = $14, picked_up_at = $15,
                inspection_condition = $16, inspection_notes = $17, inspected_at = $18,
                received_by = $19,
                refund_gross = $20, refund_discount_clawback = $21, refund_deductions = $22,
                refund_deduction_notes = $23, refund_net = $24, refund_method = $25,
                refund_notes = $26, refund_completed_at = $27, refund_reference = $28,
                exchange_sku_id = $29, exchange_order_id = $30, exchange_price_diff = $31,
                closed_at = $32, closed_by = $33, closure_reason = $34
            WHERE id = $1
            ",
        )
        .bind(line.id)
        .bind(line.return_qty)
        .bind(&line.batch_number)
        .bind(line.status)
        .bind(line.reason)
        .bind(&line.reason_detail)
        .bind(line.resolution)
        .bind(line.requested_at)
        .bind(line.requested_by)
        .bind(&line.notes)
        .bind(line.pickup.pickup_type)
        .bind(&line.pickup.courier)
        .bind(&line.pickup.awb)
        .bind(line.pickup.scheduled_at)
        .bind(line.pickup.picked_up_at)
        .bind(line.inspection.condition)
        .bind(&line.inspection.notes)
        .bind(line.inspection.inspected_at)
        .bind(line.inspection.received_by)
        .bind(line.refund.gross_amount)
        .bind(line.refund.discount_clawback)
        .bind(line.refund.deductions)
        .bind(&line.refund.deduction_notes)
        .bind(line.refund.net_amount)
        .bind(line.refund.method)
        .bind(&line.refund.notes)
        .bind(line.refund.completed_at)
        .bind(&line.refund.reference)
        .bind(line.exchange.sku_id)
        .bind(line.exchange.order_id)
        .bind(line.exchange.price_diff)
        .bind(line.closure.closed_at)
        .bind(line.closure.closed_by)
        .bind(&line.closure.reason)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn apply_counters(&mut self, delta: &CounterDelta) -> Result<(), RepositoryError> {
        for (sku_id, by) in &delta.sku_returns {
            sqlx::query("UPDATE retail.skus SET return_count = return_count + $2 WHERE id = $1")
                .bind(sku_id)
                .bind(by)
                .execute(self.conn()?)
                .await?;
        }
        for (sku_id, by) in &delta.sku_write_offs {
            sqlx::query(
                "UPDATE retail.skus SET write_off_count = write_off_count + $2 WHERE id = $1",
            )
            .bind(sku_id)
            .bind(by)
            .execute(self.conn()?)
            .await?;
        }
        for (customer_id, by) in &delta.customer_returns {
            sqlx::query(
                "UPDATE retail.customers SET return_count = return_count + $2 WHERE id = $1",
            )
            .bind(customer_id)
            .bind(by)
            .execute(self.conn()?)
            .await?;
        }
        for (customer_id, by) in &delta.customer_exchanges {
            sqlx::query(
                "UPDATE retail.customers SET exchange_count = exchange_count + $2 WHERE id = $1",
            )
            .bind(customer_id)
            .bind(by)
            .execute(self.conn()?)
            .await?;
        }
        Ok(())
    }

    async fn insert_exchange_order(
        &mut self,
        order: &NewExchangeOrder,
    ) -> Result<OrderId, RepositoryError> {
        let order_id = sqlx::query_scalar::<_, OrderId>(
            r"
            INSERT INTO retail.orders (number, customer_id, is_exchange, original_order_id)
            VALUES ($1, $2, TRUE, $3)
            RETURNING id
            ",
        )
        .bind(&order.number)
        .bind(order.customer_id)
        .bind(order.original_order_id)
        .fetch_one(self.conn()?)
        .await?;

        sqlx::query(
            r"
            INSERT INTO retail.order_lines (order_id, sku_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(order_id)
        .bind(order.sku_id)
        .bind(order.quantity)
        .bind(order.unit_price)
        .execute(self.conn()?)
        .await?;

        Ok(order_id)
    }

    async fn insert_qc_item(&mut self, item: &NewQcItem) -> Result<QcItemId, RepositoryError> {
        let id = sqlx::query_scalar::<_, QcItemId>(
            r"
            INSERT INTO retail.qc_queue (line_id, sku_id, quantity, condition, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(item.line_id)
        .bind(item.sku_id)
        .bind(item.quantity)
        .bind(item.condition)
        .bind(&item.notes)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn append_events(&mut self, events: &[RecordedEvent]) -> Result<(), RepositoryError> {
        for recorded in events {
            sqlx::query(
                r"
                INSERT INTO retail.return_events (line_id, event_type, payload, actor, occurred_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(recorded.event.line_id())
            .bind(recorded.event.kind())
            .bind(Json(&recorded.event))
            .bind(recorded.actor)
            .bind(recorded.occurred_at)
            .execute(self.conn()?)
            .await?;
        }
        Ok(())
    }

    async fn enqueue(&mut self, messages: &[OutboxMessage]) -> Result<(), RepositoryError> {
        for message in messages {
            sqlx::query(
                r"
                INSERT INTO retail.outbox
                    (id, kind, payload, status, attempts, next_attempt_at, last_error, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(message.id)
            .bind(message.payload.kind())
            .bind(Json(&message.payload))
            .bind(message.status)
            .bind(message.attempts)
            .bind(message.next_attempt_at)
            .bind(&message.last_error)
            .bind(message.created_at)
            .execute(self.conn()?)
            .await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let tx = self.tx.take().ok_or(RepositoryError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }
}
