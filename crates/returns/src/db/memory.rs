//! In-memory return store for tests.
//!
//! A single mutex serialises every transaction. A transaction works on a
//! copy of the state and writes it back on commit, so a dropped or failed
//! transaction leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use threadline_core::{BatchNumber, CustomerId, LineId, OrderId, QcItemId, SkuId};

use super::{RepositoryError, ReturnStore, ReturnTx};
use crate::models::{
    Customer, NewExchangeOrder, NewQcItem, Order, OutboxMessage, OutboxStatus, QcQueueItem,
    RETURN_SETTINGS_KEY, RecordedEvent, ReturnBatch, ReturnSettings, ReturnableLine, Sku,
};
use crate::services::returns::CounterDelta;

#[derive(Debug, Clone, Default)]
struct Faults {
    save_line: Option<LineId>,
    commit: bool,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: BTreeMap<OrderId, Order>,
    lines: BTreeMap<LineId, ReturnableLine>,
    skus: BTreeMap<SkuId, Sku>,
    customers: BTreeMap<CustomerId, Customer>,
    batches: BTreeMap<BatchNumber, ReturnBatch>,
    qc_items: Vec<QcQueueItem>,
    events: Vec<RecordedEvent>,
    outbox: Vec<OutboxMessage>,
    settings: HashMap<String, JsonValue>,
    faults: Faults,
}

impl MemoryState {
    fn next_order_id(&self) -> OrderId {
        let max = self.orders.keys().next_back().map_or(0, OrderId::as_i32);
        OrderId::new(max + 1)
    }

    fn next_line_id(&self) -> LineId {
        let max = self.lines.keys().next_back().map_or(0, LineId::as_i32);
        LineId::new(max + 1)
    }

    fn outbox_mut(&mut self, id: Uuid) -> Result<&mut OutboxMessage, RepositoryError> {
        self.outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(RepositoryError::NotFound)
    }
}

/// Return store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReturnStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryReturnStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state.lock().await.customers.insert(customer.id, customer);
    }

    pub async fn insert_sku(&self, sku: Sku) {
        self.state.lock().await.skus.insert(sku.id, sku);
    }

    pub async fn insert_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    pub async fn insert_line(&self, line: ReturnableLine) {
        self.state.lock().await.lines.insert(line.id, line);
    }

    /// Store the return policy row.
    pub async fn set_return_settings(&self, settings: ReturnSettings) {
        if let Ok(value) = serde_json::to_value(settings) {
            self.set_setting(RETURN_SETTINGS_KEY, value).await;
        }
    }

    /// Store a raw settings row.
    pub async fn set_setting(&self, key: &str, value: JsonValue) {
        self.state
            .lock()
            .await
            .settings
            .insert(key.to_string(), value);
    }

    /// Make the next save of `line_id` fail, mid-transaction.
    pub async fn fail_saving_line(&self, line_id: LineId) {
        self.state.lock().await.faults.save_line = Some(line_id);
    }

    /// Make the next commit fail.
    pub async fn fail_next_commit(&self) {
        self.state.lock().await.faults.commit = true;
    }

    /// Every event recorded so far, in order.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().await.events.clone()
    }

    /// Every outbox message, in insertion order.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    /// All orders, including exchange orders created by the engine.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    /// Lines of an order.
    pub async fn order_lines(&self, order_id: OrderId) -> Vec<ReturnableLine> {
        self.state
            .lock()
            .await
            .lines
            .values()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReturnStore for InMemoryReturnStore {
    async fn begin(&self) -> Result<Box<dyn ReturnTx + '_>, RepositoryError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            staged,
        }))
    }

    async fn line(&self, id: LineId) -> Result<Option<ReturnableLine>, RepositoryError> {
        Ok(self.state.lock().await.lines.get(&id).cloned())
    }

    async fn open_return_lines(&self) -> Result<Vec<ReturnableLine>, RepositoryError> {
        let mut lines: Vec<_> = self
            .state
            .lock()
            .await
            .lines
            .values()
            .filter(|l| l.has_active_return())
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.requested_at, l.id));
        Ok(lines)
    }

    async fn stale_requested_lines(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LineId>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .lines
            .values()
            .filter(|l| {
                l.status == Some(threadline_core::ReturnStatus::Requested)
                    && l.requested_at.is_some_and(|at| at < cutoff)
            })
            .map(|l| l.id)
            .collect())
    }

    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        Ok(self.state.lock().await.skus.get(&id).cloned())
    }

    async fn customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn line_events(&self, id: LineId) -> Result<Vec<RecordedEvent>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.event.line_id() == Some(id))
            .cloned()
            .collect())
    }

    async fn qc_items(&self, line_id: LineId) -> Result<Vec<QcQueueItem>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .qc_items
            .iter()
            .filter(|q| q.item.line_id == line_id)
            .cloned()
            .collect())
    }

    async fn setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError> {
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn claim_outbox(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, RepositoryError> {
        let lease = TimeDelta::from_std(lease)
            .map_err(|e| RepositoryError::Conflict(format!("invalid outbox lease: {e}")))?;
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for message in state
            .outbox
            .iter_mut()
            .filter(|m| m.status == OutboxStatus::Pending && m.next_attempt_at <= now)
            .take(limit)
        {
            message.next_attempt_at = now + lease;
            claimed.push(message.clone());
        }
        Ok(claimed)
    }

    async fn mark_outbox_delivered(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.outbox_mut(id)?.status = OutboxStatus::Delivered;
        Ok(())
    }

    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let message = state.outbox_mut(id)?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        message.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn mark_outbox_dead(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let message = state.outbox_mut(id)?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        message.status = OutboxStatus::Dead;
        Ok(())
    }
}

/// Transaction on [`InMemoryReturnStore`].
struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), RepositoryError> {
        if self.guard.is_some() {
            Ok(())
        } else {
            Err(RepositoryError::TransactionClosed)
        }
    }
}

fn bump(count: &mut i32, by: i32) {
    *count += by;
}

#[async_trait]
impl ReturnTx for MemoryTx {
    async fn lock_lines(&mut self, ids: &[LineId]) -> Result<Vec<ReturnableLine>, RepositoryError> {
        self.ensure_open()?;
        Ok(self
            .staged
            .lines
            .values()
            .filter(|l| ids.contains(&l.id))
            .cloned()
            .collect())
    }

    async fn lock_batch_lines(
        &mut self,
        batch: &BatchNumber,
    ) -> Result<Vec<ReturnableLine>, RepositoryError> {
        self.ensure_open()?;
        let Some(members) = self.staged.batches.get(batch) else {
            return Ok(Vec::new());
        };
        let mut lines: Vec<ReturnableLine> = members
            .line_ids
            .iter()
            .filter_map(|id| self.staged.lines.get(id))
            .filter(|l| l.batch_number.as_ref() == Some(batch))
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.id);
        Ok(lines)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.ensure_open()?;
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn sku(&mut self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        self.ensure_open()?;
        Ok(self.staged.skus.get(&id).cloned())
    }

    async fn count_batches(&mut self, order_id: OrderId) -> Result<i64, RepositoryError> {
        self.ensure_open()?;
        let count = self
            .staged
            .batches
            .values()
            .filter(|b| b.order_id == order_id)
            .count();
        i64::try_from(count).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }

    async fn insert_batch(&mut self, batch: &ReturnBatch) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        if self.staged.batches.contains_key(&batch.number) {
            return Err(RepositoryError::Conflict(format!(
                "batch {} already exists",
                batch.number
            )));
        }
        self.staged
            .batches
            .insert(batch.number.clone(), batch.clone());
        Ok(())
    }

    async fn save_line(&mut self, line: &ReturnableLine) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        if self.staged.faults.save_line == Some(line.id) {
            self.staged.faults.save_line = None;
            if let Some(guard) = self.guard.as_mut() {
                guard.faults.save_line = None;
            }
            return Err(RepositoryError::DataCorruption(format!(
                "injected failure saving line {}",
                line.id
            )));
        }
        let slot = self
            .staged
            .lines
            .get_mut(&line.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = line.clone();
        Ok(())
    }

    async fn apply_counters(&mut self, delta: &CounterDelta) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        for (id, by) in &delta.sku_returns {
            if let Some(sku) = self.staged.skus.get_mut(id) {
                bump(&mut sku.return_count, *by);
            }
        }
        for (id, by) in &delta.sku_write_offs {
            if let Some(sku) = self.staged.skus.get_mut(id) {
                bump(&mut sku.write_off_count, *by);
            }
        }
        for (id, by) in &delta.customer_returns {
            if let Some(customer) = self.staged.customers.get_mut(id) {
                bump(&mut customer.return_count, *by);
            }
        }
        for (id, by) in &delta.customer_exchanges {
            if let Some(customer) = self.staged.customers.get_mut(id) {
                bump(&mut customer.exchange_count, *by);
            }
        }
        Ok(())
    }

    async fn insert_exchange_order(
        &mut self,
        order: &NewExchangeOrder,
    ) -> Result<OrderId, RepositoryError> {
        self.ensure_open()?;
        if self.staged.orders.values().any(|o| o.number == order.number) {
            return Err(RepositoryError::Conflict(format!(
                "order {} already exists",
                order.number
            )));
        }
        let id = self.staged.next_order_id();
        self.staged.orders.insert(
            id,
            Order {
                id,
                number: order.number.clone(),
                customer_id: order.customer_id,
                is_exchange: true,
                original_order_id: Some(order.original_order_id),
            },
        );
        let line_id = self.staged.next_line_id();
        self.staged.lines.insert(
            line_id,
            ReturnableLine::new(
                line_id,
                id,
                order.sku_id,
                order.quantity,
                order.unit_price,
                None,
            ),
        );
        Ok(id)
    }

    async fn insert_qc_item(&mut self, item: &NewQcItem) -> Result<QcItemId, RepositoryError> {
        self.ensure_open()?;
        let next = i32::try_from(self.staged.qc_items.len())
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?
            + 1;
        let id = QcItemId::new(next);
        self.staged.qc_items.push(QcQueueItem {
            id,
            item: item.clone(),
        });
        Ok(id)
    }

    async fn append_events(&mut self, events: &[RecordedEvent]) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.staged.events.extend_from_slice(events);
        Ok(())
    }

    async fn enqueue(&mut self, messages: &[OutboxMessage]) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.staged.outbox.extend_from_slice(messages);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let mut guard = self.guard.take().ok_or(RepositoryError::TransactionClosed)?;
        if guard.faults.commit {
            guard.faults.commit = false;
            return Err(RepositoryError::Conflict("injected commit failure".to_string()));
        }
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn line(id: i32) -> ReturnableLine {
        ReturnableLine::new(
            LineId::new(id),
            OrderId::new(1),
            SkuId::new(1),
            1,
            Decimal::ONE_HUNDRED,
            None,
        )
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = InMemoryReturnStore::new();
        store.insert_line(line(1)).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut changed = line(1);
            changed.notes = Some("staged".to_string());
            tx.save_line(&changed).await.unwrap();
        }

        let stored = store.line(LineId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.notes, None);
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryReturnStore::new();
        store.insert_line(line(1)).await;

        let mut tx = store.begin().await.unwrap();
        let mut changed = line(1);
        changed.notes = Some("kept".to_string());
        tx.save_line(&changed).await.unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let stored = store.line(LineId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.notes.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_batch_lines_come_from_the_batch_record() {
        let store = InMemoryReturnStore::new();
        let first = BatchNumber::new("1001", 1);
        let second = BatchNumber::new("1001", 2);
        for (id, batch) in [(3, &first), (1, &first), (2, &second), (4, &first)] {
            let mut member = line(id);
            member.batch_number = Some(batch.clone());
            store.insert_line(member).await;
        }

        let mut tx = store.begin().await.unwrap();
        tx.insert_batch(&ReturnBatch {
            number: first.clone(),
            order_id: OrderId::new(1),
            line_ids: vec![LineId::new(3), LineId::new(1), LineId::new(2)],
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let ids: Vec<LineId> = tx
            .lock_batch_lines(&first)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        // Line 2 moved to a later batch; line 4 was never a member.
        assert_eq!(ids, vec![LineId::new(1), LineId::new(3)]);
        assert!(tx.lock_batch_lines(&second).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_save_failure_fires_once() {
        let store = InMemoryReturnStore::new();
        store.insert_line(line(1)).await;
        store.fail_saving_line(LineId::new(1)).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.save_line(&line(1)).await.is_err());
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.save_line(&line(1)).await.is_ok());
    }
}
