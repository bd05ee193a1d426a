//! Counter projection.
//!
//! SKU and customer return counters are never touched by handlers directly.
//! Handlers emit [`ReturnEvent`]s and this projection is the only code that
//! turns them into counter changes.

use std::collections::BTreeMap;

use threadline_core::{CustomerId, SkuId};

use crate::models::ReturnEvent;

/// Net counter changes to apply in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterDelta {
    /// `skus.return_count` change per SKU.
    pub sku_returns: BTreeMap<SkuId, i32>,
    /// `skus.write_off_count` change per SKU.
    pub sku_write_offs: BTreeMap<SkuId, i32>,
    /// `customers.return_count` change per customer.
    pub customer_returns: BTreeMap<CustomerId, i32>,
    /// `customers.exchange_count` change per customer.
    pub customer_exchanges: BTreeMap<CustomerId, i32>,
}

impl CounterDelta {
    /// Whether applying this delta would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sku_returns
            .values()
            .chain(self.sku_write_offs.values())
            .chain(self.customer_returns.values())
            .chain(self.customer_exchanges.values())
            .all(|v| *v == 0)
    }
}

fn bump<K: Ord>(map: &mut BTreeMap<K, i32>, key: K, by: i32) {
    *map.entry(key).or_insert(0) += by;
}

/// Derives counter changes from domain events.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterProjection;

impl CounterProjection {
    /// Fold `events` into a single delta.
    ///
    /// - `LineRequested`: SKU returns `+quantity`
    /// - `BatchInitiated`: customer returns `+1` (once per batch, not per line)
    /// - `ReturnCancelled`: SKU returns `-quantity`; customer returns `-1` only
    ///   when no other line of the batch is still active
    /// - `ItemWrittenOff`: SKU write-offs `+quantity`
    /// - `ExchangeCreated`: customer exchanges `+1`
    #[must_use]
    pub fn project<'a>(events: impl IntoIterator<Item = &'a ReturnEvent>) -> CounterDelta {
        let mut delta = CounterDelta::default();
        for event in events {
            match event {
                ReturnEvent::BatchInitiated { customer_id, .. } => {
                    bump(&mut delta.customer_returns, *customer_id, 1);
                }
                ReturnEvent::LineRequested {
                    sku_id, quantity, ..
                } => bump(&mut delta.sku_returns, *sku_id, *quantity),
                ReturnEvent::ReturnCancelled {
                    sku_id,
                    customer_id,
                    quantity,
                    other_active_in_batch,
                    ..
                } => {
                    bump(&mut delta.sku_returns, *sku_id, -*quantity);
                    if *other_active_in_batch == 0 {
                        bump(&mut delta.customer_returns, *customer_id, -1);
                    }
                }
                ReturnEvent::ItemWrittenOff {
                    sku_id, quantity, ..
                } => bump(&mut delta.sku_write_offs, *sku_id, *quantity),
                ReturnEvent::ExchangeCreated { customer_id, .. } => {
                    bump(&mut delta.customer_exchanges, *customer_id, 1);
                }
                ReturnEvent::ExpiredOverrideUsed { .. }
                | ReturnEvent::PickupScheduled { .. }
                | ReturnEvent::LineReceived { .. }
                | ReturnEvent::RefundCalculated { .. }
                | ReturnEvent::RefundCompleted { .. }
                | ReturnEvent::ReturnCompleted { .. }
                | ReturnEvent::ReturnRejected { .. }
                | ReturnEvent::ReturnArchived { .. }
                | ReturnEvent::NotesUpdated { .. }
                | ReturnEvent::ResolutionOverridden { .. } => {}
            }
        }
        delta
    }
}
