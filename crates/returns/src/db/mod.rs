//! Persistence for the return engine.
//!
//! # Database: `threadline`, schema `retail`
//!
//! ## Tables
//!
//! - `orders`, `order_lines` - Orders and their lines; return fields live on the line row
//! - `skus`, `customers` - Catalog and customer rows with return counters
//! - `return_batches` - Batch aggregate, unique per `(order_id, sequence)`
//! - `qc_queue` - Items handed to the inspection team
//! - `return_events` - Append-only audit log
//! - `outbox` - Side-effect intents drained by the worker
//! - `settings` - Application settings (JSONB)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/returns/migrations/` and run via:
//! ```bash
//! cargo run -p threadline-cli -- migrate
//! ```
//!
//! # Transactions
//!
//! Every engine operation runs inside one [`ReturnTx`]. Rows are re-read
//! with row locks inside the transaction before preconditions are checked,
//! so a concurrent loser sees the winner's status and fails cleanly.
//! Dropping a transaction without calling [`ReturnTx::commit`] rolls it back.

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;
pub mod settings;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use threadline_core::{BatchNumber, CustomerId, LineId, OrderId, QcItemId, SkuId};

use crate::models::{
    Customer, NewExchangeOrder, NewQcItem, Order, OutboxMessage, QcQueueItem, RecordedEvent,
    ReturnBatch, ReturnableLine, Sku,
};
use crate::services::returns::CounterDelta;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryReturnStore;
pub use postgres::PgReturnStore;
pub use settings::SettingsError;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate batch sequence).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The transaction was already committed.
    #[error("transaction already finished")]
    TransactionClosed,
}

impl From<SettingsError> for RepositoryError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Database(e) => Self::Database(e),
            SettingsError::Serialization(e) => Self::DataCorruption(e.to_string()),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Entry point to return persistence.
#[async_trait]
pub trait ReturnStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn ReturnTx + '_>, RepositoryError>;

    /// Read a line without locking it.
    async fn line(&self, id: LineId) -> Result<Option<ReturnableLine>, RepositoryError>;

    /// Lines whose return is `requested`, `approved` or `inspected`.
    async fn open_return_lines(&self) -> Result<Vec<ReturnableLine>, RepositoryError>;

    /// Lines still `requested` that were requested before `cutoff`.
    async fn stale_requested_lines(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LineId>, RepositoryError>;

    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError>;

    async fn customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;

    /// Audit trail for one line, oldest first.
    async fn line_events(&self, id: LineId) -> Result<Vec<RecordedEvent>, RepositoryError>;

    async fn qc_items(&self, line_id: LineId) -> Result<Vec<QcQueueItem>, RepositoryError>;

    /// Raw value of a settings row.
    async fn setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError>;

    /// Claim up to `limit` pending messages due at `now`.
    ///
    /// Claimed messages are leased: their next attempt moves to `now + lease`
    /// so a second worker does not pick them up while they are in flight.
    async fn claim_outbox(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, RepositoryError>;

    async fn mark_outbox_delivered(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Record a failed attempt and when to try again.
    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Record a final failed attempt and stop retrying.
    async fn mark_outbox_dead(&self, id: Uuid, error: &str) -> Result<(), RepositoryError>;
}

/// A unit of work against the return tables.
#[async_trait]
pub trait ReturnTx: Send {
    /// Lock and read lines. Missing ids are simply absent from the result.
    async fn lock_lines(&mut self, ids: &[LineId]) -> Result<Vec<ReturnableLine>, RepositoryError>;

    /// Lock and read the lines a batch was opened with, ordered by id.
    ///
    /// Membership comes from the batch record. Lines that have since been
    /// re-initiated into a later batch are left out.
    async fn lock_batch_lines(
        &mut self,
        batch: &BatchNumber,
    ) -> Result<Vec<ReturnableLine>, RepositoryError>;

    /// Lock an order row; serialises batch numbering per order.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn sku(&mut self, id: SkuId) -> Result<Option<Sku>, RepositoryError>;

    /// Number of batches already opened for an order.
    async fn count_batches(&mut self, order_id: OrderId) -> Result<i64, RepositoryError>;

    async fn insert_batch(&mut self, batch: &ReturnBatch) -> Result<(), RepositoryError>;

    /// Write back every return field of a line.
    async fn save_line(&mut self, line: &ReturnableLine) -> Result<(), RepositoryError>;

    async fn apply_counters(&mut self, delta: &CounterDelta) -> Result<(), RepositoryError>;

    async fn insert_exchange_order(
        &mut self,
        order: &NewExchangeOrder,
    ) -> Result<OrderId, RepositoryError>;

    async fn insert_qc_item(&mut self, item: &NewQcItem) -> Result<QcItemId, RepositoryError>;

    async fn append_events(&mut self, events: &[RecordedEvent]) -> Result<(), RepositoryError>;

    async fn enqueue(&mut self, messages: &[OutboxMessage]) -> Result<(), RepositoryError>;

    /// Make everything written through this transaction durable.
    async fn commit(&mut self) -> Result<(), RepositoryError>;
}
