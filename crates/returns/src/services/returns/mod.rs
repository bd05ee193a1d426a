//! Return lifecycle & resolution engine.
//!
//! ```text
//! requested -> approved -> inspected -> complete
//!     \___________\____________\______-> cancelled | rejected | archived
//! ```
//!
//! Every operation opens one store transaction, re-reads its target lines
//! with row locks, checks preconditions against what it read, and commits
//! line updates, counter deltas, audit events and outbox intents together.
//! Calls to other systems (partner sync, notifications, exchange creation
//! after initiation) go through the outbox and never run inside the
//! transaction. The one exception is pickup booking, whose answer is needed
//! before the lines can be updated; it runs between a read transaction and
//! the write transaction.

mod action_queue;
mod closure;
mod counters;
mod eligibility;
mod initiate;
mod pickup;
mod receipt;
mod resolution;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use threadline_core::{LineId, ReturnStatus, StaffId};

use crate::db::{ReturnStore, ReturnTx, settings::parse_return_settings};
use crate::error::ReturnError;
use crate::logistics::LogisticsBooking;
use crate::models::{
    OutboxMessage, OutboxPayload, RETURN_SETTINGS_KEY, RecordedEvent, ReturnEvent,
    ReturnSettings, ReturnableLine,
};

pub use action_queue::{ActionItem, action_needed, build_action_queue};
pub use closure::{AUTO_REJECT_REASON, CloseReturn};
pub use counters::{CounterDelta, CounterProjection};
pub use eligibility::{Eligibility, EligibilityInput, evaluate};
pub use initiate::{InitiateReturn, InitiatedBatch, ReturnLineRequest};
pub use pickup::{SchedulePickup, ScheduledPickup};
pub use receipt::{ReceiveReturn, ReceivedReturn};
pub use resolution::{
    CalculateRefund, CompleteRefund, CreatedExchange, OverrideResolution, RefundCalculation,
};

/// The return engine.
///
/// Cheap to clone; clones share the store and logistics client.
#[derive(Clone)]
pub struct ReturnEngine {
    store: Arc<dyn ReturnStore>,
    logistics: Arc<dyn LogisticsBooking>,
}

impl std::fmt::Debug for ReturnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnEngine").finish_non_exhaustive()
    }
}

impl ReturnEngine {
    /// Create an engine over a store and a logistics booking service.
    #[must_use]
    pub fn new(store: Arc<dyn ReturnStore>, logistics: Arc<dyn LogisticsBooking>) -> Self {
        Self { store, logistics }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ReturnStore> {
        &self.store
    }

    /// Current return policy, or the defaults if none is stored.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN` if the settings row cannot be read.
    pub async fn settings(&self) -> Result<ReturnSettings, ReturnError> {
        let value = self.store.setting(RETURN_SETTINGS_KEY).await?;
        Ok(parse_return_settings(value))
    }

    /// Whether a return could be initiated for a line right now.
    ///
    /// # Errors
    ///
    /// Returns `LINE_NOT_FOUND` for an unknown line.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn eligibility(&self, line_id: LineId) -> Result<Eligibility, ReturnError> {
        let settings = self.settings().await?;
        let line = self
            .store
            .line(line_id)
            .await?
            .ok_or(ReturnError::LineNotFound(line_id))?;
        let sku = self.store.sku(line.sku_id).await?.ok_or_else(|| {
            ReturnError::Unknown(format!("SKU {} of line {line_id} is missing", line.sku_id))
        })?;
        Ok(evaluate(
            &EligibilityInput::for_line(&line, &sku),
            &settings,
            Utc::now(),
        ))
    }

    /// Open returns ordered by the next action they need.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN` if the store cannot be read.
    pub async fn action_queue(&self) -> Result<Vec<ActionItem>, ReturnError> {
        let lines = self.store.open_return_lines().await?;
        Ok(build_action_queue(&lines, Utc::now()))
    }
}

// =============================================================================
// Shared transaction plumbing
// =============================================================================

/// Everything one operation writes, flushed in a single commit.
struct Transition {
    actor: Option<StaffId>,
    at: DateTime<Utc>,
    lines: Vec<ReturnableLine>,
    events: Vec<RecordedEvent>,
    outbox: Vec<OutboxMessage>,
}

impl Transition {
    fn new(actor: Option<StaffId>, at: DateTime<Utc>) -> Self {
        Self {
            actor,
            at,
            lines: Vec::new(),
            events: Vec::new(),
            outbox: Vec::new(),
        }
    }

    fn record(&mut self, event: ReturnEvent) {
        self.events
            .push(RecordedEvent::new(self.actor, self.at, event));
    }

    fn enqueue(&mut self, payload: OutboxPayload) {
        self.outbox.push(OutboxMessage::pending(payload, self.at));
    }

    /// Save a line and tell the partner about its status, if it has one.
    fn save_with_status(&mut self, line: ReturnableLine) {
        if let Some(status) = line.status {
            self.enqueue(OutboxPayload::PartnerStatus {
                line_id: line.id,
                status,
            });
        }
        self.lines.push(line);
    }

    fn save(&mut self, line: ReturnableLine) {
        self.lines.push(line);
    }

    /// Write lines, projected counters, events and outbox, then commit.
    async fn commit(self, tx: &mut (dyn ReturnTx + '_)) -> Result<(), ReturnError> {
        for line in &self.lines {
            tx.save_line(line).await?;
        }
        let delta = CounterProjection::project(self.events.iter().map(|e| &e.event));
        if !delta.is_empty() {
            tx.apply_counters(&delta).await?;
        }
        tx.append_events(&self.events).await?;
        tx.enqueue(&self.outbox).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Lock one line, failing with `LINE_NOT_FOUND` if it does not exist.
async fn lock_line(
    tx: &mut (dyn ReturnTx + '_),
    line_id: LineId,
) -> Result<ReturnableLine, ReturnError> {
    tx.lock_lines(&[line_id])
        .await?
        .into_iter()
        .next()
        .ok_or(ReturnError::LineNotFound(line_id))
}

/// The line's current status, provided its return is still in flight.
fn require_active(line: &ReturnableLine) -> Result<ReturnStatus, ReturnError> {
    match line.status {
        None => Err(ReturnError::NoActiveReturn(line.id)),
        Some(status) if status.is_terminal() => Err(ReturnError::AlreadyTerminal {
            line_id: line.id,
            status,
        }),
        Some(status) => Ok(status),
    }
}

/// Require an exact status.
fn require_status(line: &ReturnableLine, expected: ReturnStatus) -> Result<(), ReturnError> {
    match line.status {
        None => Err(ReturnError::NoActiveReturn(line.id)),
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(ReturnError::WrongStatus {
            line_id: line.id,
            actual,
            expected: expected.to_string(),
        }),
    }
}
