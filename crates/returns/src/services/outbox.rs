//! Outbox worker.
//!
//! Engine operations write side-effect intents into the outbox in the same
//! transaction as the state change. The worker claims due messages,
//! dispatches them and records the outcome:
//!
//! - success: `delivered`
//! - transport failure: retried with exponential backoff, `dead` after
//!   `max_attempts`
//! - domain refusal (the engine said no): `dead` straight away, except
//!   `EXCHANGE_ALREADY_CREATED`, which means the work is already done

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{RepositoryError, ReturnStore};
use crate::error::ReturnError;
use crate::models::{OutboxMessage, OutboxPayload};
use crate::partner::{PartnerError, PartnerStatusSync};
use crate::services::returns::ReturnEngine;
use crate::slack::{BatchNotifier, SlackError};

const DEFAULT_BATCH_SIZE: i64 = 50;
const DEFAULT_MAX_ATTEMPTS: i32 = 8;
/// How long a claimed message stays invisible to other workers.
const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Why a dispatch failed.
#[derive(Debug, Error)]
enum DispatchError {
    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Slack(#[from] SlackError),

    /// The engine refused or failed the work.
    #[error(transparent)]
    Engine(#[from] ReturnError),
}

impl DispatchError {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Partner(_) | Self::Slack(_) => true,
            Self::Engine(e) => e.is_unexpected(),
        }
    }
}

/// Outcome counts of one [`OutboxWorker::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

impl DrainReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.delivered + self.retried + self.dead
    }
}

/// Delivers outbox messages.
#[derive(Clone)]
pub struct OutboxWorker {
    store: Arc<dyn ReturnStore>,
    engine: ReturnEngine,
    partner: Option<Arc<dyn PartnerStatusSync>>,
    notifier: Option<Arc<dyn BatchNotifier>>,
    batch_size: i64,
    max_attempts: i32,
    min_delay: Duration,
    max_delay: Duration,
}

impl std::fmt::Debug for OutboxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxWorker")
            .field("partner", &self.partner.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("batch_size", &self.batch_size)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl OutboxWorker {
    /// Create a worker over the engine's store.
    ///
    /// Partner sync and Slack are optional; without them their messages are
    /// marked delivered and dropped.
    #[must_use]
    pub fn new(
        engine: ReturnEngine,
        partner: Option<Arc<dyn PartnerStatusSync>>,
        notifier: Option<Arc<dyn BatchNotifier>>,
    ) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            partner,
            notifier,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Bounds of the retry delay between attempts.
    #[must_use]
    pub const fn with_backoff(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before the next attempt, given the attempts already failed.
    fn retry_delay(&self, failed_attempts: i32) -> Duration {
        let index = usize::try_from(failed_attempts).unwrap_or(0);
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(index + 1)
            .with_jitter()
            .build()
            .nth(index)
            .unwrap_or(self.max_delay)
    }

    /// Claim and dispatch every message due at `now`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if messages cannot be claimed or their
    /// outcome cannot be recorded. Dispatch failures are recorded, not returned.
    #[instrument(skip(self))]
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport, RepositoryError> {
        let messages = self
            .store
            .claim_outbox(now, self.batch_size, CLAIM_LEASE)
            .await?;

        let mut report = DrainReport::default();
        for message in messages {
            match self.dispatch(&message.payload).await {
                Ok(()) => {
                    self.store.mark_outbox_delivered(message.id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    if self.record_failure(&message, &e, now).await? {
                        report.retried += 1;
                    } else {
                        report.dead += 1;
                    }
                }
            }
        }

        if report.total() > 0 {
            info!(
                delivered = report.delivered,
                retried = report.retried,
                dead = report.dead,
                "Outbox drained"
            );
        }
        Ok(report)
    }

    /// Record a failed dispatch. Returns whether the message will be retried.
    async fn record_failure(
        &self,
        message: &OutboxMessage,
        err: &DispatchError,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let attempt = message.attempts + 1;
        let text = err.to_string();

        if !err.is_retryable() || attempt >= self.max_attempts {
            self.store.mark_outbox_dead(message.id, &text).await?;
            let event_id = sentry::capture_error(err);
            error!(
                id = %message.id,
                kind = message.payload.kind(),
                attempt,
                error = %text,
                sentry_event_id = %event_id,
                "Outbox message parked as dead"
            );
            return Ok(false);
        }

        let delay = self.retry_delay(message.attempts);
        let next_attempt_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::hours(1));
        self.store
            .mark_outbox_failed(message.id, &text, next_attempt_at)
            .await?;
        warn!(
            id = %message.id,
            kind = message.payload.kind(),
            attempt,
            retry_in_secs = delay.as_secs(),
            error = %text,
            "Outbox delivery failed, will retry"
        );
        Ok(true)
    }

    async fn dispatch(&self, payload: &OutboxPayload) -> Result<(), DispatchError> {
        match payload {
            OutboxPayload::PartnerStatus { line_id, status } => {
                let Some(partner) = &self.partner else {
                    debug!(line_id = %line_id, "Partner sync not configured, dropping status push");
                    return Ok(());
                };
                partner.push_status(*line_id, *status).await?;
            }
            OutboxPayload::BatchNotification {
                batch,
                line_count,
                reason,
                resolution,
            } => {
                let Some(notifier) = &self.notifier else {
                    debug!(batch = %batch, "Slack not configured, dropping batch notification");
                    return Ok(());
                };
                notifier
                    .batch_initiated(batch, *line_count, *reason, *resolution)
                    .await?;
            }
            OutboxPayload::CreateExchange { line_id } => {
                match self.engine.create_exchange(*line_id, None).await {
                    Ok(_) | Err(ReturnError::ExchangeAlreadyCreated(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use threadline_core::{LineId, ReturnStatus};

    use super::*;
    use crate::db::{InMemoryReturnStore, ReturnTx};
    use crate::logistics::UnconfiguredLogistics;
    use crate::models::OutboxStatus;

    /// Fails the first `failures` pushes.
    struct FlakyPartner {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PartnerStatusSync for FlakyPartner {
        async fn push_status(
            &self,
            _line_id: LineId,
            _status: ReturnStatus,
        ) -> Result<(), PartnerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PartnerError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn worker(
        store: &InMemoryReturnStore,
        partner: Option<Arc<dyn PartnerStatusSync>>,
    ) -> OutboxWorker {
        let engine = ReturnEngine::new(Arc::new(store.clone()), Arc::new(UnconfiguredLogistics));
        OutboxWorker::new(engine, partner, None)
            .with_max_attempts(3)
            .with_backoff(Duration::ZERO, Duration::ZERO)
    }

    async fn only_message(store: &InMemoryReturnStore) -> OutboxMessage {
        store.outbox().await.into_iter().next().unwrap()
    }

    async fn enqueue_status(store: &InMemoryReturnStore, now: DateTime<Utc>) {
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(&[OutboxMessage::pending(
            OutboxPayload::PartnerStatus {
                line_id: LineId::new(1),
                status: ReturnStatus::Requested,
            },
            now,
        )])
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_partner_marks_delivered() {
        let store = InMemoryReturnStore::new();
        let now = Utc::now();
        enqueue_status(&store, now).await;

        let report = worker(&store, None).drain(now).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(only_message(&store).await.status, OutboxStatus::Delivered);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried_then_delivered() {
        let store = InMemoryReturnStore::new();
        let now = Utc::now();
        enqueue_status(&store, now).await;
        let partner = Arc::new(FlakyPartner {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let worker = worker(&store, Some(partner));

        let first = worker.drain(now).await.unwrap();
        assert_eq!(first.retried, 1);
        let message = only_message(&store).await;
        assert_eq!(message.status, OutboxStatus::Pending);
        assert_eq!(message.attempts, 1);

        let second = worker.drain(now + TimeDelta::seconds(1)).await.unwrap();
        assert_eq!(second.delivered, 1);
    }

    #[tokio::test]
    async fn test_message_is_dead_after_max_attempts() {
        let store = InMemoryReturnStore::new();
        let now = Utc::now();
        enqueue_status(&store, now).await;
        let partner = Arc::new(FlakyPartner {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let worker = worker(&store, Some(partner));

        for i in 0..3 {
            worker.drain(now + TimeDelta::seconds(i)).await.unwrap();
        }

        let message = only_message(&store).await;
        assert_eq!(message.status, OutboxStatus::Dead);
        assert_eq!(message.attempts, 3);
        assert!(message.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_exchange_for_unknown_line_is_dead_immediately() {
        let store = InMemoryReturnStore::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(&[OutboxMessage::pending(
            OutboxPayload::CreateExchange {
                line_id: LineId::new(404),
            },
            now,
        )])
        .await
        .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let report = worker(&store, None).drain(now).await.unwrap();

        assert_eq!(report.dead, 1);
        assert_eq!(only_message(&store).await.attempts, 1);
    }
}
