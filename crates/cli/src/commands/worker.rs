//! One-shot runs of the worker's periodic jobs.
//!
//! # Usage
//!
//! ```bash
//! threadline outbox drain
//! threadline sweep
//! ```

use std::sync::Arc;

use chrono::Utc;

use threadline_returns::config::ReturnsConfig;
use threadline_returns::db::{PgReturnStore, create_pool};
use threadline_returns::logistics::UnconfiguredLogistics;
use threadline_returns::partner::{PartnerClient, PartnerStatusSync};
use threadline_returns::slack::{BatchNotifier, SlackClient};
use threadline_returns::{OutboxWorker, ReturnEngine};

async fn engine(config: &ReturnsConfig) -> Result<ReturnEngine, sqlx::Error> {
    let pool = create_pool(&config.database_url).await?;
    Ok(ReturnEngine::new(
        Arc::new(PgReturnStore::new(pool)),
        Arc::new(UnconfiguredLogistics),
    ))
}

/// Drain every due outbox message once.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the outbox cannot be read.
pub async fn drain_outbox() -> Result<(), Box<dyn std::error::Error>> {
    let config = ReturnsConfig::from_env()?;
    let engine = engine(&config).await?;

    let partner: Option<Arc<dyn PartnerStatusSync>> = match &config.partner {
        Some(api) => Some(Arc::new(PartnerClient::new(
            &api.base_url,
            api.api_key.clone(),
        )?)),
        None => None,
    };
    let notifier: Option<Arc<dyn BatchNotifier>> = config.slack.as_ref().map(|slack| {
        Arc::new(SlackClient::new(
            slack.bot_token.clone(),
            slack.channel_id.clone(),
        )) as Arc<dyn BatchNotifier>
    });

    let worker = OutboxWorker::new(engine, partner, notifier)
        .with_batch_size(config.outbox.batch_size)
        .with_max_attempts(config.outbox.max_attempts);
    let report = worker.drain(Utc::now()).await?;

    tracing::info!(
        delivered = report.delivered,
        retried = report.retried,
        dead = report.dead,
        "Outbox drain finished"
    );
    Ok(())
}

/// Reject stale `requested` returns once.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the store cannot be read.
pub async fn sweep() -> Result<(), Box<dyn std::error::Error>> {
    let config = ReturnsConfig::from_env()?;
    let engine = engine(&config).await?;
    let rejected = engine.sweep_stale_requests(Utc::now()).await?;
    tracing::info!(count = rejected.len(), lines = ?rejected, "Stale request sweep finished");
    Ok(())
}
