//! Threadline returns worker.
//!
//! Drains the return outbox (partner status pushes, Slack batch
//! announcements, exchange creation retries) and periodically rejects
//! stale return requests.
//!
//! Migrations are not run here; use `threadline-cli migrate`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threadline_returns::config::ReturnsConfig;
use threadline_returns::db::{PgReturnStore, create_pool};
use threadline_returns::logistics::{CourierClient, LogisticsBooking, UnconfiguredLogistics};
use threadline_returns::partner::{PartnerClient, PartnerStatusSync};
use threadline_returns::slack::{BatchNotifier, SlackClient};
use threadline_returns::{OutboxWorker, ReturnEngine};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ReturnsConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let config = ReturnsConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "threadline_returns=info,threadline_returns_worker=info".into());

    // Use JSON format on Fly.io for structured log parsing, text format locally
    let is_fly = std::env::var("FLY_APP_NAME").is_ok();
    let json_layer = is_fly.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_fly).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    let logistics: Arc<dyn LogisticsBooking> = match &config.logistics {
        Some(api) => Arc::new(
            CourierClient::new(&api.base_url, api.api_key.clone())
                .expect("Failed to create logistics client"),
        ),
        None => Arc::new(UnconfiguredLogistics),
    };
    let partner: Option<Arc<dyn PartnerStatusSync>> = config.partner.as_ref().map(|api| {
        Arc::new(
            PartnerClient::new(&api.base_url, api.api_key.clone())
                .expect("Failed to create partner client"),
        ) as Arc<dyn PartnerStatusSync>
    });
    let notifier: Option<Arc<dyn BatchNotifier>> = config.slack.as_ref().map(|slack| {
        Arc::new(SlackClient::new(
            slack.bot_token.clone(),
            slack.channel_id.clone(),
        )) as Arc<dyn BatchNotifier>
    });

    let engine = ReturnEngine::new(Arc::new(PgReturnStore::new(pool)), logistics);
    let worker = OutboxWorker::new(engine.clone(), partner, notifier)
        .with_batch_size(config.outbox.batch_size)
        .with_max_attempts(config.outbox.max_attempts);

    tracing::info!(
        poll_secs = config.outbox.poll_interval.as_secs(),
        partner = config.partner.is_some(),
        slack = config.slack.is_some(),
        logistics = config.logistics.is_some(),
        "Returns worker started"
    );

    let mut poll = tokio::time::interval(config.outbox.poll_interval);
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = poll.tick() => {
                if let Err(e) = worker.drain(Utc::now()).await {
                    let event_id = sentry::capture_error(&e);
                    tracing::error!(error = %e, sentry_event_id = %event_id, "Outbox drain failed");
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = engine.sweep_stale_requests(Utc::now()).await {
                    e.report();
                }
            }
        }
    }

    tracing::info!("Returns worker stopped");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping worker");
}
