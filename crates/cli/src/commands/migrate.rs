//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! threadline migrate
//! ```
//!
//! # Environment Variables
//!
//! - `RETURNS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/returns/migrations/`, applied in filename order:
//! ```text
//! migrations/
//! ├── 20261001000001_create_retail_schema.sql
//! ├── 20261001000002_create_return_workflow_tables.sql
//! └── ...
//! ```

use thiserror::Error;

use threadline_returns::config::{ConfigError, ReturnsConfig};
use threadline_returns::db::create_pool;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run the return engine migrations.
///
/// # Errors
///
/// Returns an error if configuration is missing, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let config = ReturnsConfig::from_env()?;

    tracing::info!("Connecting to returns database...");
    let pool = create_pool(&config.database_url).await?;

    tracing::info!("Running returns migrations...");
    sqlx::migrate!("../returns/migrations").run(&pool).await?;

    tracing::info!("Returns migrations complete!");
    Ok(())
}
