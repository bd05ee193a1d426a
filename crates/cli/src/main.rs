//! Threadline CLI - migrations and staff return operations.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! threadline migrate
//!
//! # Work the returns desk
//! threadline returns queue
//! threadline returns initiate --staff 3 --line 101 --reason damaged --resolution refund
//!
//! # One-shot worker jobs
//! threadline outbox drain
//! threadline sweep
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `returns` - Return lifecycle operations
//! - `settings` - Show or change the return policy
//! - `outbox drain` - Deliver pending side effects once
//! - `sweep` - Reject stale return requests once

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

use commands::returns::ReturnsAction;
use commands::settings::SettingsAction;

#[derive(Parser)]
#[command(name = "threadline")]
#[command(author, version, about = "Threadline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Return lifecycle operations
    Returns {
        #[command(subcommand)]
        action: ReturnsAction,
    },
    /// Show or change the return policy
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Outbox maintenance
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
    /// Reject return requests left in `requested` past the auto-reject threshold
    Sweep,
}

#[derive(Subcommand)]
enum OutboxAction {
    /// Deliver every due message once
    Drain,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadline_returns=info,threadline=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Returns { action } => commands::returns::run(action).await?,
        Commands::Settings { action } => commands::settings::run(action).await?,
        Commands::Outbox { action } => match action {
            OutboxAction::Drain => commands::worker::drain_outbox().await?,
        },
        Commands::Sweep => commands::worker::sweep().await?,
    }
    Ok(())
}
