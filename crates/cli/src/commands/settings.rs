//! Return policy settings.
//!
//! # Usage
//!
//! ```bash
//! threadline settings show
//! threadline settings set --window-days 30 --allow-expired-override true
//! ```

use clap::Subcommand;

use threadline_returns::config::ReturnsConfig;
use threadline_returns::db::create_pool;
use threadline_returns::db::settings::{get_setting, parse_return_settings, set_return_settings};
use threadline_returns::models::{MAX_POLICY_DAYS, RETURN_SETTINGS_KEY, ReturnSettings};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the effective return policy
    Show,
    /// Change the return policy; unspecified fields keep their current value
    Set {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_POLICY_DAYS))]
        window_days: Option<i64>,
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_POLICY_DAYS))]
        warning_days: Option<i64>,
        /// Days before stale requests are auto-rejected; 0 disables the sweep
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_POLICY_DAYS))]
        auto_reject_after_days: Option<i64>,
        #[arg(long)]
        allow_expired_override: Option<bool>,
    },
}

/// Apply `set` arguments on top of the current policy.
fn apply(
    mut settings: ReturnSettings,
    window_days: Option<i64>,
    warning_days: Option<i64>,
    auto_reject_after_days: Option<i64>,
    allow_expired_override: Option<bool>,
) -> ReturnSettings {
    if let Some(days) = window_days {
        settings.window_days = days;
    }
    if let Some(days) = warning_days {
        settings.warning_days = days;
    }
    if let Some(days) = auto_reject_after_days {
        settings.auto_reject_after_days = (days > 0).then_some(days);
    }
    if let Some(allow) = allow_expired_override {
        settings.allow_expired_override = allow;
    }
    settings
}

/// Run a settings subcommand.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the settings row cannot
/// be read or written.
pub async fn run(action: SettingsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReturnsConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let current = parse_return_settings(get_setting(&pool, RETURN_SETTINGS_KEY).await?);

    let settings = match action {
        SettingsAction::Show => current,
        SettingsAction::Set {
            window_days,
            warning_days,
            auto_reject_after_days,
            allow_expired_override,
        } => {
            let updated = apply(
                current,
                window_days,
                warning_days,
                auto_reject_after_days,
                allow_expired_override,
            );
            updated.validate()?;
            set_return_settings(&pool, &updated).await?;
            tracing::info!("Return settings updated");
            updated
        }
    };

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    }
    Ok(())
}
