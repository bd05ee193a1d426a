//! Settings database operations.

use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::{RETURN_SETTINGS_KEY, ReturnSettings};

/// Error type for settings operations.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Get a setting value.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub async fn get_setting(pool: &PgPool, key: &str) -> Result<Option<JsonValue>, SettingsError> {
    let value = sqlx::query_scalar::<_, JsonValue>(
        r"
        SELECT value FROM retail.settings
        WHERE key = $1
        ",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(value)
}

/// Set a setting value.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub async fn set_setting(pool: &PgPool, key: &str, value: &JsonValue) -> Result<(), SettingsError> {
    sqlx::query(
        r"
        INSERT INTO retail.settings (key, value)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
        ",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the return policy.
///
/// # Errors
///
/// Returns an error if serialization or the database write fails.
pub async fn set_return_settings(
    pool: &PgPool,
    settings: &ReturnSettings,
) -> Result<(), SettingsError> {
    let value = serde_json::to_value(settings)?;
    set_setting(pool, RETURN_SETTINGS_KEY, &value).await
}

/// Interpret a raw settings row, falling back to defaults.
///
/// An unparseable or out-of-range row is logged and ignored rather than
/// blocking returns.
#[must_use]
pub fn parse_return_settings(value: Option<JsonValue>) -> ReturnSettings {
    let Some(value) = value else {
        return ReturnSettings::default();
    };
    let settings = match serde_json::from_value::<ReturnSettings>(value) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid return_settings row, using defaults");
            return ReturnSettings::default();
        }
    };
    match settings.validate() {
        Ok(()) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "Out-of-range return_settings row, using defaults");
            ReturnSettings::default()
        }
    }
}
