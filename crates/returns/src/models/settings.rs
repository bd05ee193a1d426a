//! Return policy settings.

use serde::{Deserialize, Serialize};

/// Settings-table key holding the policy JSON.
pub const RETURN_SETTINGS_KEY: &str = "return_settings";

/// Upper bound for every day count in the policy.
pub const MAX_POLICY_DAYS: i64 = 3650;

/// Return policy, stored as a singleton JSON settings row.
///
/// Missing fields fall back to the defaults below, so a partially written
/// row still yields a usable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnSettings {
    /// Days after delivery during which a return may be requested.
    pub window_days: i64,
    /// Eligible lines within this many days of expiry are flagged as nearing expiry.
    pub warning_days: i64,
    /// Requests still in `requested` after this many days are auto-rejected.
    pub auto_reject_after_days: Option<i64>,
    /// Whether staff may initiate returns past the window.
    pub allow_expired_override: bool,
}

impl Default for ReturnSettings {
    fn default() -> Self {
        Self {
            window_days: 14,
            warning_days: 3,
            auto_reject_after_days: Some(30),
            allow_expired_override: false,
        }
    }
}

impl ReturnSettings {
    /// Check that every day count is in range.
    ///
    /// # Errors
    ///
    /// Returns a description of the first out-of-range field.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_POLICY_DAYS).contains(&self.window_days) {
            return Err(format!(
                "window_days must be between 1 and {MAX_POLICY_DAYS}, got {}",
                self.window_days
            ));
        }
        if !(0..=MAX_POLICY_DAYS).contains(&self.warning_days) {
            return Err(format!(
                "warning_days must be between 0 and {MAX_POLICY_DAYS}, got {}",
                self.warning_days
            ));
        }
        if let Some(days) = self.auto_reject_after_days
            && !(1..=MAX_POLICY_DAYS).contains(&days)
        {
            return Err(format!(
                "auto_reject_after_days must be between 1 and {MAX_POLICY_DAYS}, got {days}"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ReturnSettings::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_days_are_invalid() {
        let huge_sweep = ReturnSettings {
            auto_reject_after_days: Some(1_000_000_000_000_000_000),
            ..ReturnSettings::default()
        };
        assert!(huge_sweep.validate().unwrap_err().contains("auto_reject_after_days"));

        let huge_window = ReturnSettings {
            window_days: i64::MAX,
            ..ReturnSettings::default()
        };
        assert!(huge_window.validate().unwrap_err().contains("window_days"));

        let negative_warning = ReturnSettings {
            warning_days: -1,
            ..ReturnSettings::default()
        };
        assert!(negative_warning.validate().is_err());
    }

    #[test]
    fn test_partial_row_keeps_defaults() {
        let settings: ReturnSettings =
            serde_json::from_str(r#"{"allow_expired_override": true}"#).unwrap();
        assert!(settings.allow_expired_override);
        assert_eq!(settings.window_days, 14);
        assert_eq!(settings.auto_reject_after_days, Some(30));
    }

    #[test]
    fn test_auto_reject_can_be_disabled() {
        let settings: ReturnSettings =
            serde_json::from_str(r#"{"auto_reject_after_days": null}"#).unwrap();
        assert_eq!(settings.auto_reject_after_days, None);
    }
}
