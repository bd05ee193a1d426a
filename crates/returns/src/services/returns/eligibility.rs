//! Return eligibility policy.
//!
//! [`evaluate`] is the single source of truth consulted before any return is
//! initiated. It is pure: callers pass in `now` and the policy.

use chrono::{DateTime, Utc};
use serde::Serialize;

use threadline_core::{EligibilityReason, LineId, ReturnStatus};

use crate::error::ReturnError;
use crate::models::{ReturnSettings, ReturnableLine, Sku};

/// Facts about a line that eligibility depends on.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityInput<'a> {
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: Option<ReturnStatus>,
    /// Line-level "final sale" override.
    pub line_non_returnable: bool,
    pub product_returnable: bool,
    pub product_reason: Option<&'a str>,
}

impl<'a> EligibilityInput<'a> {
    /// Gather the inputs from a line and the SKU it sold.
    #[must_use]
    pub fn for_line(line: &ReturnableLine, sku: &'a Sku) -> Self {
        Self {
            delivered_at: line.delivered_at,
            status: line.status,
            line_non_returnable: line.non_returnable,
            product_returnable: sku.is_returnable,
            product_reason: sku.non_returnable_reason.as_deref(),
        }
    }
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: EligibilityReason,
    /// Whole days since delivery, when delivered.
    pub days_since_delivery: Option<i64>,
    /// Eligible, but with `warning_days` or fewer left in the window.
    pub nearing_expiry: bool,
    /// Extra context, e.g. why a product is non-returnable.
    pub detail: Option<String>,
}

impl Eligibility {
    fn blocked(reason: EligibilityReason, days: Option<i64>, detail: Option<String>) -> Self {
        Self {
            eligible: false,
            reason,
            days_since_delivery: days,
            nearing_expiry: false,
            detail,
        }
    }

    /// Whether staff are proceeding past the window under the override policy.
    #[must_use]
    pub fn is_override(&self) -> bool {
        self.reason == EligibilityReason::ExpiredOverride
    }

    /// The error initiation fails with, or `None` if the line may proceed.
    #[must_use]
    pub fn rejection(&self, line_id: LineId, settings: &ReturnSettings) -> Option<ReturnError> {
        if self.eligible {
            return None;
        }
        Some(match self.reason {
            EligibilityReason::AlreadyActive => ReturnError::AlreadyActive(line_id),
            EligibilityReason::Expired => ReturnError::WindowExpired {
                line_id,
                days_since_delivery: self.days_since_delivery.unwrap_or_default(),
                window_days: settings.window_days,
            },
            reason => ReturnError::NotEligible {
                line_id,
                reason: self
                    .detail
                    .as_ref()
                    .map_or_else(|| reason.to_string(), |d| format!("{reason}: {d}")),
            },
        })
    }
}

/// Decide whether a new return may be initiated.
///
/// Rules, first match wins:
/// 1. an active return blocks (`already_active`)
/// 2. a line or product flagged non-returnable blocks
/// 3. an undelivered line blocks (`not_delivered`)
/// 4. past the window: `expired_override` if policy allows it, else `expired`
/// 5. otherwise `ok`
#[must_use]
pub fn evaluate(
    input: &EligibilityInput<'_>,
    settings: &ReturnSettings,
    now: DateTime<Utc>,
) -> Eligibility {
    if input.status.is_some_and(|s| s.is_active()) {
        return Eligibility::blocked(EligibilityReason::AlreadyActive, None, None);
    }
    if input.line_non_returnable {
        return Eligibility::blocked(EligibilityReason::LineBlocked, None, None);
    }
    if !input.product_returnable {
        return Eligibility::blocked(
            EligibilityReason::ProductNonReturnable,
            None,
            input.product_reason.map(String::from),
        );
    }
    let Some(delivered_at) = input.delivered_at else {
        return Eligibility::blocked(EligibilityReason::NotDelivered, None, None);
    };

    let days = (now - delivered_at).num_days();
    if days > settings.window_days {
        if settings.allow_expired_override {
            return Eligibility {
                eligible: true,
                reason: EligibilityReason::ExpiredOverride,
                days_since_delivery: Some(days),
                nearing_expiry: false,
                detail: None,
            };
        }
        return Eligibility::blocked(EligibilityReason::Expired, Some(days), None);
    }

    Eligibility {
        eligible: true,
        reason: EligibilityReason::Ok,
        days_since_delivery: Some(days),
        nearing_expiry: settings.window_days.saturating_sub(days) <= settings.warning_days,
        detail: None,
    }
}
