//! Monetary amounts for refund resolution.
//!
//! All amounts are `Decimal` in the store's currency unit (e.g. rupees, not
//! paise). The store sells in a single currency, so no currency code travels
//! with the amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places the store keeps for money.
pub const MONEY_SCALE: u32 = 2;

/// The inputs of a refund calculation.
///
/// The net refund is always derived from these three values and is never
/// stored independently of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundAmounts {
    /// Amount paid for the returned units.
    pub gross: Decimal,
    /// Order-level discount reclaimed because its qualifying purchase is being returned.
    pub discount_clawback: Decimal,
    /// Fees withheld from the refund (return shipping, damage, ...).
    pub deductions: Decimal,
}

impl RefundAmounts {
    /// Create a new set of refund inputs.
    #[must_use]
    pub const fn new(gross: Decimal, discount_clawback: Decimal, deductions: Decimal) -> Self {
        Self {
            gross,
            discount_clawback,
            deductions,
        }
    }

    /// `gross - discount_clawback - deductions`.
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.gross - self.discount_clawback - self.deductions
    }

    /// Whether any input has precision finer than [`MONEY_SCALE`].
    ///
    /// Trailing zeros do not count: `150.000` is a whole amount.
    #[must_use]
    pub fn has_sub_cent_input(&self) -> bool {
        [self.gross, self.discount_clawback, self.deductions]
            .iter()
            .any(|amount| amount.round_dp(MONEY_SCALE) != *amount)
    }

    /// Whether any input is negative.
    #[must_use]
    pub fn has_negative_input(&self) -> bool {
        [self.gross, self.discount_clawback, self.deductions]
            .iter()
            .any(|amount| *amount < Decimal::ZERO)
    }
}
