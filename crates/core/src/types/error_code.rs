//! Stable error codes for return-lifecycle failures.

use serde::{Deserialize, Serialize};

/// Closed set of machine-readable failure codes.
///
/// Codes are part of the staff tooling contract: callers branch on them, so
/// a variant is never renamed once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnErrorCode {
    LineNotFound,
    InvalidQuantity,
    InvalidAmount,
    AlreadyActive,
    NotEligible,
    WindowExpired,
    WrongStatus,
    AlreadyTerminal,
    NoActiveReturn,
    NotRefundResolution,
    RefundNotCalculated,
    RefundNotCompleted,
    ExchangeSkuNotFound,
    ExchangeAlreadyCreated,
    ExchangeNotCreated,
    PickupBookingFailed,
    Unknown,
}

impl ReturnErrorCode {
    /// The code as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LineNotFound => "LINE_NOT_FOUND",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::AlreadyActive => "ALREADY_ACTIVE",
            Self::NotEligible => "NOT_ELIGIBLE",
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::WrongStatus => "WRONG_STATUS",
            Self::AlreadyTerminal => "ALREADY_TERMINAL",
            Self::NoActiveReturn => "NO_ACTIVE_RETURN",
            Self::NotRefundResolution => "NOT_REFUND_RESOLUTION",
            Self::RefundNotCalculated => "REFUND_NOT_CALCULATED",
            Self::RefundNotCompleted => "REFUND_NOT_COMPLETED",
            Self::ExchangeSkuNotFound => "EXCHANGE_SKU_NOT_FOUND",
            Self::ExchangeAlreadyCreated => "EXCHANGE_ALREADY_CREATED",
            Self::ExchangeNotCreated => "EXCHANGE_NOT_CREATED",
            Self::PickupBookingFailed => "PICKUP_BOOKING_FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ReturnErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
