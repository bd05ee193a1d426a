//! Return engine error type.
//!
//! Every engine operation returns `Result<T, ReturnError>`. Domain rule
//! violations are ordinary variants that callers branch on via
//! [`ReturnError::code`]; infrastructure failures collapse into
//! [`ReturnError::Unknown`] with the underlying message kept for diagnostics.

use serde::Serialize;
use thiserror::Error;

use threadline_core::{LineId, ReturnErrorCode, ReturnResolution, ReturnStatus, SkuId};

use crate::db::RepositoryError;

/// A failed return operation.
#[derive(Debug, Error)]
pub enum ReturnError {
    #[error("order line {0} not found")]
    LineNotFound(LineId),

    /// Bad quantity, empty or duplicated selection, or lines from several orders.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("line {0} already has an active return")]
    AlreadyActive(LineId),

    #[error("line {line_id} is not eligible for return: {reason}")]
    NotEligible { line_id: LineId, reason: String },

    #[error("return window expired for line {line_id} ({days_since_delivery} days since delivery, window is {window_days})")]
    WindowExpired {
        line_id: LineId,
        days_since_delivery: i64,
        window_days: i64,
    },

    #[error("line {line_id} is {actual}, expected {expected}")]
    WrongStatus {
        line_id: LineId,
        actual: ReturnStatus,
        expected: String,
    },

    #[error("return on line {line_id} is already {status}")]
    AlreadyTerminal {
        line_id: LineId,
        status: ReturnStatus,
    },

    #[error("line {0} has no active return")]
    NoActiveReturn(LineId),

    #[error("line {line_id} resolution is {resolution}, not refund")]
    NotRefundResolution {
        line_id: LineId,
        resolution: ReturnResolution,
    },

    #[error("refund for line {0} has not been calculated")]
    RefundNotCalculated(LineId),

    #[error("refund for line {0} has not been completed")]
    RefundNotCompleted(LineId),

    /// `None` when an exchange was requested without naming a SKU.
    #[error("exchange SKU {} not found", .0.map_or_else(|| "(none given)".to_string(), |id| id.to_string()))]
    ExchangeSkuNotFound(Option<SkuId>),

    #[error("exchange order already created for line {0}")]
    ExchangeAlreadyCreated(LineId),

    #[error("exchange order not yet created for line {0}")]
    ExchangeNotCreated(LineId),

    #[error("pickup booking failed: {0}")]
    PickupBookingFailed(String),

    /// Unexpected infrastructure failure.
    #[error("unexpected error: {0}")]
    Unknown(String),
}

/// Serializable `{ code, message }` pair handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: ReturnErrorCode,
    pub message: String,
}

impl ReturnError {
    /// The stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> ReturnErrorCode {
        match self {
            Self::LineNotFound(_) => ReturnErrorCode::LineNotFound,
            Self::InvalidQuantity(_) => ReturnErrorCode::InvalidQuantity,
            Self::InvalidAmount(_) => ReturnErrorCode::InvalidAmount,
            Self::AlreadyActive(_) => ReturnErrorCode::AlreadyActive,
            Self::NotEligible { .. } => ReturnErrorCode::NotEligible,
            Self::WindowExpired { .. } => ReturnErrorCode::WindowExpired,
            Self::WrongStatus { .. } => ReturnErrorCode::WrongStatus,
            Self::AlreadyTerminal { .. } => ReturnErrorCode::AlreadyTerminal,
            Self::NoActiveReturn(_) => ReturnErrorCode::NoActiveReturn,
            Self::NotRefundResolution { .. } => ReturnErrorCode::NotRefundResolution,
            Self::RefundNotCalculated(_) => ReturnErrorCode::RefundNotCalculated,
            Self::RefundNotCompleted(_) => ReturnErrorCode::RefundNotCompleted,
            Self::ExchangeSkuNotFound(_) => ReturnErrorCode::ExchangeSkuNotFound,
            Self::ExchangeAlreadyCreated(_) => ReturnErrorCode::ExchangeAlreadyCreated,
            Self::ExchangeNotCreated(_) => ReturnErrorCode::ExchangeNotCreated,
            Self::PickupBookingFailed(_) => ReturnErrorCode::PickupBookingFailed,
            Self::Unknown(_) => ReturnErrorCode::Unknown,
        }
    }

    /// The error as a `{ code, message }` body.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }

    /// Whether this is an infrastructure failure rather than a rule violation.
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Log the error, sending unexpected failures to Sentry.
    pub fn report(&self) {
        if self.is_unexpected() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Return operation failed unexpectedly"
            );
        } else {
            tracing::warn!(code = %self.code(), error = %self, "Return operation refused");
        }
    }
}

impl From<RepositoryError> for ReturnError {
    fn from(err: RepositoryError) -> Self {
        Self::Unknown(err.to_string())
    }
}

impl From<sqlx::Error> for ReturnError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unknown(RepositoryError::from(err).to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            ReturnError::AlreadyActive(LineId::new(1)).code().as_str(),
            "ALREADY_ACTIVE"
        );
        assert_eq!(
            ReturnError::RefundNotCompleted(LineId::new(1)).code().as_str(),
            "REFUND_NOT_COMPLETED"
        );
    }

    #[test]
    fn test_repository_errors_become_unknown_with_message() {
        let err: ReturnError = RepositoryError::DataCorruption("bad batch".to_string()).into();
        assert_eq!(err.code(), ReturnErrorCode::Unknown);
        assert!(err.to_string().contains("bad batch"));
        assert!(err.is_unexpected());
    }

    #[test]
    fn test_body_serializes_code_and_message() {
        let err = ReturnError::WrongStatus {
            line_id: LineId::new(9),
            actual: ReturnStatus::Approved,
            expected: "requested".to_string(),
        };
        let json = serde_json::to_value(err.body()).unwrap();
        assert_eq!(json["code"], "WRONG_STATUS");
        assert_eq!(json["message"], "line 9 is approved, expected requested");
    }
}
