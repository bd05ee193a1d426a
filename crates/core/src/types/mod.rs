//! Core types for Threadline returns.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod batch;
pub mod error_code;
pub mod id;
pub mod money;
pub mod status;

pub use batch::{BatchNumber, BatchNumberError};
pub use error_code::ReturnErrorCode;
pub use id::*;
pub use money::{MONEY_SCALE, RefundAmounts};
pub use status::*;
