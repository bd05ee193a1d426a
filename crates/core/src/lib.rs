//! Threadline Core - Shared types library.
//!
//! This crate provides common types used across all Threadline components:
//! - `returns` - Return lifecycle & resolution engine and its outbox worker
//! - `cli` - Command-line tools for migrations and staff return operations
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, batch numbers, lifecycle enums, refund amounts and error codes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
