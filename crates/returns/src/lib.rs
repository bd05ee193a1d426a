//! Threadline return lifecycle & resolution engine.
//!
//! Tracks a merchandise return from the customer's request through pickup,
//! warehouse receipt and inspection, refund or exchange, and closure.
//!
//! - [`services::ReturnEngine`] - every staff-facing operation
//! - [`services::OutboxWorker`] - delivers side effects after commit
//! - [`db`] - `PostgreSQL` store and the in-memory store used by tests
//! - [`logistics`], [`partner`], [`slack`] - HTTP collaborators

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod logistics;
pub mod models;
pub mod partner;
pub mod services;
pub mod slack;

pub use error::{ErrorBody, ReturnError};
pub use services::{OutboxWorker, ReturnEngine};
