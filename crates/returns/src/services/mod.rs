//! Business logic for the return engine.

pub mod outbox;
pub mod returns;

pub use outbox::{DrainReport, OutboxWorker};
pub use returns::ReturnEngine;
