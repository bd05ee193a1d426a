//! Domain models for the return engine.

pub mod batch;
pub mod event;
pub mod line;
pub mod order;
pub mod outbox;
pub mod qc;
pub mod settings;

pub use batch::ReturnBatch;
pub use event::{RecordedEvent, ReturnEvent};
pub use line::{
    ClosureDetails, ExchangeDetails, InspectionDetails, PickupDetails, RefundDetails,
    ReturnableLine,
};
pub use order::{Customer, NewExchangeOrder, Order, Sku};
pub use outbox::{OutboxMessage, OutboxPayload, OutboxStatus};
pub use qc::{NewQcItem, QcQueueItem};
pub use settings::{MAX_POLICY_DAYS, RETURN_SETTINGS_KEY, ReturnSettings};
