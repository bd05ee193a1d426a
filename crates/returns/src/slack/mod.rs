//! Slack notifications for the returns desk.
//!
//! Every newly initiated batch is announced in the ops channel so the
//! warehouse can plan pickups. Messages are sent by the outbox worker,
//! never inside an engine transaction.

mod client;
mod error;
mod messages;
mod types;

use async_trait::async_trait;

use threadline_core::{BatchNumber, ReturnReason, ReturnResolution};

pub use client::SlackClient;
pub use error::SlackError;
pub use messages::{batch_fallback_text, build_batch_message};
pub use types::{Block, PlainText, PostMessageResponse, Text};

/// Announces newly initiated return batches.
#[async_trait]
pub trait BatchNotifier: Send + Sync {
    async fn batch_initiated(
        &self,
        batch: &BatchNumber,
        line_count: usize,
        reason: ReturnReason,
        resolution: ReturnResolution,
    ) -> Result<(), SlackError>;
}

#[async_trait]
impl BatchNotifier for SlackClient {
    async fn batch_initiated(
        &self,
        batch: &BatchNumber,
        line_count: usize,
        reason: ReturnReason,
        resolution: ReturnResolution,
    ) -> Result<(), SlackError> {
        let blocks = build_batch_message(batch, line_count, reason, resolution);
        let fallback = batch_fallback_text(batch, line_count);
        self.post_message(blocks, Some(&fallback)).await?;
        Ok(())
    }
}
