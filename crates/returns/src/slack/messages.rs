//! Slack message builders for return notifications.

use threadline_core::{BatchNumber, ReturnReason, ReturnResolution};

use super::types::{Block, PlainText, Text};

/// Build the announcement for a newly initiated return batch.
#[must_use]
pub fn build_batch_message(
    batch: &BatchNumber,
    line_count: usize,
    reason: ReturnReason,
    resolution: ReturnResolution,
) -> Vec<Block> {
    let emoji = match resolution {
        ReturnResolution::Refund => ":money_with_wings:",
        ReturnResolution::Exchange => ":arrows_counterclockwise:",
    };
    let items = if line_count == 1 { "item" } else { "items" };

    vec![
        Block::Header {
            text: PlainText::new(format!("New return batch {batch}")),
        },
        Block::Section {
            text: Text::mrkdwn(format!(
                "{emoji} *{line_count} {items}* from order *{}*",
                batch.order_number()
            )),
            fields: vec![
                Text::mrkdwn(format!("*Resolution:*\n{}", humanize(resolution.as_str()))),
                Text::mrkdwn(format!("*Reason:*\n{}", humanize(reason.as_str()))),
            ],
        },
        Block::Divider,
        Block::Context {
            elements: vec![Text::mrkdwn("Next step: schedule pickup")],
        },
    ]
}

/// Plain-text fallback for notifications and screen readers.
#[must_use]
pub fn batch_fallback_text(batch: &BatchNumber, line_count: usize) -> String {
    format!("New return batch {batch} ({line_count} items)")
}

/// `size_too_small` -> `Size too small`.
fn humanize(wire: &str) -> String {
    let spaced = wire.replace('_', " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
