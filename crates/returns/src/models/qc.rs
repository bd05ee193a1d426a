//! QC queue hand-off.

use serde::{Deserialize, Serialize};

use threadline_core::{ItemCondition, LineId, QcItemId, SkuId};

/// Entry inserted into the inspection team's QC queue at receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQcItem {
    /// Originating order line.
    pub line_id: LineId,
    pub sku_id: SkuId,
    /// Always the line's recorded return quantity.
    pub quantity: i32,
    pub condition: ItemCondition,
    pub notes: Option<String>,
}

/// A QC queue entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcQueueItem {
    pub id: QcItemId,
    #[serde(flatten)]
    pub item: NewQcItem,
}
