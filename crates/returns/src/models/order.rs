//! Orders, SKUs and customers as the return engine sees them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use threadline_core::{CustomerId, OrderId, ProductId, SkuId, VariationId};

/// An order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number, e.g. `64168`. Batch numbers build on it.
    pub number: String,
    pub customer_id: CustomerId,
    /// Whether this order was created by the exchange flow.
    pub is_exchange: bool,
    /// For exchange orders, the order the returned item came from.
    pub original_order_id: Option<OrderId>,
}

/// A sellable SKU with its return counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub id: SkuId,
    pub product_id: ProductId,
    /// Colour/print variation; same-variation exchanges keep the paid price.
    pub variation_id: VariationId,
    pub code: String,
    /// List price, charged for cross-variation exchanges.
    pub mrp: Decimal,
    /// Product-level returnability flag.
    pub is_returnable: bool,
    pub non_returnable_reason: Option<String>,
    /// Lines of this SKU that are in, or went through, a return.
    pub return_count: i32,
    /// Units received damaged.
    pub write_off_count: i32,
}

/// A customer and their return counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub return_count: i32,
    pub exchange_count: i32,
}

/// Exchange order to be created for a returned line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExchangeOrder {
    /// `{original number}-EX-{line id}`; unique per line.
    pub number: String,
    pub customer_id: CustomerId,
    pub original_order_id: OrderId,
    pub sku_id: SkuId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl NewExchangeOrder {
    /// Order number for the exchange created off `line_id` of `original`.
    #[must_use]
    pub fn number_for(original: &Order, line_id: threadline_core::LineId) -> String {
        format!("{}-EX-{line_id}", original.number)
    }
}
