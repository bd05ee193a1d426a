//! Status and classification enums for the return lifecycle.
//!
//! Every enum here has a stable `snake_case` wire form shared by serde, the
//! `PostgreSQL` enum types in the `retail` schema, and the CLI.

use serde::{Deserialize, Serialize};

/// Implements `as_str`, `Display` and `FromStr` over a fixed variant/name table.
macro_rules! str_enum {
    ($ty:ident, $label:literal { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// All variants, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stable wire name.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("invalid ", $label, ": {}"), s)),
                }
            }
        }
    };
}

/// Lifecycle state of a line's return.
///
/// ```text
/// requested -> approved -> inspected -> complete
///     \___________\____________\______-> cancelled | rejected | archived
/// ```
///
/// A line without any return has no status at all (`Option<ReturnStatus>` is
/// `None`); there is deliberately no "none" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.return_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    /// Customer asked for the return; awaiting pickup scheduling.
    Requested,
    /// Pickup scheduled (courier booked or drop-off agreed).
    Approved,
    /// Received at the warehouse and inspected.
    Inspected,
    /// Refund paid out or exchange order created, and the return closed.
    Complete,
    /// Withdrawn before completion.
    Cancelled,
    /// Refused by staff.
    Rejected,
    /// Force-closed by staff.
    Archived,
}

impl ReturnStatus {
    /// Whether no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Cancelled | Self::Rejected | Self::Archived
        )
    }

    /// Whether the return is still in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

str_enum!(ReturnStatus, "return status" {
    Requested => "requested",
    Approved => "approved",
    Inspected => "inspected",
    Complete => "complete",
    Cancelled => "cancelled",
    Rejected => "rejected",
    Archived => "archived",
});

/// Why the customer is returning the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.return_reason", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason {
    SizeTooSmall,
    SizeTooLarge,
    Defective,
    DamagedInTransit,
    WrongItemSent,
    NotAsDescribed,
    ChangedMind,
    Other,
}

str_enum!(ReturnReason, "return reason" {
    SizeTooSmall => "size_too_small",
    SizeTooLarge => "size_too_large",
    Defective => "defective",
    DamagedInTransit => "damaged_in_transit",
    WrongItemSent => "wrong_item_sent",
    NotAsDescribed => "not_as_described",
    ChangedMind => "changed_mind",
    Other => "other",
});

/// The customer's chosen outcome for a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.return_resolution", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ReturnResolution {
    Refund,
    Exchange,
}

str_enum!(ReturnResolution, "return resolution" {
    Refund => "refund",
    Exchange => "exchange",
});

/// How the item travels back to the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.pickup_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PickupType {
    /// We book a reverse pickup with a courier.
    ArrangedByUs,
    /// Customer drops the parcel at a store or partner point.
    Dropoff,
    /// Customer ships it back with their own courier.
    CustomerShipped,
}

str_enum!(PickupType, "pickup type" {
    ArrangedByUs => "arranged_by_us",
    Dropoff => "dropoff",
    CustomerShipped => "customer_shipped",
});

/// Physical condition recorded when the item is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.item_condition", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    /// Tags on, fit for restocking.
    Resellable,
    /// Needs steaming, re-tagging or a small repair.
    MinorDefect,
    /// Cannot be sold again.
    Damaged,
    /// Parts or accessories missing.
    Incomplete,
}

impl ItemCondition {
    /// Whether receiving an item in this condition writes it off.
    #[must_use]
    pub const fn is_write_off(&self) -> bool {
        matches!(self, Self::Damaged)
    }
}

str_enum!(ItemCondition, "item condition" {
    Resellable => "resellable",
    MinorDefect => "minor_defect",
    Damaged => "damaged",
    Incomplete => "incomplete",
});

/// How a refund is paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "retail.refund_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    OriginalPayment,
    StoreCredit,
    BankTransfer,
}

str_enum!(RefundMethod, "refund method" {
    OriginalPayment => "original_payment",
    StoreCredit => "store_credit",
    BankTransfer => "bank_transfer",
});

/// Why a line is (or is not) eligible for a new return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    Ok,
    NotDelivered,
    AlreadyActive,
    LineBlocked,
    ProductNonReturnable,
    Expired,
    /// Past the window, but policy lets staff override.
    ExpiredOverride,
}

str_enum!(EligibilityReason, "eligibility reason" {
    Ok => "ok",
    NotDelivered => "not_delivered",
    AlreadyActive => "already_active",
    LineBlocked => "line_blocked",
    ProductNonReturnable => "product_non_returnable",
    Expired => "expired",
    ExpiredOverride => "expired_override",
});

/// The next staff action an open return is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionNeeded {
    SchedulePickup,
    Receive,
    ProcessRefund,
    CreateExchange,
    Complete,
}

impl ActionNeeded {
    /// Queue priority; lower runs first.
    ///
    /// Items already in the warehouse come before items still with the
    /// customer, so received stock is never stuck behind pickup chores.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::ProcessRefund => 0,
            Self::CreateExchange => 1,
            Self::Complete => 2,
            Self::Receive => 3,
            Self::SchedulePickup => 4,
        }
    }
}

str_enum!(ActionNeeded, "action" {
    SchedulePickup => "schedule_pickup",
    Receive => "receive",
    ProcessRefund => "process_refund",
    CreateExchange => "create_exchange",
    Complete => "complete",
});
