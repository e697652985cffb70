//! Local data model: the cached menu tree and the order lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{LocalId, PosId};

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

/// A restaurant location known to the POS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    #[serde(skip)]
    pub id: LocalId,
    #[serde(rename = "id")]
    pub pos_id: PosId,
    pub name: String,
    pub address: Option<String>,
    pub phone_number: String,
    #[serde(skip)]
    pub menu_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: LocalId,
    #[serde(skip)]
    pub pos_id: PosId,
    pub name: String,
    /// Local-only: hidden from the ordering app when false.
    #[serde(skip)]
    pub client_facing: bool,
    /// Local-only.
    pub instore_only: bool,
    pub menu_items: Vec<MenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuItem {
    pub id: LocalId,
    #[serde(skip)]
    pub pos_id: PosId,
    pub name: String,
    pub description: String,
    #[serde(skip)]
    pub category_id: LocalId,
    /// Site-scoped price, only present when read for a site.
    pub price: Option<i64>,
    pub modifiers: Vec<Modifier>,
    pub option_sets: Vec<OptionSet>,
}

/// A modification to a menu item, or to a specific order line.
///
/// `added`, `line_id` and `order_id` only mean something once the modifier
/// has been attached to a line; menu modifiers carry a `site_id` instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Modifier {
    pub id: LocalId,
    #[serde(skip)]
    pub pos_id: PosId,
    pub name: String,
    #[serde(rename = "price_ex_tax")]
    pub price: i64,
    #[serde(rename = "price")]
    pub price_with_tax: i64,
    #[serde(rename = "is_added")]
    pub added: bool,
    #[serde(skip)]
    pub site_id: Option<LocalId>,
    #[serde(skip)]
    pub line_id: Option<LocalId>,
    #[serde(skip)]
    pub order_id: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSet {
    pub id: LocalId,
    #[serde(skip)]
    pub pos_id: PosId,
    pub name: String,
    pub min_selection: i64,
    pub max_selection: i64,
    pub options: Vec<Modifier>,
}

/// The client-facing menu of one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMenu {
    pub site_id: PosId,
    pub updated_at: DateTime<Utc>,
    pub categories: Vec<Category>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    OnHold,
    Submitted,
    Accepted,
    Complete,
    Rejected,
    Deleted,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::OnHold => "ON_HOLD",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Rejected | OrderStatus::Deleted
        )
    }

    /// Statuses an unpaid order can be checked out from.
    pub fn is_payable_status(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::OnHold)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Pending | OnHold => matches!(
                next,
                Pending | OnHold | Submitted | Accepted | Complete | Rejected | Deleted
            ),
            Submitted => matches!(next, Accepted | OnHold | Rejected | Deleted),
            Accepted => matches!(next, Complete | OnHold | Rejected | Deleted),
            Complete | Rejected | Deleted => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "ON_HOLD" => Ok(OrderStatus::OnHold),
            "SUBMITTED" => Ok(OrderStatus::Submitted),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "COMPLETE" => Ok(OrderStatus::Complete),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "DELETED" => Ok(OrderStatus::Deleted),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    /// `None` until the order has been persisted.
    pub id: Option<LocalId>,
    #[serde(skip)]
    pub pos_id: PosId,
    pub site_id: PosId,
    pub status: OrderStatus,
    pub table_name: String,
    /// Empty when no pager is bound to the order.
    #[serde(rename = "puck_id")]
    pub pager_number: String,
    pub customer_id: Option<LocalId>,
    pub total: i64,
    pub total_tax: i64,
    pub lines: Vec<Line>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub pickup_time: Option<DateTime<Utc>>,
}

impl Order {
    /// Move to `next`. Entering a terminal status frees the pager for reuse.
    pub fn apply_status(&mut self, next: OrderStatus) {
        self.status = next;
        if next.is_terminal() {
            self.pager_number.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub id: Option<LocalId>,
    #[serde(skip)]
    pub pos_id: PosId,
    #[serde(skip)]
    pub order_id: Option<LocalId>,
    pub product_name: String,
    pub notes: String,
    pub quantity: i64,
    pub price: i64,
    pub total: i64,
    pub total_tax: i64,
    pub added_modifiers: Vec<Modifier>,
    pub removed_modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: LocalId,
    pub order_id: LocalId,
    pub amount: i64,
    pub tip: i64,
    pub transaction_id: String,
    pub paid_at: DateTime<Utc>,
    pub customer_id: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub amount: i64,
    pub tip: i64,
    pub transaction_id: String,
    pub customer_id: Option<LocalId>,
}

// ---------------------------------------------------------------------------
// Customers and new orders
// ---------------------------------------------------------------------------

/// A guest of the ordering app, mirrored as a customer on the POS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: LocalId,
    #[serde(skip)]
    pub pos_id: PosId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// A menu item the guest picked, addressed by local ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewOrderItem {
    #[serde(rename = "id")]
    pub menu_item_id: LocalId,
    pub quantity: i64,
    #[serde(default, rename = "modifiers")]
    pub modifier_ids: Vec<LocalId>,
    #[serde(default)]
    pub options: Vec<SelectedOption>,
}

/// One option chosen from an item's option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SelectedOption {
    pub option_set_id: LocalId,
    pub modifier_id: LocalId,
}

/// Takeaway pickup details entered by the customer at checkout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PickupDetails {
    pub pickup_time: DateTime<Utc>,
    pub customer_name: String,
    pub phone_number: String,
}
