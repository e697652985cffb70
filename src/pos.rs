//! POS-side data transfer types and the client contract.
//!
//! These mirror what the POS returns and carry no local ids. The menu hash
//! is computed over [`PosCategory`] trees, so field order here is part of
//! the digest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PosError;
use crate::ids::PosId;
use crate::model::{NewCustomer, OrderStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosSite {
    pub id: PosId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosMenu {
    #[serde(default)]
    pub categories: Vec<PosCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosCategory {
    pub id: PosId,
    pub name: String,
    #[serde(default)]
    pub menu_items: Vec<PosMenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosMenuItem {
    pub id: PosId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub modifiers: Vec<PosModifier>,
    #[serde(default)]
    pub option_sets: Vec<PosOptionSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosModifier {
    pub id: PosId,
    pub name: String,
    /// Ex-tax.
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub price_with_tax: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosOptionSet {
    pub id: PosId,
    pub name: String,
    #[serde(default)]
    pub min_selection: i64,
    #[serde(default)]
    pub max_selection: i64,
    #[serde(default)]
    pub options: Vec<PosModifier>,
}

/// An order as the POS reports it, either from a fetch or a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosOrder {
    pub id: PosId,
    pub site_id: PosId,
    pub status: OrderStatus,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub pager_number: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub total_tax: i64,
    #[serde(default)]
    pub lines: Vec<PosLine>,
}

impl PosOrder {
    /// Parse the body of a POS order webhook.
    pub fn from_webhook(body: &[u8]) -> Result<Self, PosError> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosLine {
    pub id: PosId,
    pub product_name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub total_tax: i64,
    /// Signed modifier ids: negative means the modifier was removed.
    #[serde(default)]
    pub modifiers: Vec<i64>,
}

fn default_quantity() -> i64 {
    1
}

/// A menu item to put on a POS order, with every id translated to the POS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosOrderItem {
    pub menu_item_id: PosId,
    pub quantity: i64,
    pub modifiers: Vec<PosId>,
    pub options: Vec<PosSelectedOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosSelectedOption {
    pub option_set_id: PosId,
    pub modifier_id: PosId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosCustomer {
    pub id: PosId,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
}

/// Operations the reconciliation core needs from the POS.
#[async_trait]
pub trait PosClient: Send + Sync {
    async fn get_all_sites(&self) -> Result<Vec<PosSite>, PosError>;

    async fn get_menu_for_site(&self, site_id: PosId) -> Result<PosMenu, PosError>;

    async fn get_order(&self, order_id: PosId) -> Result<PosOrder, PosError>;

    /// Open a new order on the POS tagged with the pager number.
    async fn create_order_for_pager(
        &self,
        site_id: PosId,
        pager_number: i64,
    ) -> Result<PosOrder, PosError>;

    async fn link_order_with_table(&self, order_id: PosId, table_name: &str)
        -> Result<(), PosError>;

    async fn set_order_notes(&self, order_id: PosId, notes: &str) -> Result<(), PosError>;

    async fn put_order_on_hold(&self, order_id: PosId) -> Result<(), PosError>;

    /// Mark the order complete, preventing further modification on the POS.
    async fn complete_order(&self, order_id: PosId) -> Result<(), PosError>;

    async fn reject_order(&self, order_id: PosId) -> Result<PosOrder, PosError>;

    async fn delete_line_item(&self, order_id: PosId, line_id: PosId) -> Result<(), PosError>;

    /// Open an order carrying `items`.
    async fn create_order(&self, site_id: PosId, items: &[PosOrderItem])
        -> Result<PosOrder, PosError>;

    async fn add_items_to_order(
        &self,
        order_id: PosId,
        items: &[PosOrderItem],
    ) -> Result<PosOrder, PosError>;

    async fn get_customer_by_email(&self, email: &str) -> Result<Option<PosCustomer>, PosError>;

    async fn create_customer(&self, customer: &NewCustomer) -> Result<PosCustomer, PosError>;

    async fn add_customer_to_order(
        &self,
        order_id: PosId,
        customer_id: PosId,
    ) -> Result<(), PosError>;
}
