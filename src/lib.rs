//! POS reconciliation core.
//!
//! Keeps a local SQLite cache of every site's menu in step with the POS and
//! tracks the lifecycle of orders placed through it: pager-held orders,
//! table assignment, status changes and checkout eligibility.
//!
//! - [`menu::MenuReconciler`] mirrors the POS menu tree and removes entries
//!   the POS no longer has.
//! - [`assembler::assemble_order`] turns a POS order into the local shape.
//! - [`orders::OrderManager`] drives the order state machine.

pub mod assembler;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod locator;
pub mod logging;
pub mod menu;
pub mod menu_store;
pub mod model;
pub mod order_store;
pub mod orders;
pub mod pos;
pub mod pos_client;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use assembler::{assemble_order, SiteMenuIndex};
pub use config::{Config, ConfigError, PosConfig};
pub use db::DbState;
pub use error::{Error, ErrorKind, PosError, Result, StoreError};
pub use ids::{LocalId, ModifierRef, PosId};
pub use locator::{handle_locator_event, LocatorEvent, LocatorOutcome};
pub use menu::{compute_menu_hash, MenuReconciler, MenuSyncSummary};
pub use model::{
    Category, ClientMenu, Line, MenuItem, Modifier, NewPayment, OptionSet, Order, OrderStatus,
    Payment, PickupDetails, Site,
};
pub use order_store::PayableLookup;
pub use orders::{append_unique_orders, OrderManager};
pub use pos::{PosClient, PosOrder};
pub use pos_client::HttpPosClient;

/// Short git SHA of the build, or `unknown`.
pub const BUILD_GIT_SHA: &str = env!("BUILD_GIT_SHA");
