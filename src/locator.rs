//! Events from the table-locating system.
//!
//! Guests carry a pager; the locating system reports when a pager is handed
//! out (`started`) and when it has been placed on a table (`located`).

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ids::PosId;
use crate::model::Order;
use crate::orders::OrderManager;
use crate::pos::PosClient;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocatorEvent {
    pub state: String,
    #[serde(rename = "name")]
    pub pager_number: String,
    #[serde(rename = "locationName", default)]
    pub table_name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "orderType", default)]
    pub order_type: String,
    #[serde(rename = "elapsedTime", default)]
    pub elapsed_time: u64,
    #[serde(default)]
    pub paged: bool,
}

#[derive(Debug)]
pub enum LocatorOutcome {
    OrderOpened(Order),
    TableLinked(Order),
    Ignored,
}

/// Dispatch a locating-system event for a site.
///
/// `cleared` is not acted on: the locating system sends it on its own after
/// a timeout, long before the order is finished.
pub async fn handle_locator_event<P: PosClient + ?Sized>(
    manager: &OrderManager<P>,
    site_id: PosId,
    event: &LocatorEvent,
) -> Result<LocatorOutcome> {
    const OP: &str = "handle locator event";

    let pager_number: i64 = event.pager_number.trim().parse().map_err(|_| {
        Error::invalid_input(OP, format!("pager number '{}' is not an integer", event.pager_number))
    })?;

    match event.state.as_str() {
        "started" => manager
            .create_order_for_pager(site_id, pager_number)
            .await
            .map(LocatorOutcome::OrderOpened),
        "located" => manager
            .link_order_with_table(site_id, pager_number, &event.table_name)
            .await
            .map(LocatorOutcome::TableLinked),
        other => {
            debug!(site = %site_id, pager = pager_number, state = other, "ignoring locator event");
            Ok(LocatorOutcome::Ignored)
        }
    }
}
