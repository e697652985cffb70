//! Order lifecycle: keeps local orders in step with the POS.
//!
//! **Rules:**
//! - The POS is authoritative for status, totals and lines. A POS update is
//!   applied even when the local state machine would not allow the move.
//! - Locally initiated transitions are checked against the state machine.
//! - Entering a terminal status frees the pager for a new order.
//! - A blank table name from the POS never overwrites a stored one.
//! - An order with any payment on file is not payable.
//! - Items ordered from the app are addressed by local id and must be sold at
//!   the order's site; they are translated to POS ids before the POS sees them.
//!
//! Operations on the same order are serialized; different orders proceed
//! independently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::assembler::{assemble_order, SiteMenuIndex};
use crate::db::DbState;
use crate::error::{Error, PosResultExt, Result};
use crate::ids::{LocalId, PosId};
use crate::menu_store;
use crate::model::{
    Customer, NewCustomer, NewOrderItem, NewPayment, Order, OrderStatus, Payment, PickupDetails,
};
use crate::order_store::{self, PayableLookup};
use crate::pos::{PosClient, PosOrder, PosOrderItem, PosSelectedOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    Order(PosId),
    /// Held while an order is being opened for a pager.
    Pager(PosId, i64),
}

pub struct OrderManager<P: PosClient + ?Sized> {
    db: Arc<DbState>,
    pos: Arc<P>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl<P: PosClient + ?Sized> OrderManager<P> {
    pub fn new(db: Arc<DbState>, pos: Arc<P>) -> Self {
        Self {
            db,
            pos,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Sync from the POS
    // -----------------------------------------------------------------------

    /// Insert or update the local copy of a POS order, rebuilding its lines.
    pub async fn create_or_update_order_from_pos(&self, pos_order: &PosOrder) -> Result<Order> {
        let _guard = self.lock(LockKey::Order(pos_order.id)).await;
        self.apply_pos_order(pos_order)
    }

    /// Parse a POS order webhook body and sync the order it carries.
    pub async fn sync_order_from_webhook(&self, body: &[u8]) -> Result<Order> {
        let pos_order = PosOrder::from_webhook(body).upstream_ctx("sync order from webhook")?;
        self.create_or_update_order_from_pos(&pos_order).await
    }

    /// Caller must hold the order's lock.
    fn apply_pos_order(&self, pos_order: &PosOrder) -> Result<Order> {
        const OP: &str = "create or update order from pos";

        self.db.with_tx(OP, |tx| {
            let index = SiteMenuIndex::new(
                pos_order.site_id,
                menu_store::load_site_modifiers(tx, pos_order.site_id)?,
            );
            let mut order = assemble_order(pos_order, &index);
            let status = order.status;
            order.apply_status(status);

            match order_store::get_order_by_pos_id(tx, pos_order.id)? {
                Some(existing) => {
                    if !existing.status.can_transition_to(status) {
                        warn!(
                            order = %pos_order.id,
                            from = %existing.status,
                            to = %status,
                            "POS moved order through a disallowed transition, applying anyway"
                        );
                    }
                    order_store::update_order(tx, &mut order)?;
                    if order.table_name.is_empty() {
                        order.table_name = existing.table_name;
                    }
                    order.customer_id = existing.customer_id;
                    order.created_at = existing.created_at;
                    order.pickup_time = existing.pickup_time;
                    debug!(order = %pos_order.id, status = %order.status, lines = order.lines.len(), "order updated from POS");
                }
                None => {
                    order_store::insert_order(tx, &mut order)?;
                    debug!(order = %pos_order.id, status = %order.status, lines = order.lines.len(), "order created from POS");
                }
            }
            Ok(order)
        })
    }

    async fn refetch_and_apply(&self, op: &'static str, order_pos_id: PosId) -> Result<Order> {
        let pos_order = self.pos.get_order(order_pos_id).await.upstream_ctx(op)?;
        self.apply_pos_order(&pos_order)
    }

    // -----------------------------------------------------------------------
    // Orders placed from the app
    // -----------------------------------------------------------------------

    /// Open a POS order carrying the guest's items and store it locally.
    pub async fn create_new_order(&self, site_id: PosId, items: &[NewOrderItem]) -> Result<Order> {
        const OP: &str = "create new order";

        let pos_items = self.translate_items(OP, site_id, items)?;
        let pos_order = self
            .pos
            .create_order(site_id, &pos_items)
            .await
            .upstream_ctx(OP)?;
        let _guard = self.lock(LockKey::Order(pos_order.id)).await;
        let order = self.apply_pos_order(&pos_order)?;
        info!(site = %site_id, order = %order.pos_id, lines = order.lines.len(), "new order created");
        Ok(order)
    }

    /// Add more of the guest's items to an order that is still open.
    pub async fn add_menu_items_to_order(
        &self,
        order_id: LocalId,
        items: &[NewOrderItem],
    ) -> Result<Order> {
        const OP: &str = "add menu items to order";

        let order = self.find_order_by_id(order_id)?;
        let _guard = self.lock(LockKey::Order(order.pos_id)).await;
        let order = self.find_order_by_id(order_id)?;
        if order.status.is_terminal() {
            return Err(Error::invalid_state(
                OP,
                format!("order {} is {}, no items can be added", order.pos_id, order.status),
            ));
        }

        let pos_items = self.translate_items(OP, order.site_id, items)?;
        let pos_order = self
            .pos
            .add_items_to_order(order.pos_id, &pos_items)
            .await
            .upstream_ctx(OP)?;
        self.apply_pos_order(&pos_order)
    }

    fn translate_items(
        &self,
        op: &'static str,
        site_id: PosId,
        items: &[NewOrderItem],
    ) -> Result<Vec<PosOrderItem>> {
        if items.is_empty() {
            return Err(Error::invalid_input(op, "no menu items given"));
        }
        if let Some(item) = items.iter().find(|item| item.quantity <= 0) {
            return Err(Error::invalid_input(
                op,
                format!("quantity {} of menu item {} must be positive", item.quantity, item.menu_item_id),
            ));
        }
        self.db
            .with_conn(op, |conn| translate_order_items(conn, site_id, items))?
            .map_err(|missing| Error::not_found(op, missing))
    }

    // -----------------------------------------------------------------------
    // Customers
    // -----------------------------------------------------------------------

    /// Register a guest locally, reusing the POS customer with the same
    /// email when the POS already has one.
    pub async fn add_customer(&self, customer: &NewCustomer) -> Result<Customer> {
        const OP: &str = "add customer";

        let customer = NewCustomer {
            email: customer.email.trim().to_string(),
            ..customer.clone()
        };
        if customer.email.is_empty() {
            return Err(Error::invalid_input(OP, "customer email is empty"));
        }
        let existing = self.db.with_conn(OP, |conn| {
            order_store::get_customer_by_email(conn, &customer.email)
        })?;
        if let Some(existing) = existing {
            return Err(Error::conflict(
                OP,
                format!("customer {} is already registered as {}", existing.email, existing.id),
            ));
        }

        let pos_customer = match self
            .pos
            .get_customer_by_email(&customer.email)
            .await
            .upstream_ctx(OP)?
        {
            Some(found) => found,
            None => self.pos.create_customer(&customer).await.upstream_ctx(OP)?,
        };
        let stored = self.db.with_tx(OP, |tx| {
            order_store::insert_customer(tx, pos_customer.id, &customer)
        })?;
        info!(customer = %stored.id, pos_customer = %stored.pos_id, "customer added");
        Ok(stored)
    }

    /// Attach a registered customer to an order, on the POS and locally.
    pub async fn update_order_with_customer(
        &self,
        order_id: LocalId,
        customer_id: LocalId,
    ) -> Result<Order> {
        const OP: &str = "update order with customer";

        let order = self.find_order_by_id(order_id)?;
        let customer = self
            .db
            .with_conn(OP, |conn| order_store::get_customer(conn, customer_id))?
            .ok_or_else(|| Error::not_found(OP, format!("customer {customer_id}")))?;

        let _guard = self.lock(LockKey::Order(order.pos_id)).await;
        self.pos
            .add_customer_to_order(order.pos_id, customer.pos_id)
            .await
            .upstream_ctx(OP)?;
        self.db.with_tx(OP, |tx| {
            order_store::update_order_customer(tx, order_id, customer_id)
        })?;
        info!(order = %order.pos_id, customer = %customer_id, "customer linked to order");
        self.find_order_by_id(order_id)
    }

    // -----------------------------------------------------------------------
    // Pager and table
    // -----------------------------------------------------------------------

    /// Open a POS order for a pager handed to a guest.
    pub async fn create_order_for_pager(&self, site_id: PosId, pager_number: i64) -> Result<Order> {
        const OP: &str = "create order for pager";

        let _guard = self.lock(LockKey::Pager(site_id, pager_number)).await;
        let existing = self.db.with_conn(OP, |conn| {
            order_store::get_order_by_pager(conn, site_id, pager_number)
        })?;
        if let Some(existing) = existing {
            return Err(Error::conflict(
                OP,
                format!(
                    "pager {pager_number} at site {site_id} is already bound to order {}",
                    existing.pos_id
                ),
            ));
        }

        let pos_order = self
            .pos
            .create_order_for_pager(site_id, pager_number)
            .await
            .upstream_ctx(OP)?;
        let _order_guard = self.lock(LockKey::Order(pos_order.id)).await;
        let order = self.apply_pos_order(&pos_order)?;
        info!(site = %site_id, pager = pager_number, order = %order.pos_id, "order opened for pager");
        Ok(order)
    }

    /// Attach the order carrying a pager to the table the guest sat at.
    pub async fn link_order_with_table(
        &self,
        site_id: PosId,
        pager_number: i64,
        table_name: &str,
    ) -> Result<Order> {
        const OP: &str = "link order with table";

        let mut order = self
            .db
            .with_conn(OP, |conn| {
                order_store::get_order_by_pager(conn, site_id, pager_number)
            })?
            .ok_or_else(|| {
                Error::not_found(OP, format!("no order for pager {pager_number} at site {site_id}"))
            })?;

        let _guard = self.lock(LockKey::Order(order.pos_id)).await;
        self.pos
            .link_order_with_table(order.pos_id, table_name)
            .await
            .upstream_ctx(OP)?;

        let id = order
            .id
            .ok_or_else(|| Error::not_found(OP, format!("order {}", order.pos_id)))?;
        self.db.with_tx(OP, |tx| {
            order_store::update_order_table_name(tx, id, table_name)?;
            order_store::load_order_lines(tx, &mut order)
        })?;
        order.table_name = table_name.to_string();
        info!(order = %order.pos_id, pager = pager_number, table = table_name, "order linked with table");
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn find_order_by_id(&self, order_id: LocalId) -> Result<Order> {
        const OP: &str = "find order by id";

        self.db
            .with_conn(OP, |conn| {
                let mut order = order_store::get_order_by_id(conn, order_id)?;
                if let Some(order) = order.as_mut() {
                    order_store::load_order_lines(conn, order)?;
                }
                Ok(order)
            })?
            .ok_or_else(|| Error::not_found(OP, format!("order {order_id}")))
    }

    pub fn find_order_by_pos_id(&self, pos_id: PosId) -> Result<Order> {
        const OP: &str = "find order by pos id";

        self.db
            .with_conn(OP, |conn| {
                let mut order = order_store::get_order_by_pos_id(conn, pos_id)?;
                if let Some(order) = order.as_mut() {
                    order_store::load_order_lines(conn, order)?;
                }
                Ok(order)
            })?
            .ok_or_else(|| Error::not_found(OP, format!("order with POS id {pos_id}")))
    }

    /// Unpaid orders for a table or pager, lines loaded, in insertion order.
    pub fn find_payable_orders(&self, site_id: PosId, lookup: &PayableLookup) -> Result<Vec<Order>> {
        const OP: &str = "find payable orders";

        self.db.with_conn(OP, |conn| {
            let candidates = order_store::select_on_hold_and_pending_orders(conn, site_id, lookup)?;
            let mut payable = Vec::with_capacity(candidates.len());
            for mut order in candidates {
                let Some(id) = order.id else { continue };
                if order_store::get_payment_by_order_id(conn, id)?.is_some() {
                    continue;
                }
                order_store::load_order_lines(conn, &mut order)?;
                payable.push(order);
            }
            Ok(payable)
        })
    }

    /// Payable orders visible from either the guest's table or their pager.
    pub fn find_payable_orders_for_guest(
        &self,
        site_id: PosId,
        table_name: Option<&str>,
        pager_number: Option<i64>,
    ) -> Result<Vec<Order>> {
        let by_table = match table_name.filter(|t| !t.is_empty()) {
            Some(table) => self.find_payable_orders(site_id, &PayableLookup::Table(table.to_string()))?,
            None => vec![],
        };
        let by_pager = match pager_number {
            Some(pager) => self.find_payable_orders(site_id, &PayableLookup::Pager(pager))?,
            None => vec![],
        };
        Ok(append_unique_orders(by_table, by_pager))
    }

    // -----------------------------------------------------------------------
    // Local lifecycle actions
    // -----------------------------------------------------------------------

    /// Close the order on the POS and locally.
    pub async fn complete_order(&self, order_id: LocalId) -> Result<Order> {
        const OP: &str = "complete order";

        let order = self.find_order_by_id(order_id)?;
        let _guard = self.lock(LockKey::Order(order.pos_id)).await;
        // re-read under the lock
        let mut order = self.find_order_by_id(order_id)?;
        if order.status.is_terminal() || !order.status.can_transition_to(OrderStatus::Complete) {
            return Err(Error::invalid_state(
                OP,
                format!("order {} cannot move from {} to COMPLETE", order.pos_id, order.status),
            ));
        }

        self.pos.complete_order(order.pos_id).await.upstream_ctx(OP)?;

        order.apply_status(OrderStatus::Complete);
        self.db.with_tx(OP, |tx| {
            order_store::update_order_status(tx, order_id, order.status, &order.pager_number)
        })?;
        info!(order = %order.pos_id, "order completed");
        Ok(order)
    }

    /// Reject the order on the POS and sync the result.
    pub async fn reject_order(&self, order_pos_id: PosId) -> Result<Order> {
        const OP: &str = "reject order";

        let _guard = self.lock(LockKey::Order(order_pos_id)).await;
        let pos_order = self.pos.reject_order(order_pos_id).await.upstream_ctx(OP)?;
        let order = self.apply_pos_order(&pos_order)?;
        info!(order = %order_pos_id, status = %order.status, "order rejected");
        Ok(order)
    }

    /// Record takeaway pickup details on the POS and hold the order for
    /// preparation.
    pub async fn update_pickup_details(
        &self,
        order_id: LocalId,
        details: &PickupDetails,
    ) -> Result<Order> {
        const OP: &str = "update pickup details";

        let order = self.find_order_by_id(order_id)?;
        let _guard = self.lock(LockKey::Order(order.pos_id)).await;

        self.pos
            .set_order_notes(order.pos_id, &pickup_notes(details))
            .await
            .upstream_ctx(OP)?;
        self.pos
            .put_order_on_hold(order.pos_id)
            .await
            .upstream_ctx(OP)?;

        let mut order = self.refetch_and_apply(OP, order.pos_id).await?;
        self.db.with_tx(OP, |tx| {
            order_store::update_order_pickup_time(tx, order_id, &details.pickup_time)
        })?;
        order.pickup_time = Some(details.pickup_time);
        Ok(order)
    }

    /// Remove a line from a submitted order.
    pub async fn delete_line(&self, order_id: LocalId, line_id: LocalId) -> Result<Order> {
        const OP: &str = "delete line";

        let order = self.find_order_by_id(order_id)?;
        let _guard = self.lock(LockKey::Order(order.pos_id)).await;
        let order = self.find_order_by_id(order_id)?;
        if order.status != OrderStatus::Submitted {
            return Err(Error::invalid_state(
                OP,
                format!("order {} is {}, lines can only be removed while SUBMITTED", order.pos_id, order.status),
            ));
        }

        let line = self
            .db
            .with_conn(OP, |conn| order_store::get_line(conn, line_id))?
            .filter(|line| line.order_id == Some(order_id))
            .ok_or_else(|| Error::not_found(OP, format!("line {line_id} on order {order_id}")))?;

        self.pos
            .delete_line_item(order.pos_id, line.pos_id)
            .await
            .upstream_ctx(OP)?;
        self.refetch_and_apply(OP, order.pos_id).await
    }

    /// Store a payment against an order. From then on the order is no longer
    /// payable.
    pub async fn record_payment(&self, order_id: LocalId, payment: &NewPayment) -> Result<Payment> {
        const OP: &str = "record payment";

        if payment.amount <= 0 {
            return Err(Error::invalid_input(OP, format!("payment amount {} must be positive", payment.amount)));
        }
        let order = self.find_order_by_id(order_id)?;
        let _guard = self.lock(LockKey::Order(order.pos_id)).await;

        let payment = self
            .db
            .with_tx(OP, |tx| order_store::insert_payment(tx, order_id, payment))?;
        info!(order = %order.pos_id, amount = payment.amount, tip = payment.tip, "payment recorded");
        Ok(payment)
    }
}

/// Translate the local ids of the guest's items to POS ids. `Err` names the
/// first id the site does not sell.
fn translate_order_items(
    conn: &rusqlite::Connection,
    site_id: PosId,
    items: &[NewOrderItem],
) -> crate::error::StoreResult<std::result::Result<Vec<PosOrderItem>, String>> {
    let mut translated = Vec::with_capacity(items.len());
    for item in items {
        let Some(menu_item_id) = menu_store::menu_item_pos_id_at_site(conn, site_id, item.menu_item_id)? else {
            return Ok(Err(format!("menu item {} at site {site_id}", item.menu_item_id)));
        };

        let mut modifiers = Vec::with_capacity(item.modifier_ids.len());
        for modifier_id in &item.modifier_ids {
            match menu_store::modifier_pos_id_at_site(conn, site_id, *modifier_id)? {
                Some(pos_id) => modifiers.push(pos_id),
                None => return Ok(Err(format!("modifier {modifier_id} at site {site_id}"))),
            }
        }

        let mut options = Vec::with_capacity(item.options.len());
        for option in &item.options {
            let Some(option_set_id) = menu_store::option_set_pos_id(conn, option.option_set_id)? else {
                return Ok(Err(format!("option set {}", option.option_set_id)));
            };
            let Some(modifier_id) = menu_store::modifier_pos_id_at_site(conn, site_id, option.modifier_id)? else {
                return Ok(Err(format!("modifier {} at site {site_id}", option.modifier_id)));
            };
            options.push(PosSelectedOption {
                option_set_id,
                modifier_id,
            });
        }

        translated.push(PosOrderItem {
            menu_item_id,
            quantity: item.quantity,
            modifiers,
            options,
        });
    }
    Ok(Ok(translated))
}

/// Kitchen-facing note attached to paid takeaway orders.
fn pickup_notes(details: &PickupDetails) -> String {
    format!(
        "TO-GO APP - PAID\n\n{}\n\n{}\n\n{}",
        details.pickup_time.format("%-I:%M %P"),
        details.customer_name,
        details.phone_number
    )
}

/// Union of two order lists by local id.
///
/// Keeps `base` as is and appends the members of `additional` not already
/// present, each at most once.
pub fn append_unique_orders(base: Vec<Order>, additional: Vec<Order>) -> Vec<Order> {
    let mut seen: HashSet<Option<LocalId>> = base.iter().map(|o| o.id).collect();
    let mut merged = base;
    for order in additional {
        if seen.insert(order.id) {
            merged.push(order);
        }
    }
    merged
}
