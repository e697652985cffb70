//! In-memory POS stand-in and menu fixtures shared by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PosError;
use crate::ids::PosId;
use crate::model::{NewCustomer, OrderStatus};
use crate::pos::{
    PosCategory, PosClient, PosCustomer, PosLine, PosMenu, PosMenuItem, PosModifier,
    PosOptionSet, PosOrder, PosOrderItem, PosSite,
};

#[derive(Default)]
struct FakePosState {
    sites: Vec<PosSite>,
    menus: HashMap<PosId, PosMenu>,
    orders: HashMap<PosId, PosOrder>,
    next_order_id: i64,
    failing_menus: Vec<PosId>,
    customers: Vec<PosCustomer>,
    next_customer_id: i64,
    calls: Vec<String>,
}

/// A POS that keeps its sites, menus and orders in memory and records every
/// call made to it.
#[derive(Default)]
pub struct FakePos {
    state: Mutex<FakePosState>,
}

fn not_found(what: &str) -> PosError {
    PosError::Status {
        status: 404,
        body: format!("{what} not found"),
    }
}

impl FakePos {
    pub fn new() -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().expect("fake pos lock");
            state.next_order_id = 9000;
            state.next_customer_id = 5000;
        }
        fake
    }

    pub fn with_site(self, site: PosSite, menu: PosMenu) -> Self {
        {
            let mut state = self.state.lock().expect("fake pos lock");
            state.menus.insert(site.id, menu);
            state.sites.push(site);
        }
        self
    }

    pub fn set_menu(&self, site_id: PosId, menu: PosMenu) {
        let mut state = self.state.lock().expect("fake pos lock");
        state.menus.insert(site_id, menu);
    }

    pub fn fail_menu_for(&self, site_id: PosId) {
        let mut state = self.state.lock().expect("fake pos lock");
        state.failing_menus.push(site_id);
    }

    pub fn put_order(&self, order: PosOrder) {
        let mut state = self.state.lock().expect("fake pos lock");
        state.orders.insert(order.id, order);
    }

    pub fn order(&self, id: PosId) -> Option<PosOrder> {
        self.state
            .lock()
            .expect("fake pos lock")
            .orders
            .get(&id)
            .cloned()
    }

    pub fn put_customer(&self, customer: PosCustomer) {
        let mut state = self.state.lock().expect("fake pos lock");
        state.customers.push(customer);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().expect("fake pos lock").calls.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakePosState> {
        let mut state = self.state.lock().expect("fake pos lock");
        state.calls.push(call);
        state
    }

    fn update_order(
        &self,
        call: String,
        order_id: PosId,
        f: impl FnOnce(&mut PosOrder),
    ) -> Result<PosOrder, PosError> {
        let mut state = self.record(call);
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| not_found("order"))?;
        f(order);
        Ok(order.clone())
    }
}

#[async_trait]
impl PosClient for FakePos {
    async fn get_all_sites(&self) -> Result<Vec<PosSite>, PosError> {
        Ok(self.record("get_all_sites".into()).sites.clone())
    }

    async fn get_menu_for_site(&self, site_id: PosId) -> Result<PosMenu, PosError> {
        let state = self.record(format!("get_menu_for_site {site_id}"));
        if state.failing_menus.contains(&site_id) {
            return Err(PosError::Transport {
                url: format!("fake://sites/{site_id}/menu"),
                message: "connection reset".into(),
            });
        }
        Ok(state.menus.get(&site_id).cloned().unwrap_or_default())
    }

    async fn get_order(&self, order_id: PosId) -> Result<PosOrder, PosError> {
        let state = self.record(format!("get_order {order_id}"));
        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| not_found("order"))
    }

    async fn create_order_for_pager(
        &self,
        site_id: PosId,
        pager_number: i64,
    ) -> Result<PosOrder, PosError> {
        let mut state = self.record(format!("create_order_for_pager {site_id} {pager_number}"));
        state.next_order_id += 1;
        let order = PosOrder {
            id: PosId(state.next_order_id),
            site_id,
            status: OrderStatus::OnHold,
            table: String::new(),
            pager_number: pager_number.to_string(),
            notes: String::new(),
            total: 0,
            total_tax: 0,
            lines: vec![],
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn link_order_with_table(
        &self,
        order_id: PosId,
        table_name: &str,
    ) -> Result<(), PosError> {
        self.update_order(
            format!("link_order_with_table {order_id} {table_name}"),
            order_id,
            |order| order.table = table_name.to_string(),
        )
        .map(|_| ())
    }

    async fn set_order_notes(&self, order_id: PosId, notes: &str) -> Result<(), PosError> {
        self.update_order(format!("set_order_notes {order_id}"), order_id, |order| {
            order.notes = notes.to_string()
        })
        .map(|_| ())
    }

    async fn put_order_on_hold(&self, order_id: PosId) -> Result<(), PosError> {
        self.update_order(format!("put_order_on_hold {order_id}"), order_id, |order| {
            order.status = OrderStatus::OnHold
        })
        .map(|_| ())
    }

    async fn complete_order(&self, order_id: PosId) -> Result<(), PosError> {
        self.update_order(format!("complete_order {order_id}"), order_id, |order| {
            order.status = OrderStatus::Complete
        })
        .map(|_| ())
    }

    async fn reject_order(&self, order_id: PosId) -> Result<PosOrder, PosError> {
        self.update_order(format!("reject_order {order_id}"), order_id, |order| {
            order.status = OrderStatus::Rejected
        })
    }

    async fn delete_line_item(&self, order_id: PosId, line_id: PosId) -> Result<(), PosError> {
        self.update_order(
            format!("delete_line_item {order_id} {line_id}"),
            order_id,
            |order| order.lines.retain(|line| line.id != line_id),
        )
        .map(|_| ())
    }

    async fn create_order(
        &self,
        site_id: PosId,
        items: &[PosOrderItem],
    ) -> Result<PosOrder, PosError> {
        let mut state = self.record(format!("create_order {site_id}"));
        state.next_order_id += 1;
        let mut order = PosOrder {
            id: PosId(state.next_order_id),
            site_id,
            status: OrderStatus::Submitted,
            table: String::new(),
            pager_number: String::new(),
            notes: String::new(),
            total: 0,
            total_tax: 0,
            lines: vec![],
        };
        append_item_lines(&mut order, items);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn add_items_to_order(
        &self,
        order_id: PosId,
        items: &[PosOrderItem],
    ) -> Result<PosOrder, PosError> {
        self.update_order(format!("add_items_to_order {order_id}"), order_id, |order| {
            append_item_lines(order, items)
        })
    }

    async fn get_customer_by_email(&self, email: &str) -> Result<Option<PosCustomer>, PosError> {
        let state = self.record(format!("get_customer_by_email {email}"));
        Ok(state
            .customers
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<PosCustomer, PosError> {
        let mut state = self.record(format!("create_customer {}", customer.email));
        state.next_customer_id += 1;
        let created = PosCustomer {
            id: PosId(state.next_customer_id),
            email: customer.email.clone(),
            first_name: customer.first_name.clone(),
            last_name: customer.last_name.clone(),
            phone: customer.phone.clone(),
        };
        state.customers.push(created.clone());
        Ok(created)
    }

    async fn add_customer_to_order(
        &self,
        order_id: PosId,
        customer_id: PosId,
    ) -> Result<(), PosError> {
        let call = format!("add_customer_to_order {order_id} {customer_id}");
        {
            let state = self.state.lock().expect("fake pos lock");
            if !state.customers.iter().any(|c| c.id == customer_id) {
                return Err(not_found("customer"));
            }
        }
        self.update_order(call, order_id, |_| ()).map(|_| ())
    }
}

/// One line per item, priced at 1000 each. Option choices travel in the
/// line's modifier list, as the POS reports them.
fn append_item_lines(order: &mut PosOrder, items: &[PosOrderItem]) {
    for item in items {
        let line_id = order.lines.iter().map(|l| l.id.0).max().unwrap_or(0) + 1;
        let mut line = pos_line(line_id, vec![]);
        line.product_name = format!("Item {}", item.menu_item_id);
        line.quantity = item.quantity;
        line.total = 1000 * item.quantity;
        line.total_tax = 100 * item.quantity;
        line.modifiers = item
            .modifiers
            .iter()
            .chain(item.options.iter().map(|o| &o.modifier_id))
            .map(|m| m.0)
            .collect();
        order.total += line.total;
        order.total_tax += line.total_tax;
        order.lines.push(line);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn pos_site(id: i64) -> PosSite {
    PosSite {
        id: PosId(id),
        name: format!("Site {id}"),
        address: Some(format!("{id} Harbour St")),
        phone_number: "0400 000 000".into(),
    }
}

pub fn pos_modifier(id: i64, price: i64) -> PosModifier {
    PosModifier {
        id: PosId(id),
        name: format!("Modifier {id}"),
        price,
        price_with_tax: price + price / 10,
    }
}

pub fn pos_item(id: i64, modifiers: Vec<PosModifier>, option_sets: Vec<PosOptionSet>) -> PosMenuItem {
    PosMenuItem {
        id: PosId(id),
        name: format!("Item {id}"),
        description: String::new(),
        price: 1000,
        modifiers,
        option_sets,
    }
}

pub fn pos_category(id: i64, menu_items: Vec<PosMenuItem>) -> PosCategory {
    PosCategory {
        id: PosId(id),
        name: format!("Category {id}"),
        menu_items,
    }
}

/// Two categories: 100 with item 200 (modifiers 456, 457 and option set 300)
/// and 101 with item 201 (modifier 458).
pub fn sample_menu() -> PosMenu {
    PosMenu {
        categories: vec![
            pos_category(
                100,
                vec![pos_item(
                    200,
                    vec![pos_modifier(456, 50), pos_modifier(457, 100)],
                    vec![PosOptionSet {
                        id: PosId(300),
                        name: "Size".into(),
                        min_selection: 1,
                        max_selection: 1,
                        options: vec![pos_modifier(600, 0), pos_modifier(601, 150)],
                    }],
                )],
            ),
            pos_category(101, vec![pos_item(201, vec![pos_modifier(458, 80)], vec![])]),
        ],
    }
}

pub fn pos_line(id: i64, modifiers: Vec<i64>) -> PosLine {
    PosLine {
        id: PosId(id),
        product_name: format!("Item {id}"),
        notes: String::new(),
        quantity: 1,
        price: 1000,
        total: 1000,
        total_tax: 100,
        modifiers,
    }
}

pub fn pos_order(id: i64, site_id: i64, status: OrderStatus, pager: &str) -> PosOrder {
    PosOrder {
        id: PosId(id),
        site_id: PosId(site_id),
        status,
        table: String::new(),
        pager_number: pager.to_string(),
        notes: String::new(),
        total: 1000,
        total_tax: 100,
        lines: vec![pos_line(1, vec![456, -457])],
    }
}
