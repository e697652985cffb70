//! Order-side store operations: orders, their lines and line modifiers, and
//! payments.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{StoreError, StoreResult};
use crate::ids::{LocalId, PosId};
use crate::model::{Customer, Line, Modifier, NewCustomer, NewPayment, Order, OrderStatus, Payment};

/// How a guest's unpaid orders are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayableLookup {
    Table(String),
    Pager(i64),
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct OrderRow {
    order: Order,
    status: String,
    created_at: String,
    pickup_time: Option<String>,
}

fn order_row(row: &Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        order: Order {
            id: Some(row.get("id")?),
            pos_id: row.get("pos_id")?,
            site_id: row.get("site_pos_id")?,
            status: OrderStatus::Pending,
            table_name: row.get("table_name")?,
            pager_number: row.get("pager_number")?,
            customer_id: row.get("customer_id")?,
            total: row.get("total")?,
            total_tax: row.get("total_tax")?,
            lines: vec![],
            created_at: Utc::now(),
            pickup_time: None,
        },
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        pickup_time: row.get("pickup_time")?,
    })
}

impl OrderRow {
    fn finish(self) -> StoreResult<Order> {
        let mut order = self.order;
        order.status = self
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        order.created_at = parse_timestamp(&self.created_at)?;
        order.pickup_time = self
            .pickup_time
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        Ok(order)
    }
}

fn query_one_order(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Option<Order>> {
    conn.query_row(sql, params, order_row)
        .optional()?
        .map(OrderRow::finish)
        .transpose()
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub fn get_order_by_pos_id(conn: &Connection, pos_id: PosId) -> StoreResult<Option<Order>> {
    query_one_order(conn, "SELECT * FROM orders WHERE pos_id = ?1", params![pos_id])
}

pub fn get_order_by_id(conn: &Connection, id: LocalId) -> StoreResult<Option<Order>> {
    query_one_order(conn, "SELECT * FROM orders WHERE id = ?1", params![id])
}

/// The order currently bound to a pager at a site, if any.
pub fn get_order_by_pager(
    conn: &Connection,
    site_id: PosId,
    pager_number: i64,
) -> StoreResult<Option<Order>> {
    query_one_order(
        conn,
        "SELECT * FROM orders WHERE site_pos_id = ?1 AND pager_number = ?2
         ORDER BY id DESC LIMIT 1",
        params![site_id, pager_number.to_string()],
    )
}

/// Insert a new order and its lines. Fills in the order and line ids.
pub fn insert_order(conn: &Connection, order: &mut Order) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO orders (pos_id, site_pos_id, status, table_name, pager_number,
                             customer_id, total, total_tax, created_at, pickup_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            order.pos_id,
            order.site_id,
            order.status.as_str(),
            order.table_name,
            order.pager_number,
            order.customer_id,
            order.total,
            order.total_tax,
            format_timestamp(&order.created_at),
            order.pickup_time.as_ref().map(format_timestamp),
        ],
    )?;
    order.id = Some(LocalId(conn.last_insert_rowid()));
    rewrite_lines(conn, order)
}

/// Update the mutable fields of an existing order (matched by POS id) and
/// rewrite its lines.
///
/// The table name is only written when non-empty: the POS clears it on
/// unrelated updates, which would drop an assignment made by the locating
/// system.
pub fn update_order(conn: &Connection, order: &mut Order) -> StoreResult<()> {
    let id: LocalId = conn.query_row(
        "UPDATE orders
         SET status = ?1, total = ?2, total_tax = ?3, pager_number = ?4
         WHERE pos_id = ?5
         RETURNING id",
        params![
            order.status.as_str(),
            order.total,
            order.total_tax,
            order.pager_number,
            order.pos_id,
        ],
        |row| row.get(0),
    )?;
    order.id = Some(id);

    if !order.table_name.is_empty() {
        conn.execute(
            "UPDATE orders SET table_name = ?1 WHERE id = ?2",
            params![order.table_name, id],
        )?;
    }

    rewrite_lines(conn, order)
}

pub fn update_order_status(
    conn: &Connection,
    id: LocalId,
    status: OrderStatus,
    pager_number: &str,
) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE orders SET status = ?1, pager_number = ?2 WHERE id = ?3",
        params![status.as_str(), pager_number, id],
    )?)
}

pub fn update_order_table_name(conn: &Connection, id: LocalId, table_name: &str) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE orders SET table_name = ?1 WHERE id = ?2",
        params![table_name, id],
    )?)
}

pub fn update_order_customer(
    conn: &Connection,
    id: LocalId,
    customer_id: LocalId,
) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE orders SET customer_id = ?1 WHERE id = ?2",
        params![customer_id, id],
    )?)
}

pub fn update_order_pickup_time(
    conn: &Connection,
    id: LocalId,
    pickup_time: &DateTime<Utc>,
) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE orders SET pickup_time = ?1 WHERE id = ?2",
        params![format_timestamp(pickup_time), id],
    )?)
}

/// Unpaid-status orders at a site for a table or pager, in insertion order.
pub fn select_on_hold_and_pending_orders(
    conn: &Connection,
    site_id: PosId,
    lookup: &PayableLookup,
) -> StoreResult<Vec<Order>> {
    let (column, value) = match lookup {
        PayableLookup::Table(table) => ("table_name", table.clone()),
        PayableLookup::Pager(pager) => ("pager_number", pager.to_string()),
    };
    let sql = format!(
        "SELECT * FROM orders
         WHERE site_pos_id = ?1 AND {column} = ?2 AND status IN (?3, ?4)
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                site_id,
                value,
                OrderStatus::OnHold.as_str(),
                OrderStatus::Pending.as_str()
            ],
            order_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(OrderRow::finish).collect()
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

/// Replace all lines of `order` with the ones it carries.
///
/// The POS gives lines no identity that survives an update, so existing
/// lines and their modifiers are deleted and reinserted. Must run inside the
/// same transaction as the order row update.
pub fn rewrite_lines(conn: &Connection, order: &mut Order) -> StoreResult<()> {
    let order_id = order
        .id
        .ok_or_else(|| StoreError::Corrupt(format!("order {} has no local id", order.pos_id)))?;

    conn.execute(
        "DELETE FROM line_modifiers WHERE order_id = ?1",
        params![order_id],
    )?;
    conn.execute("DELETE FROM order_lines WHERE order_id = ?1", params![order_id])?;

    let mut line_insert = conn.prepare(
        "INSERT INTO order_lines (pos_id, order_id, position, product_name, notes,
                                  quantity, price, total, total_tax)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut modifier_insert = conn.prepare(
        "INSERT INTO line_modifiers (line_id, order_id, modifier_pos_id, name,
                                     price, price_with_tax, added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for (position, line) in order.lines.iter_mut().enumerate() {
        line_insert.execute(params![
            line.pos_id,
            order_id,
            position as i64,
            line.product_name,
            line.notes,
            line.quantity,
            line.price,
            line.total,
            line.total_tax,
        ])?;
        let line_id = LocalId(conn.last_insert_rowid());
        line.id = Some(line_id);
        line.order_id = Some(order_id);

        for modifier in line
            .added_modifiers
            .iter_mut()
            .chain(line.removed_modifiers.iter_mut())
        {
            modifier_insert.execute(params![
                line_id,
                order_id,
                modifier.pos_id,
                modifier.name,
                modifier.price,
                modifier.price_with_tax,
                modifier.added,
            ])?;
            modifier.line_id = Some(line_id);
            modifier.order_id = Some(order_id);
        }
    }

    Ok(())
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<Line> {
    Ok(Line {
        id: Some(row.get("id")?),
        pos_id: row.get("pos_id")?,
        order_id: Some(row.get("order_id")?),
        product_name: row.get("product_name")?,
        notes: row.get("notes")?,
        quantity: row.get("quantity")?,
        price: row.get("price")?,
        total: row.get("total")?,
        total_tax: row.get("total_tax")?,
        added_modifiers: vec![],
        removed_modifiers: vec![],
    })
}

pub fn get_line(conn: &Connection, id: LocalId) -> StoreResult<Option<Line>> {
    Ok(conn
        .query_row(
            "SELECT * FROM order_lines WHERE id = ?1",
            params![id],
            line_from_row,
        )
        .optional()?)
}

/// Lines of an order with their added and removed modifiers.
pub fn load_lines(conn: &Connection, order_id: LocalId) -> StoreResult<Vec<Line>> {
    let mut stmt = conn.prepare("SELECT * FROM order_lines WHERE order_id = ?1 ORDER BY position")?;
    let mut lines = stmt
        .query_map(params![order_id], line_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut modifiers_stmt = conn.prepare(
        "SELECT * FROM line_modifiers WHERE line_id = ?1 ORDER BY id",
    )?;
    for line in &mut lines {
        let modifiers = modifiers_stmt
            .query_map(params![line.id], |row| {
                Ok(Modifier {
                    id: row.get("id")?,
                    pos_id: row.get("modifier_pos_id")?,
                    name: row.get("name")?,
                    price: row.get("price")?,
                    price_with_tax: row.get("price_with_tax")?,
                    added: row.get("added")?,
                    site_id: None,
                    line_id: Some(row.get("line_id")?),
                    order_id: Some(row.get("order_id")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let (added, removed): (Vec<_>, Vec<_>) = modifiers.into_iter().partition(|m| m.added);
        line.added_modifiers = added;
        line.removed_modifiers = removed;
    }

    Ok(lines)
}

/// Attach lines and modifiers to an order read from the store.
pub fn load_order_lines(conn: &Connection, order: &mut Order) -> StoreResult<()> {
    if let Some(id) = order.id {
        order.lines = load_lines(conn, id)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

pub fn insert_payment(
    conn: &Connection,
    order_id: LocalId,
    payment: &NewPayment,
) -> StoreResult<Payment> {
    let paid_at = Utc::now();
    conn.execute(
        "INSERT INTO payments (order_id, amount, tip, transaction_id, paid_at, customer_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            order_id,
            payment.amount,
            payment.tip,
            payment.transaction_id,
            format_timestamp(&paid_at),
            payment.customer_id,
        ],
    )?;
    Ok(Payment {
        id: LocalId(conn.last_insert_rowid()),
        order_id,
        amount: payment.amount,
        tip: payment.tip,
        transaction_id: payment.transaction_id.clone(),
        paid_at,
        customer_id: payment.customer_id,
    })
}

pub fn get_payment_by_order_id(conn: &Connection, order_id: LocalId) -> StoreResult<Option<Payment>> {
    let row = conn
        .query_row(
            "SELECT id, order_id, amount, tip, transaction_id, paid_at, customer_id
             FROM payments WHERE order_id = ?1 ORDER BY id LIMIT 1",
            params![order_id],
            |row| {
                Ok((
                    Payment {
                        id: row.get(0)?,
                        order_id: row.get(1)?,
                        amount: row.get(2)?,
                        tip: row.get(3)?,
                        transaction_id: row.get(4)?,
                        paid_at: Utc::now(),
                        customer_id: row.get(6)?,
                    },
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    row.map(|(mut payment, paid_at)| {
        payment.paid_at = parse_timestamp(&paid_at)?;
        Ok(payment)
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get("id")?,
        pos_id: row.get("pos_id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
    })
}

pub fn insert_customer(
    conn: &Connection,
    pos_id: PosId,
    customer: &NewCustomer,
) -> StoreResult<Customer> {
    conn.execute(
        "INSERT INTO customers (pos_id, first_name, last_name, email, phone)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            pos_id,
            customer.first_name,
            customer.last_name,
            customer.email,
            customer.phone,
        ],
    )?;
    Ok(Customer {
        id: LocalId(conn.last_insert_rowid()),
        pos_id,
        first_name: customer.first_name.clone(),
        last_name: customer.last_name.clone(),
        email: customer.email.clone(),
        phone: customer.phone.clone(),
    })
}

pub fn get_customer(conn: &Connection, id: LocalId) -> StoreResult<Option<Customer>> {
    Ok(conn
        .query_row(
            "SELECT * FROM customers WHERE id = ?1",
            params![id],
            customer_from_row,
        )
        .optional()?)
}

/// Emails compare case-insensitively.
pub fn get_customer_by_email(conn: &Connection, email: &str) -> StoreResult<Option<Customer>> {
    Ok(conn
        .query_row(
            "SELECT * FROM customers WHERE email = ?1",
            params![email],
            customer_from_row,
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn modifier(pos_id: i64, added: bool) -> Modifier {
        Modifier {
            id: LocalId(0),
            pos_id: PosId(pos_id),
            name: format!("Modifier {pos_id}"),
            price: 50,
            price_with_tax: 55,
            added,
            site_id: None,
            line_id: None,
            order_id: None,
        }
    }

    fn sample_order() -> Order {
        Order {
            id: None,
            pos_id: PosId(9001),
            site_id: PosId(123),
            status: OrderStatus::Submitted,
            table_name: "45".into(),
            pager_number: "765".into(),
            customer_id: None,
            total: 1200,
            total_tax: 120,
            lines: vec![Line {
                id: None,
                pos_id: PosId(1),
                order_id: None,
                product_name: "Burger".into(),
                notes: String::new(),
                quantity: 1,
                price: 1200,
                total: 1200,
                total_tax: 120,
                added_modifiers: vec![modifier(456, true)],
                removed_modifiers: vec![modifier(457, false)],
            }],
            created_at: Utc::now(),
            pickup_time: None,
        }
    }

    #[test]
    fn test_insert_and_load_order_with_lines() {
        let db = db::open_in_memory().expect("open db");
        db.with_conn("test", |conn| {
            let mut order = sample_order();
            insert_order(conn, &mut order)?;
            let id = order.id.expect("id assigned");
            assert_eq!(order.lines[0].order_id, Some(id));
            assert_eq!(order.lines[0].added_modifiers[0].order_id, Some(id));

            let mut stored = get_order_by_id(conn, id)?.expect("order stored");
            load_order_lines(conn, &mut stored)?;
            assert_eq!(stored.status, OrderStatus::Submitted);
            assert_eq!(stored.pager_number, "765");
            assert_eq!(stored.lines.len(), 1);
            assert_eq!(stored.lines[0].added_modifiers[0].pos_id, PosId(456));
            assert_eq!(stored.lines[0].removed_modifiers[0].pos_id, PosId(457));

            let by_pager = get_order_by_pager(conn, PosId(123), 765)?.expect("found by pager");
            assert_eq!(by_pager.id, Some(id));
            assert!(get_order_by_pager(conn, PosId(124), 765)?.is_none());
            Ok(())
        })
        .expect("insert");
    }

    #[test]
    fn test_update_rewrites_lines_and_keeps_table_when_blank() {
        let db = db::open_in_memory().expect("open db");
        db.with_conn("test", |conn| {
            let mut order = sample_order();
            insert_order(conn, &mut order)?;
            let id = order.id.expect("id");

            let mut update = sample_order();
            update.table_name = String::new();
            update.status = OrderStatus::Accepted;
            update.lines[0].product_name = "Double Burger".into();
            update.lines[0].removed_modifiers.clear();
            update_order(conn, &mut update)?;
            assert_eq!(update.id, Some(id));

            let mut stored = get_order_by_id(conn, id)?.expect("order");
            load_order_lines(conn, &mut stored)?;
            assert_eq!(stored.table_name, "45");
            assert_eq!(stored.status, OrderStatus::Accepted);
            assert_eq!(stored.lines.len(), 1);
            assert_eq!(stored.lines[0].product_name, "Double Burger");
            assert!(stored.lines[0].removed_modifiers.is_empty());

            let modifiers: i64 =
                conn.query_row("SELECT COUNT(*) FROM line_modifiers", [], |r| r.get(0))?;
            assert_eq!(modifiers, 1);
            Ok(())
        })
        .expect("update");
    }

    #[test]
    fn test_payable_candidates_filter_status() {
        let db = db::open_in_memory().expect("open db");
        db.with_conn("test", |conn| {
            for (pos_id, status) in [
                (1, OrderStatus::OnHold),
                (2, OrderStatus::Pending),
                (3, OrderStatus::Complete),
                (4, OrderStatus::Submitted),
            ] {
                let mut order = sample_order();
                order.pos_id = PosId(pos_id);
                order.status = status;
                insert_order(conn, &mut order)?;
            }
            let by_table =
                select_on_hold_and_pending_orders(conn, PosId(123), &PayableLookup::Table("45".into()))?;
            let ids: Vec<PosId> = by_table.iter().map(|o| o.pos_id).collect();
            assert_eq!(ids, vec![PosId(1), PosId(2)]);

            let by_pager =
                select_on_hold_and_pending_orders(conn, PosId(123), &PayableLookup::Pager(765))?;
            assert_eq!(by_pager.len(), 2);
            Ok(())
        })
        .expect("payable");
    }

    #[test]
    fn test_payment_round_trip() {
        let db = db::open_in_memory().expect("open db");
        db.with_conn("test", |conn| {
            let mut order = sample_order();
            insert_order(conn, &mut order)?;
            let id = order.id.expect("id");
            assert!(get_payment_by_order_id(conn, id)?.is_none());

            insert_payment(
                conn,
                id,
                &NewPayment {
                    amount: 1200,
                    tip: 100,
                    transaction_id: "txn-1".into(),
                    customer_id: None,
                },
            )?;
            let payment = get_payment_by_order_id(conn, id)?.expect("payment");
            assert_eq!(payment.amount, 1200);
            assert_eq!(payment.transaction_id, "txn-1");
            Ok(())
        })
        .expect("payment");
    }

    #[test]
    fn test_customer_lookup_and_order_link() {
        let db = db::open_in_memory().expect("open db");
        db.with_conn("test", |conn| {
            let customer = insert_customer(
                conn,
                PosId(5001),
                &NewCustomer {
                    first_name: "Jane".into(),
                    last_name: "Doe".into(),
                    email: "jane@example.com".into(),
                    phone: "4041234567".into(),
                },
            )?;
            assert_eq!(get_customer(conn, customer.id)?, Some(customer.clone()));
            assert_eq!(
                get_customer_by_email(conn, "JANE@example.com")?.map(|c| c.pos_id),
                Some(PosId(5001))
            );
            assert!(get_customer_by_email(conn, "other@example.com")?.is_none());

            let mut order = sample_order();
            insert_order(conn, &mut order)?;
            let id = order.id.expect("id");
            assert_eq!(update_order_customer(conn, id, customer.id)?, 1);
            let stored = get_order_by_id(conn, id)?.expect("order");
            assert_eq!(stored.customer_id, Some(customer.id));
            Ok(())
        })
        .expect("customer");
    }
}
