//! Menu-side store operations.
//!
//! Upserts are keyed by POS id: the local id is assigned on first insert and
//! reused by every later upsert of the same POS id. Local-only category
//! flags are never touched here except by [`set_category_flags`].

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::StoreResult;
use crate::ids::{LocalId, PosId};
use crate::model::{Category, MenuItem, Modifier, OptionSet, Site};
use crate::pos::{PosCategory, PosMenuItem, PosModifier, PosOptionSet, PosSite};

/// The menu entity tables tracked for orphan deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuTable {
    Categories,
    MenuItems,
    Modifiers,
    OptionSets,
}

impl MenuTable {
    fn table_name(self) -> &'static str {
        match self {
            MenuTable::Categories => "menu_categories",
            MenuTable::MenuItems => "menu_items",
            MenuTable::Modifiers => "menu_modifiers",
            MenuTable::OptionSets => "menu_option_sets",
        }
    }
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<(Site, String)> {
    Ok((
        Site {
            id: row.get("id")?,
            pos_id: row.get("pos_id")?,
            name: row.get("name")?,
            address: row.get("address")?,
            phone_number: row.get("phone_number")?,
            menu_hash: row.get("menu_hash")?,
            updated_at: Utc::now(),
        },
        row.get("updated_at")?,
    ))
}

fn with_parsed_timestamp((mut site, updated_at): (Site, String)) -> StoreResult<Site> {
    site.updated_at = parse_timestamp(&updated_at)?;
    Ok(site)
}

pub fn get_site(conn: &Connection, pos_id: PosId) -> StoreResult<Option<Site>> {
    conn.query_row(
        "SELECT * FROM sites WHERE pos_id = ?1",
        params![pos_id],
        site_from_row,
    )
    .optional()?
    .map(with_parsed_timestamp)
    .transpose()
}

pub fn insert_site(conn: &Connection, site: &PosSite, menu_hash: &str) -> StoreResult<LocalId> {
    conn.execute(
        "INSERT INTO sites (pos_id, name, address, phone_number, menu_hash, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            site.id,
            site.name,
            site.address,
            site.phone_number,
            menu_hash,
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(LocalId(conn.last_insert_rowid()))
}

/// Store a new menu hash and refresh the site's descriptive fields.
pub fn update_site_menu_hash(conn: &Connection, site: &PosSite, menu_hash: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE sites
         SET name = ?1, address = ?2, phone_number = ?3, menu_hash = ?4, updated_at = ?5
         WHERE pos_id = ?6",
        params![
            site.name,
            site.address,
            site.phone_number,
            menu_hash,
            format_timestamp(&Utc::now()),
            site.id,
        ],
    )?;
    Ok(())
}

/// Drop the site's category mappings ahead of a full rewrite of its tree.
pub fn clear_site_categories(conn: &Connection, site_id: LocalId) -> StoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM site_menu_categories WHERE site_id = ?1",
        params![site_id],
    )?)
}

// ---------------------------------------------------------------------------
// Upserts
// ---------------------------------------------------------------------------

fn local_id_for(conn: &Connection, table: MenuTable, pos_id: PosId) -> StoreResult<LocalId> {
    let sql = format!("SELECT id FROM {} WHERE pos_id = ?1", table.table_name());
    Ok(conn.query_row(&sql, params![pos_id], |row| row.get(0))?)
}

pub fn upsert_category(
    conn: &Connection,
    site_id: LocalId,
    category: &PosCategory,
) -> StoreResult<LocalId> {
    conn.execute(
        "INSERT INTO menu_categories (pos_id, name) VALUES (?1, ?2)
         ON CONFLICT(pos_id) DO UPDATE SET name = excluded.name",
        params![category.id, category.name],
    )?;
    let id = local_id_for(conn, MenuTable::Categories, category.id)?;
    conn.execute(
        "INSERT OR IGNORE INTO site_menu_categories (site_id, category_id) VALUES (?1, ?2)",
        params![site_id, id],
    )?;
    Ok(id)
}

/// Upsert an item under `category_id` and set its price for the site.
///
/// The item's modifier and option-set mappings are cleared so the caller can
/// re-add exactly the ones in the current snapshot.
pub fn upsert_menu_item(
    conn: &Connection,
    site_id: LocalId,
    category_id: LocalId,
    item: &PosMenuItem,
) -> StoreResult<LocalId> {
    conn.execute(
        "INSERT INTO menu_items (pos_id, name, description, category_id) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(pos_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            category_id = excluded.category_id",
        params![item.id, item.name, item.description, category_id],
    )?;
    let id = local_id_for(conn, MenuTable::MenuItems, item.id)?;
    conn.execute(
        "INSERT INTO site_menu_item_pricing (site_id, menu_item_id, price) VALUES (?1, ?2, ?3)
         ON CONFLICT(site_id, menu_item_id) DO UPDATE SET price = excluded.price",
        params![site_id, id, item.price],
    )?;
    conn.execute(
        "DELETE FROM menu_item_modifiers WHERE menu_item_id = ?1",
        params![id],
    )?;
    conn.execute(
        "DELETE FROM menu_item_option_sets WHERE menu_item_id = ?1",
        params![id],
    )?;
    Ok(id)
}

fn upsert_modifier(conn: &Connection, site_id: LocalId, modifier: &PosModifier) -> StoreResult<LocalId> {
    conn.execute(
        "INSERT INTO menu_modifiers (pos_id, name) VALUES (?1, ?2)
         ON CONFLICT(pos_id) DO UPDATE SET name = excluded.name",
        params![modifier.id, modifier.name],
    )?;
    let id = local_id_for(conn, MenuTable::Modifiers, modifier.id)?;
    conn.execute(
        "INSERT INTO site_menu_modifier_pricing (site_id, modifier_id, price, price_with_tax)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(site_id, modifier_id) DO UPDATE SET
            price = excluded.price,
            price_with_tax = excluded.price_with_tax",
        params![site_id, id, modifier.price, modifier.price_with_tax],
    )?;
    Ok(id)
}

pub fn upsert_item_modifier(
    conn: &Connection,
    site_id: LocalId,
    item_id: LocalId,
    modifier: &PosModifier,
) -> StoreResult<LocalId> {
    let id = upsert_modifier(conn, site_id, modifier)?;
    conn.execute(
        "INSERT OR IGNORE INTO menu_item_modifiers (menu_item_id, modifier_id) VALUES (?1, ?2)",
        params![item_id, id],
    )?;
    Ok(id)
}

pub fn upsert_option_set(
    conn: &Connection,
    item_id: LocalId,
    option_set: &PosOptionSet,
) -> StoreResult<LocalId> {
    conn.execute(
        "INSERT INTO menu_option_sets (pos_id, name, min_selection, max_selection)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(pos_id) DO UPDATE SET
            name = excluded.name,
            min_selection = excluded.min_selection,
            max_selection = excluded.max_selection",
        params![
            option_set.id,
            option_set.name,
            option_set.min_selection,
            option_set.max_selection,
        ],
    )?;
    let id = local_id_for(conn, MenuTable::OptionSets, option_set.id)?;
    conn.execute(
        "INSERT OR IGNORE INTO menu_item_option_sets (menu_item_id, option_set_id) VALUES (?1, ?2)",
        params![item_id, id],
    )?;
    conn.execute(
        "DELETE FROM option_set_modifiers WHERE option_set_id = ?1",
        params![id],
    )?;
    Ok(id)
}

pub fn upsert_option_set_modifier(
    conn: &Connection,
    site_id: LocalId,
    option_set_id: LocalId,
    position: usize,
    modifier: &PosModifier,
) -> StoreResult<LocalId> {
    let id = upsert_modifier(conn, site_id, modifier)?;
    conn.execute(
        "INSERT INTO option_set_modifiers (option_set_id, modifier_id, position, price)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(option_set_id, modifier_id) DO UPDATE SET
            position = excluded.position,
            price = excluded.price",
        params![option_set_id, id, position as i64, modifier.price],
    )?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Orphan tracking
// ---------------------------------------------------------------------------

/// Every POS id currently cached for `table`, across all sites.
pub fn select_pos_ids(conn: &Connection, table: MenuTable) -> StoreResult<HashSet<PosId>> {
    let sql = format!("SELECT pos_id FROM {}", table.table_name());
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<PosId>>>()?;
    Ok(ids)
}

/// Delete by POS id. Dependent mapping, pricing and item rows cascade.
pub fn delete_by_pos_id(conn: &Connection, table: MenuTable, pos_id: PosId) -> StoreResult<usize> {
    let sql = format!("DELETE FROM {} WHERE pos_id = ?1", table.table_name());
    Ok(conn.execute(&sql, params![pos_id])?)
}

/// POS ids of the items currently filed under a category.
pub fn select_item_pos_ids_in_category(
    conn: &Connection,
    category: PosId,
) -> StoreResult<Vec<PosId>> {
    let mut stmt = conn.prepare(
        "SELECT i.pos_id FROM menu_items i
         JOIN menu_categories c ON c.id = i.category_id
         WHERE c.pos_id = ?1
         ORDER BY i.pos_id",
    )?;
    let ids = stmt
        .query_map(params![category], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<PosId>>>()?;
    Ok(ids)
}

/// File an item under another category, both given by POS id. Returns 0 when
/// either row is missing.
pub fn move_menu_item(conn: &Connection, item: PosId, category: PosId) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE menu_items
         SET category_id = (SELECT id FROM menu_categories WHERE pos_id = ?2)
         WHERE pos_id = ?1
           AND EXISTS (SELECT 1 FROM menu_categories WHERE pos_id = ?2)",
        params![item, category],
    )?)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub fn get_category(conn: &Connection, id: LocalId) -> StoreResult<Option<Category>> {
    Ok(conn
        .query_row(
            "SELECT * FROM menu_categories WHERE id = ?1",
            params![id],
            category_from_row,
        )
        .optional()?)
}

pub fn set_category_flags(
    conn: &Connection,
    id: LocalId,
    client_facing: bool,
    instore_only: bool,
) -> StoreResult<usize> {
    Ok(conn.execute(
        "UPDATE menu_categories SET client_facing = ?1, instore_only = ?2 WHERE id = ?3",
        params![client_facing, instore_only, id],
    )?)
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get("id")?,
        pos_id: row.get("pos_id")?,
        name: row.get("name")?,
        client_facing: row.get("client_facing")?,
        instore_only: row.get("instore_only")?,
        menu_items: vec![],
    })
}

/// Categories mapped to a site, in insertion order.
pub fn select_categories_for_site(conn: &Connection, site_pos_id: PosId) -> StoreResult<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT c.*
         FROM menu_categories c
         JOIN site_menu_categories m ON m.category_id = c.id
         JOIN sites s ON s.id = m.site_id
         WHERE s.pos_id = ?1
         ORDER BY c.id",
    )?;
    let categories = stmt
        .query_map(params![site_pos_id], category_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

/// Items of a category with their price at the site.
pub fn select_menu_items_for_category(
    conn: &Connection,
    site_pos_id: PosId,
    category_id: LocalId,
) -> StoreResult<Vec<MenuItem>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.pos_id, i.name, i.description, i.category_id, p.price
         FROM menu_items i
         JOIN site_menu_item_pricing p ON p.menu_item_id = i.id
         JOIN sites s ON s.id = p.site_id
         WHERE i.category_id = ?1 AND s.pos_id = ?2
         ORDER BY i.id",
    )?;
    let items = stmt
        .query_map(params![category_id, site_pos_id], |row| {
            Ok(MenuItem {
                id: row.get(0)?,
                pos_id: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                category_id: row.get(4)?,
                price: Some(row.get(5)?),
                modifiers: vec![],
                option_sets: vec![],
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

fn menu_modifier_from_row(row: &Row<'_>) -> rusqlite::Result<Modifier> {
    Ok(Modifier {
        id: row.get("id")?,
        pos_id: row.get("pos_id")?,
        name: row.get("name")?,
        price: row.get("price")?,
        price_with_tax: row.get("price_with_tax")?,
        added: false,
        site_id: row.get("site_id")?,
        line_id: None,
        order_id: None,
    })
}

pub fn select_item_modifiers(
    conn: &Connection,
    site_pos_id: PosId,
    item_id: LocalId,
) -> StoreResult<Vec<Modifier>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.pos_id, m.name, p.price, p.price_with_tax, p.site_id
         FROM menu_item_modifiers mim
         JOIN menu_modifiers m ON m.id = mim.modifier_id
         JOIN site_menu_modifier_pricing p ON p.modifier_id = m.id
         JOIN sites s ON s.id = p.site_id
         WHERE mim.menu_item_id = ?1 AND s.pos_id = ?2
         ORDER BY m.id",
    )?;
    let modifiers = stmt
        .query_map(params![item_id, site_pos_id], menu_modifier_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(modifiers)
}

pub fn select_item_option_sets(conn: &Connection, item_id: LocalId) -> StoreResult<Vec<OptionSet>> {
    let mut stmt = conn.prepare(
        "SELECT o.id, o.pos_id, o.name, o.min_selection, o.max_selection
         FROM menu_option_sets o
         JOIN menu_item_option_sets mo ON mo.option_set_id = o.id
         WHERE mo.menu_item_id = ?1
         ORDER BY o.id",
    )?;
    let mut option_sets = stmt
        .query_map(params![item_id], |row| {
            Ok(OptionSet {
                id: row.get(0)?,
                pos_id: row.get(1)?,
                name: row.get(2)?,
                min_selection: row.get(3)?,
                max_selection: row.get(4)?,
                options: vec![],
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut options_stmt = conn.prepare(
        "SELECT m.id, m.pos_id, m.name, om.price
         FROM option_set_modifiers om
         JOIN menu_modifiers m ON m.id = om.modifier_id
         WHERE om.option_set_id = ?1
         ORDER BY om.position",
    )?;
    for option_set in &mut option_sets {
        option_set.options = options_stmt
            .query_map(params![option_set.id], |row| {
                let price: i64 = row.get(3)?;
                Ok(Modifier {
                    id: row.get(0)?,
                    pos_id: row.get(1)?,
                    name: row.get(2)?,
                    price,
                    price_with_tax: price,
                    added: false,
                    site_id: None,
                    line_id: None,
                    order_id: None,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }
    Ok(option_sets)
}

/// Every modifier priced at the site, keyed by POS id.
pub fn load_site_modifiers(
    conn: &Connection,
    site_pos_id: PosId,
) -> StoreResult<HashMap<PosId, Modifier>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.pos_id, m.name, p.price, p.price_with_tax, p.site_id
         FROM menu_modifiers m
         JOIN site_menu_modifier_pricing p ON p.modifier_id = m.id
         JOIN sites s ON s.id = p.site_id
         WHERE s.pos_id = ?1",
    )?;
    let modifiers = stmt
        .query_map(params![site_pos_id], menu_modifier_from_row)?
        .map(|m| m.map(|m| (m.pos_id, m)))
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(modifiers)
}

// ---------------------------------------------------------------------------
// Local to POS id translation
// ---------------------------------------------------------------------------

/// POS id of a menu item, only if the item is sold at the site.
pub fn menu_item_pos_id_at_site(
    conn: &Connection,
    site_pos_id: PosId,
    item_id: LocalId,
) -> StoreResult<Option<PosId>> {
    Ok(conn
        .query_row(
            "SELECT i.pos_id FROM menu_items i
             JOIN site_menu_item_pricing p ON p.menu_item_id = i.id
             JOIN sites s ON s.id = p.site_id
             WHERE i.id = ?1 AND s.pos_id = ?2",
            params![item_id, site_pos_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// POS id of a modifier, only if it is priced at the site.
pub fn modifier_pos_id_at_site(
    conn: &Connection,
    site_pos_id: PosId,
    modifier_id: LocalId,
) -> StoreResult<Option<PosId>> {
    Ok(conn
        .query_row(
            "SELECT m.pos_id FROM menu_modifiers m
             JOIN site_menu_modifier_pricing p ON p.modifier_id = m.id
             JOIN sites s ON s.id = p.site_id
             WHERE m.id = ?1 AND s.pos_id = ?2",
            params![modifier_id, site_pos_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn option_set_pos_id(conn: &Connection, option_set_id: LocalId) -> StoreResult<Option<PosId>> {
    Ok(conn
        .query_row(
            "SELECT pos_id FROM menu_option_sets WHERE id = ?1",
            params![option_set_id],
            |row| row.get(0),
        )
        .optional()?)
}
