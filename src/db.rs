//! Local SQLite store.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the
//! connection wrapper shared by the menu and order repositories. Every
//! repository function takes a `&Connection`, so it runs the same on a plain
//! connection or inside a transaction opened by [`DbState::with_tx`].

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{Result, StoreError, StoreResult, StoreResultExt};

/// Shared handle to the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Open (or create) the database at `path`.
///
/// Creates the parent directory if needed, opens the connection, sets
/// pragmas, and runs any pending migrations.
pub fn init(path: &Path) -> Result<DbState> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Failed to create data dir {}: {e}", dir.display());
        }
    }

    info!("Opening database at {}", path.display());
    let conn = open_and_configure(path).store_ctx("open database")?;
    run_migrations(&conn).store_ctx("migrate database")?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: path.to_path_buf(),
    })
}

/// In-memory database with the full schema, for tests and dry runs.
pub fn open_in_memory() -> Result<DbState> {
    let conn = Connection::open_in_memory().store_ctx("open database")?;
    configure(&conn).store_ctx("open database")?;
    run_migrations(&conn).store_ctx("migrate database")?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

impl DbState {
    /// Run `f` against the connection. Failures are tagged with `op`.
    pub fn with_conn<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned).store_ctx(op)?;
        f(&conn).store_ctx(op)
    }

    /// Run `f` as one atomic unit: committed if it returns `Ok`, rolled back
    /// otherwise.
    pub fn with_tx<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned).store_ctx(op)?;
        let tx = conn.transaction().store_ctx(op)?;
        let value = f(&tx).store_ctx(op)?;
        tx.commit().store_ctx(op)?;
        Ok(value)
    }
}

/// Timestamps are stored as RFC 3339 text.
pub(crate) fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: sites and the cached menu tree.
fn migrate_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            address TEXT,
            phone_number TEXT NOT NULL DEFAULT '',
            menu_hash TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        );

        -- client_facing / instore_only are local-only and never written by sync
        CREATE TABLE IF NOT EXISTS menu_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            name TEXT NOT NULL,
            client_facing INTEGER NOT NULL DEFAULT 1,
            instore_only INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS site_menu_categories (
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            category_id INTEGER NOT NULL REFERENCES menu_categories(id) ON DELETE CASCADE,
            PRIMARY KEY (site_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS menu_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category_id INTEGER NOT NULL REFERENCES menu_categories(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS site_menu_item_pricing (
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            menu_item_id INTEGER NOT NULL REFERENCES menu_items(id) ON DELETE CASCADE,
            price INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (site_id, menu_item_id)
        );

        CREATE TABLE IF NOT EXISTS menu_modifiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS site_menu_modifier_pricing (
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            modifier_id INTEGER NOT NULL REFERENCES menu_modifiers(id) ON DELETE CASCADE,
            price INTEGER NOT NULL DEFAULT 0,
            price_with_tax INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (site_id, modifier_id)
        );

        CREATE TABLE IF NOT EXISTS menu_item_modifiers (
            menu_item_id INTEGER NOT NULL REFERENCES menu_items(id) ON DELETE CASCADE,
            modifier_id INTEGER NOT NULL REFERENCES menu_modifiers(id) ON DELETE CASCADE,
            PRIMARY KEY (menu_item_id, modifier_id)
        );

        CREATE TABLE IF NOT EXISTS menu_option_sets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            name TEXT NOT NULL,
            min_selection INTEGER NOT NULL DEFAULT 0,
            max_selection INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS menu_item_option_sets (
            menu_item_id INTEGER NOT NULL REFERENCES menu_items(id) ON DELETE CASCADE,
            option_set_id INTEGER NOT NULL REFERENCES menu_option_sets(id) ON DELETE CASCADE,
            PRIMARY KEY (menu_item_id, option_set_id)
        );

        CREATE TABLE IF NOT EXISTS option_set_modifiers (
            option_set_id INTEGER NOT NULL REFERENCES menu_option_sets(id) ON DELETE CASCADE,
            modifier_id INTEGER NOT NULL REFERENCES menu_modifiers(id) ON DELETE CASCADE,
            position INTEGER NOT NULL DEFAULT 0,
            price INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (option_set_id, modifier_id)
        );

        CREATE INDEX IF NOT EXISTS idx_menu_items_category ON menu_items(category_id);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        StoreError::from(e)
    })?;
    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: orders, lines, line modifiers and payments.
fn migrate_v2(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            site_pos_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            table_name TEXT NOT NULL DEFAULT '',
            pager_number TEXT NOT NULL DEFAULT '',
            customer_id INTEGER,
            total INTEGER NOT NULL DEFAULT 0,
            total_tax INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            pickup_time TEXT
        );

        -- lines are rewritten wholesale on every sync, the POS has no stable line identity
        CREATE TABLE IF NOT EXISTS order_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER NOT NULL,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            position INTEGER NOT NULL DEFAULT 0,
            product_name TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            quantity INTEGER NOT NULL DEFAULT 1,
            price INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            total_tax INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS line_modifiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            line_id INTEGER NOT NULL REFERENCES order_lines(id) ON DELETE CASCADE,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            modifier_pos_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            price INTEGER NOT NULL DEFAULT 0,
            price_with_tax INTEGER NOT NULL DEFAULT 0,
            added INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            amount INTEGER NOT NULL,
            tip INTEGER NOT NULL DEFAULT 0,
            transaction_id TEXT NOT NULL DEFAULT '',
            paid_at TEXT NOT NULL,
            customer_id INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_orders_site_pager ON orders(site_pos_id, pager_number);
        CREATE INDEX IF NOT EXISTS idx_orders_site_table ON orders(site_pos_id, table_name);
        CREATE INDEX IF NOT EXISTS idx_order_lines_order ON order_lines(order_id);
        CREATE INDEX IF NOT EXISTS idx_line_modifiers_line ON line_modifiers(line_id);
        CREATE INDEX IF NOT EXISTS idx_payments_order ON payments(order_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        StoreError::from(e)
    })?;
    info!("Applied migration v2");
    Ok(())
}

/// Migration v3: customers, linked to orders on the POS.
fn migrate_v3(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pos_id INTEGER UNIQUE NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT UNIQUE NOT NULL COLLATE NOCASE,
            phone TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        StoreError::from(e)
    })?;
    info!("Applied migration v3");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
