use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

pub type Db = Arc<Mutex<Connection>>;

pub fn open(path: &std::path::Path) -> Result<Db> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("creating db directory")?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("opening sqlite at {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Core schema. The analytics mart tables (`sales_daily`,
/// `reorder_inputs`) are intentionally NOT created here: they belong to
/// the external mart pipeline, and their absence is a supported state the
/// query layer must handle.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS organizations (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY,
            org_id         TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            email          TEXT UNIQUE NOT NULL,
            password_hash  TEXT NOT NULL,
            role           TEXT NOT NULL DEFAULT 'admin',
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS locations (
            id          TEXT PRIMARY KEY,
            org_id      TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            type        TEXT NOT NULL CHECK (type IN ('warehouse', 'store', 'virtual')),
            address     TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS suppliers (
            id                      TEXT PRIMARY KEY,
            org_id                  TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            name                    TEXT NOT NULL,
            contact_person          TEXT,
            email                   TEXT,
            phone                   TEXT,
            address                 TEXT,
            lead_time_days          INTEGER NOT NULL DEFAULT 7,
            minimum_order_quantity  INTEGER NOT NULL DEFAULT 1,
            payment_terms           TEXT,
            is_active               INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS products (
            id                     TEXT PRIMARY KEY,
            org_id                 TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            sku                    TEXT NOT NULL,
            name                   TEXT NOT NULL,
            description            TEXT,
            category               TEXT,
            cost                   REAL,
            price                  REAL,
            uom                    TEXT NOT NULL DEFAULT 'each',
            reorder_point          INTEGER NOT NULL DEFAULT 0,
            safety_stock_days      INTEGER NOT NULL DEFAULT 3,
            pack_size              INTEGER NOT NULL DEFAULT 1,
            max_stock_days         INTEGER,
            preferred_supplier_id  TEXT REFERENCES suppliers(id),
            created_at             TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at             TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (org_id, sku)
        );

        -- Append-only movement ledger; on-hand is always derived.
        CREATE TABLE IF NOT EXISTS inventory_movements (
            id             TEXT PRIMARY KEY,
            product_id     TEXT NOT NULL REFERENCES products(id),
            location_id    TEXT NOT NULL REFERENCES locations(id),
            quantity       INTEGER NOT NULL,
            movement_type  TEXT NOT NULL CHECK (movement_type IN ('in', 'out', 'adjust', 'transfer')),
            reference      TEXT,
            notes          TEXT,
            moved_at       TEXT NOT NULL,
            created_by     TEXT,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_movements_product ON inventory_movements(product_id);

        CREATE TABLE IF NOT EXISTS orders (
            id            TEXT PRIMARY KEY,
            org_id        TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            order_number  TEXT NOT NULL,
            channel       TEXT,
            status        TEXT NOT NULL DEFAULT 'pending',
            ordered_at    TEXT NOT NULL DEFAULT (datetime('now')),
            fulfilled_at  TEXT,
            location_id   TEXT REFERENCES locations(id),
            total_amount  REAL,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (org_id, order_number)
        );

        CREATE TABLE IF NOT EXISTS order_items (
            id          TEXT PRIMARY KEY,
            order_id    TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id  TEXT NOT NULL REFERENCES products(id),
            quantity    INTEGER NOT NULL,
            unit_price  REAL NOT NULL,
            discount    REAL NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        CREATE TABLE IF NOT EXISTS purchase_orders (
            id             TEXT PRIMARY KEY,
            org_id         TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            supplier_id    TEXT NOT NULL REFERENCES suppliers(id),
            po_number      TEXT NOT NULL UNIQUE,
            status         TEXT NOT NULL DEFAULT 'draft'
                           CHECK (status IN ('draft', 'pending', 'ordered', 'received', 'cancelled')),
            order_date     TEXT,
            expected_date  TEXT,
            received_date  TEXT,
            total_amount   REAL NOT NULL DEFAULT 0,
            notes          TEXT,
            created_by     TEXT,
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS purchase_order_items (
            id                 TEXT PRIMARY KEY,
            purchase_order_id  TEXT NOT NULL REFERENCES purchase_orders(id) ON DELETE CASCADE,
            product_id         TEXT NOT NULL REFERENCES products(id),
            quantity           INTEGER NOT NULL,
            unit_cost          REAL NOT NULL,
            total_cost         REAL NOT NULL,
            received_quantity  INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Durable idempotency marks for the daily alert scheduler.
        CREATE TABLE IF NOT EXISTS alert_runs (
            key         TEXT PRIMARY KEY,
            marked_at   TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Create the mart tables the external analytics pipeline would normally
/// maintain. Used by the seeder and by tests; production reads them from
/// the shared warehouse. `with_56d_column` toggles the optional 56-day
/// velocity column.
pub fn ensure_mart(conn: &Connection, with_56d_column: bool) -> Result<()> {
    let v56 = if with_56d_column { "units_56day_avg REAL," } else { "" };
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS sales_daily (
            org_id          TEXT NOT NULL,
            sales_date      TEXT NOT NULL,
            channel         TEXT,
            location_name   TEXT,
            product_name    TEXT NOT NULL,
            sku             TEXT NOT NULL,
            category        TEXT,
            units_sold      INTEGER NOT NULL DEFAULT 0,
            gross_revenue   REAL NOT NULL DEFAULT 0,
            gross_margin    REAL NOT NULL DEFAULT 0,
            margin_percent  REAL NOT NULL DEFAULT 0,
            orders_count    INTEGER NOT NULL DEFAULT 0,
            units_7day_avg  REAL,
            units_30day_avg REAL,
            {v56}
            PRIMARY KEY (org_id, sales_date, sku, channel)
        );

        CREATE TABLE IF NOT EXISTS reorder_inputs (
            org_id                        TEXT NOT NULL,
            product_id                    TEXT NOT NULL,
            sku                           TEXT NOT NULL,
            product_name                  TEXT NOT NULL,
            supplier_id                   TEXT,
            supplier_name                 TEXT,
            on_hand                       INTEGER NOT NULL DEFAULT 0,
            reorder_point                 INTEGER NOT NULL DEFAULT 0,
            safety_stock_days             INTEGER NOT NULL DEFAULT 3,
            pack_size                     INTEGER NOT NULL DEFAULT 1,
            max_stock_days                INTEGER,
            lead_time_days                INTEGER NOT NULL DEFAULT 7,
            moq                           INTEGER NOT NULL DEFAULT 1,
            chosen_velocity_latest        REAL,
            chosen_velocity_conservative  REAL,
            velocity_source_latest        TEXT,
            velocity_source_conservative  TEXT,
            incoming_units_30d            INTEGER NOT NULL DEFAULT 0,
            incoming_units_60d            INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (org_id, product_id)
        );
        "
    ))?;
    Ok(())
}
