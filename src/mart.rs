//! Read-side access to the precomputed analytics mart plus the derived
//! on-hand aggregation over the movement ledger.
//!
//! The mart tables (`sales_daily`, `reorder_inputs`) are populated by an
//! external pipeline and may be missing entirely; callers treat a query
//! error here as "mart unavailable" and take their fallback branch.

use std::collections::HashMap;

use rusqlite::Connection;

/// Column probe, the SQLite analogue of an information-schema lookup.
/// Used before issuing queries that depend on the optional 56-day
/// velocity column.
pub fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("PRAGMA table_info({table})");
    let Ok(mut stmt) = conn.prepare(&sql) else {
        return false;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) else {
        return false;
    };
    rows.flatten().any(|name| name == column)
}

pub fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .is_ok()
}

// ── On-hand stock (derived, never stored) ───────────────────────────────

#[derive(Debug, Clone)]
pub struct StockRow {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub reorder_point: Option<i64>,
    pub on_hand: f64,
}

/// Per-product on-hand by signed movement sum, org-scoped. `transfer`
/// rows net to zero at the product level.
pub fn on_hand_rows(conn: &Connection, org_id: &str) -> rusqlite::Result<Vec<StockRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.sku, p.name, p.reorder_point,
                COALESCE(SUM(CASE
                    WHEN im.movement_type IN ('in', 'adjust') THEN im.quantity
                    WHEN im.movement_type = 'out' THEN -im.quantity
                    ELSE 0 END), 0) AS on_hand
         FROM products p
         LEFT JOIN inventory_movements im ON im.product_id = p.id
         WHERE p.org_id = ?1
         GROUP BY p.id, p.sku, p.name, p.reorder_point",
    )?;
    let rows = stmt
        .query_map([org_id], |row| {
            Ok(StockRow {
                product_id: row.get(0)?,
                sku: row.get(1)?,
                name: row.get(2)?,
                reorder_point: row.get(3)?,
                on_hand: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Mart velocities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct VelocityRow {
    pub v7: Option<f64>,
    pub v30: Option<f64>,
    pub v56: Option<f64>,
}

/// Rolling-average velocities per SKU over the lookback window. When the
/// mart lacks the 56-day column the two-velocity query is used and `v56`
/// stays `None`.
pub fn velocity_map(
    conn: &Connection,
    org_id: &str,
    lookback_days: i64,
) -> rusqlite::Result<HashMap<String, VelocityRow>> {
    let with_56 = has_column(conn, "sales_daily", "units_56day_avg");
    let sql = if with_56 {
        "SELECT sd.sku, AVG(sd.units_7day_avg), AVG(sd.units_30day_avg), AVG(sd.units_56day_avg)
         FROM sales_daily sd
         WHERE sd.org_id = ?1 AND sd.sales_date >= date('now', ?2)
         GROUP BY sd.sku"
    } else {
        "SELECT sd.sku, AVG(sd.units_7day_avg), AVG(sd.units_30day_avg), NULL
         FROM sales_daily sd
         WHERE sd.org_id = ?1 AND sd.sales_date >= date('now', ?2)
         GROUP BY sd.sku"
    };
    let modifier = format!("-{lookback_days} days");

    let mut stmt = conn.prepare(sql)?;
    let mut map = HashMap::new();
    let rows = stmt.query_map(rusqlite::params![org_id, modifier], |row| {
        Ok((
            row.get::<_, String>(0)?,
            VelocityRow {
                v7: row.get(1)?,
                v30: row.get(2)?,
                v56: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (sku, vel) = row?;
        map.insert(sku, vel);
    }
    Ok(map)
}

/// Units sold per SKU over the trailing window, from the mart.
pub fn units_sold_map(
    conn: &Connection,
    org_id: &str,
    days: i64,
) -> rusqlite::Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT sku, COALESCE(SUM(units_sold), 0)
         FROM sales_daily
         WHERE org_id = ?1 AND sales_date >= date('now', ?2)
         GROUP BY sku",
    )?;
    let modifier = format!("-{days} days");
    let mut map = HashMap::new();
    let rows = stmt.query_map(rusqlite::params![org_id, modifier], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (sku, units) = row?;
        map.insert(sku, units);
    }
    Ok(map)
}

// ── Per-product sales summary ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ProductSales {
    pub units_7d: i64,
    pub units_30d: i64,
    pub margin_30d: f64,
    pub revenue_30d: f64,
}

pub fn product_sales_summary(
    conn: &Connection,
    org_id: &str,
    sku: &str,
) -> rusqlite::Result<ProductSales> {
    conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN sales_date >= date('now', '-7 days') THEN units_sold ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sales_date >= date('now', '-30 days') THEN units_sold ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sales_date >= date('now', '-30 days') THEN gross_margin ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sales_date >= date('now', '-30 days') THEN gross_revenue ELSE 0 END), 0)
         FROM sales_daily
         WHERE org_id = ?1 AND sku = ?2",
        [org_id, sku],
        |row| {
            Ok(ProductSales {
                units_7d: row.get(0)?,
                units_30d: row.get(1)?,
                margin_30d: row.get(2)?,
                revenue_30d: row.get(3)?,
            })
        },
    )
}
