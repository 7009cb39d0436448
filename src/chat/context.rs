//! Business-context snapshot for grounding open-ended chat.
//!
//! Builds a multi-section text block (inventory, sales, top/bottom
//! performers, risks, slow movers, reorder targets, activity). Sections
//! degrade independently: a failed query logs a warning and contributes
//! its empty default instead of failing the snapshot.

use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

use crate::mart;

#[derive(Debug, Default)]
struct Snapshot {
    total_products: i64,
    total_locations: i64,
    total_skus: i64,
    out_of_stock: i64,
    low_stock: i64,
    total_units: i64,
    revenue_7d: f64,
    units_7d: i64,
    margin_7d: f64,
    top_by_margin: Vec<Value>,
    bottom_by_margin: Vec<Value>,
    slow_movers: Vec<Value>,
    reorder: Vec<Value>,
    high_stockout_risk: i64,
    movements_today: i64,
}

pub fn business_context(conn: &Connection, org_id: &str) -> String {
    let mut snap = Snapshot::default();

    if let Err(e) = company_overview(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: company overview unavailable");
    }
    if let Err(e) = inventory_metrics(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: inventory metrics unavailable");
    }
    if let Err(e) = sales_metrics(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: sales metrics unavailable");
    }
    if let Err(e) = top_products(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: top products unavailable");
    }
    if let Err(e) = bottom_products(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: bottom products unavailable");
    }
    if let Err(e) = slow_movers(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: slow movers unavailable");
    }
    if let Err(e) = reorder_targets(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: reorder targets unavailable");
    }
    if let Err(e) = stockout_risks(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: risk count unavailable");
    }
    if let Err(e) = recent_activity(conn, org_id, &mut snap) {
        warn!(error = %e, "business context: activity unavailable");
    }

    format_snapshot(org_id, &snap)
}

fn company_overview(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    snap.total_products = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE org_id = ?1",
        [org_id],
        |row| row.get(0),
    )?;
    snap.total_locations = conn.query_row(
        "SELECT COUNT(*) FROM locations WHERE org_id = ?1",
        [org_id],
        |row| row.get(0),
    )?;
    Ok(())
}

fn inventory_metrics(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    snap.total_skus = stock.len() as i64;
    snap.out_of_stock = stock.iter().filter(|s| s.on_hand <= 0.0).count() as i64;
    snap.low_stock = stock
        .iter()
        .filter(|s| s.on_hand >= 1.0 && s.on_hand <= 10.0)
        .count() as i64;
    snap.total_units = stock.iter().map(|s| s.on_hand as i64).sum();
    Ok(())
}

fn sales_metrics(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let row = conn.query_row(
        "SELECT COALESCE(SUM(gross_revenue), 0), COALESCE(SUM(units_sold), 0),
                COALESCE(SUM(gross_margin), 0)
         FROM sales_daily
         WHERE org_id = ?1 AND sales_date >= date('now', '-7 days')",
        [org_id],
        |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?)),
    )?;
    snap.revenue_7d = row.0;
    snap.units_7d = row.1;
    snap.margin_7d = row.2;
    Ok(())
}

fn top_products(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT product_name, sku, COALESCE(SUM(gross_margin), 0) AS margin,
                COALESCE(SUM(units_sold), 0) AS units
         FROM sales_daily
         WHERE org_id = ?1 AND sales_date >= date('now', '-30 days')
         GROUP BY product_name, sku
         ORDER BY margin DESC
         LIMIT 3",
    )?;
    snap.top_by_margin = stmt
        .query_map([org_id], |row| {
            Ok(serde_json::json!({
                "name": row.get::<_, String>(0)?,
                "sku": row.get::<_, String>(1)?,
                "margin": row.get::<_, f64>(2)?,
                "units": row.get::<_, i64>(3)?,
            }))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

fn bottom_products(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT p.name, p.sku,
                SUM((oi.unit_price - COALESCE(p.cost, 0)) * oi.quantity) AS margin,
                SUM(oi.quantity) AS units
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         JOIN products p ON p.id = oi.product_id
         WHERE p.org_id = ?1 AND o.ordered_at >= date('now', '-30 days')
         GROUP BY p.name, p.sku
         HAVING SUM(oi.quantity) > 0
         ORDER BY margin ASC
         LIMIT 3",
    )?;
    snap.bottom_by_margin = stmt
        .query_map([org_id], |row| {
            Ok(serde_json::json!({
                "name": row.get::<_, String>(0)?,
                "sku": row.get::<_, String>(1)?,
                "margin": row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                "units": row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            }))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

fn slow_movers(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    let sold = mart::units_sold_map(conn, org_id, 30).unwrap_or_default();
    let mut rows: Vec<(i64, f64, Value)> = stock
        .iter()
        .filter(|s| s.on_hand > 0.0)
        .map(|s| {
            let units = sold.get(&s.sku).copied().unwrap_or(0);
            (
                units,
                s.on_hand,
                serde_json::json!({
                    "name": s.name,
                    "sku": s.sku,
                    "on_hand": s.on_hand,
                    "units_sold_30d": units,
                }),
            )
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)));
    snap.slow_movers = rows.into_iter().take(3).map(|(_, _, v)| v).collect();
    Ok(())
}

fn reorder_targets(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    let velocities = mart::velocity_map(conn, org_id, 60).unwrap_or_default();
    let mut suggestions: Vec<(i64, Value)> = Vec::new();
    for s in &stock {
        let v30 = velocities.get(&s.sku).and_then(|v| v.v30).unwrap_or(0.0);
        if v30 <= 0.0 {
            continue;
        }
        let needed = v30 * 30.0 - s.on_hand;
        if needed > 0.0 {
            let qty = needed.round() as i64;
            suggestions.push((
                qty,
                serde_json::json!({ "name": s.name, "sku": s.sku, "suggested_qty": qty }),
            ));
        }
    }
    suggestions.sort_by_key(|(qty, _)| -qty);
    snap.reorder = suggestions.into_iter().take(3).map(|(_, v)| v).collect();
    Ok(())
}

fn stockout_risks(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    let velocities = mart::velocity_map(conn, org_id, 60).unwrap_or_default();
    snap.high_stockout_risk = stock
        .iter()
        .filter(|s| {
            let v = velocities.get(&s.sku).and_then(|v| v.v30).unwrap_or(0.0);
            v > 0.0 && s.on_hand / v <= 7.0
        })
        .count() as i64;
    Ok(())
}

fn recent_activity(conn: &Connection, org_id: &str, snap: &mut Snapshot) -> rusqlite::Result<()> {
    snap.movements_today = conn.query_row(
        "SELECT COUNT(*)
         FROM inventory_movements im
         JOIN products p ON p.id = im.product_id
         WHERE p.org_id = ?1 AND date(im.moved_at) = date('now')",
        [org_id],
        |row| row.get(0),
    )?;
    Ok(())
}

fn format_snapshot(org_id: &str, snap: &Snapshot) -> String {
    let mut parts = vec![
        "BUSINESS CONTEXT:".to_string(),
        format!("- Organization: {org_id}"),
        format!(
            "- Product Catalog: {} products across {} locations",
            snap.total_products, snap.total_locations
        ),
        String::new(),
        "INVENTORY STATUS:".to_string(),
        format!("- Total SKUs: {} | Total Units: {}", snap.total_skus, snap.total_units),
        format!(
            "- Out of Stock: {} | Low Stock (<=10): {}",
            snap.out_of_stock, snap.low_stock
        ),
        String::new(),
        "PERFORMANCE (Last 7 Days):".to_string(),
        format!(
            "- Revenue ${:.2} | Units {} | Gross Margin ${:.2}",
            snap.revenue_7d, snap.units_7d, snap.margin_7d
        ),
    ];

    if !snap.top_by_margin.is_empty() {
        parts.push("TOP MARGIN SKUs (30d):".into());
        for t in &snap.top_by_margin {
            parts.push(format!(
                "  - {} (SKU {}): margin ${:.2}, units {}",
                t["name"].as_str().unwrap_or("?"),
                t["sku"].as_str().unwrap_or("?"),
                t["margin"].as_f64().unwrap_or(0.0),
                t["units"].as_i64().unwrap_or(0)
            ));
        }
    }
    if !snap.bottom_by_margin.is_empty() {
        parts.push("BOTTOM MARGIN SKUs (30d):".into());
        for b in &snap.bottom_by_margin {
            parts.push(format!(
                "  - {} (SKU {}): margin ${:.2}, units {}",
                b["name"].as_str().unwrap_or("?"),
                b["sku"].as_str().unwrap_or("?"),
                b["margin"].as_f64().unwrap_or(0.0),
                b["units"].as_i64().unwrap_or(0)
            ));
        }
    }
    if !snap.slow_movers.is_empty() {
        parts.push("SLOW MOVERS (have stock, low 30d sales):".into());
        for s in &snap.slow_movers {
            parts.push(format!(
                "  - {} (SKU {}): on_hand {}, sold_30d {}",
                s["name"].as_str().unwrap_or("?"),
                s["sku"].as_str().unwrap_or("?"),
                s["on_hand"].as_f64().unwrap_or(0.0),
                s["units_sold_30d"].as_i64().unwrap_or(0)
            ));
        }
    }
    if !snap.reorder.is_empty() {
        parts.push("REORDER SUGGESTIONS (target 30d cover):".into());
        for r in &snap.reorder {
            parts.push(format!(
                "  - {} (SKU {}): suggested_qty {}",
                r["name"].as_str().unwrap_or("?"),
                r["sku"].as_str().unwrap_or("?"),
                r["suggested_qty"].as_i64().unwrap_or(0)
            ));
        }
    }

    parts.push(String::new());
    parts.push(format!(
        "HIGH STOCKOUT RISK SKUs (<=7d cover): {} | Immediate Attention: {}",
        snap.high_stockout_risk,
        snap.high_stockout_risk > 5
    ));
    parts.push(format!(
        "RECENT ACTIVITY: {} inventory movements today",
        snap.movements_today
    ));
    parts.push(String::new());
    parts.push(
        "Guidelines: Answer only with data present. If missing, say it's not in the snapshot and \
         suggest an analytic intent (top_skus_by_margin, stockout_risk, week_in_review, \
         reorder_suggestions, slow_movers, product_detail). Be concise and factual."
            .into(),
    );
    parts.join("\n")
}
