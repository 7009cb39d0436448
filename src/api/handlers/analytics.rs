//! Analytics endpoints over the sales mart with base-table fallbacks.

use axum::Json;
use axum::extract::{Query, State};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::mart;
use crate::model::{RiskBand, VelocityStrategy, risk::choose_velocity};

// ── GET /analytics ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default = "default_days_30")]
    pub days: i64,
}

fn default_days_30() -> i64 {
    30
}

#[derive(Serialize)]
pub struct SalesMetrics {
    pub total_revenue: f64,
    pub total_units: i64,
    pub avg_order_value: f64,
    pub total_orders: i64,
    pub revenue_growth: f64,
    pub units_growth: f64,
}

#[derive(Serialize)]
pub struct AnalyticsResponse {
    pub sales_metrics: SalesMetrics,
    pub top_products: Vec<Value>,
    pub category_data: Vec<Value>,
    pub recent_sales: Vec<Value>,
    pub revenue_trend: Vec<Value>,
}

pub async fn get_analytics(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    if !(1..=90).contains(&q.days) {
        return Err(ApiError::Validation(vec![format!(
            "days must be in 1..=90, got {}",
            q.days
        )]));
    }
    let org_id = &auth.org_id;
    let conn = state.inner.db.lock().await;

    let end = Utc::now().date_naive();
    let start = end - Duration::days(q.days);
    let prev_start = start - Duration::days(q.days);

    let sales_metrics = sales_metrics(&conn, org_id, start, end, prev_start);
    let top_products = top_products(&conn, org_id);
    let category_data = category_data(&conn, org_id);
    let recent_sales = recent_sales(&conn, org_id);
    let revenue_trend = revenue_trend(&conn, org_id);

    Ok(Json(AnalyticsResponse {
        sales_metrics,
        top_products,
        category_data,
        recent_sales,
        revenue_trend,
    }))
}

fn mart_period_totals(
    conn: &Connection,
    org_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<(f64, i64, i64)> {
    conn.query_row(
        "SELECT COALESCE(SUM(gross_revenue), 0), COALESCE(SUM(units_sold), 0),
                COALESCE(SUM(orders_count), 0)
         FROM sales_daily
         WHERE org_id = ?1 AND sales_date BETWEEN ?2 AND ?3",
        rusqlite::params![org_id, start.to_string(), end.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .ok()
    .filter(|(revenue, _, _): &(f64, i64, i64)| *revenue > 0.0)
}

fn sales_metrics(
    conn: &Connection,
    org_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    prev_start: NaiveDate,
) -> SalesMetrics {
    if let Some((revenue, units, orders)) = mart_period_totals(conn, org_id, start, end) {
        let (prev_revenue, prev_units, _) =
            mart_period_totals(conn, org_id, prev_start, start).unwrap_or((0.0, 0, 0));
        let growth = |cur: f64, prev: f64| {
            if prev > 0.0 { ((cur - prev) / prev * 100.0 * 10.0).round() / 10.0 } else { 0.0 }
        };
        return SalesMetrics {
            total_revenue: revenue,
            total_units: units,
            avg_order_value: if orders > 0 { revenue / orders as f64 } else { 0.0 },
            total_orders: orders,
            revenue_growth: growth(revenue, prev_revenue),
            units_growth: growth(units as f64, prev_units as f64),
        };
    }

    // Mart unavailable: derive from completed orders.
    let (revenue, orders): (f64, i64) = conn
        .query_row(
            "SELECT COALESCE(SUM(total_amount), 0), COUNT(*)
             FROM orders WHERE org_id = ?1 AND status = 'completed'",
            [org_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or((0.0, 0));
    let units: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(oi.quantity), 0)
             FROM order_items oi
             JOIN orders o ON o.id = oi.order_id
             WHERE o.org_id = ?1 AND o.status = 'completed'",
            [org_id],
            |row| row.get(0),
        )
        .unwrap_or(0);
    SalesMetrics {
        total_revenue: revenue,
        total_units: units,
        avg_order_value: if orders > 0 { revenue / orders as f64 } else { 0.0 },
        total_orders: orders,
        revenue_growth: 0.0,
        units_growth: 0.0,
    }
}

fn top_products(conn: &Connection, org_id: &str) -> Vec<Value> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT p.name, p.sku, SUM(oi.quantity) AS units,
                SUM(oi.quantity * oi.unit_price) AS revenue, p.cost, p.price
         FROM products p
         JOIN order_items oi ON p.id = oi.product_id
         JOIN orders o ON oi.order_id = o.id
         WHERE o.org_id = ?1 AND o.status = 'completed'
         GROUP BY p.id, p.name, p.sku, p.cost, p.price
         ORDER BY revenue DESC
         LIMIT 5",
    ) else {
        return vec![];
    };
    stmt.query_map([org_id], |row| {
        let cost: f64 = row.get::<_, Option<f64>>(4)?.unwrap_or(0.0);
        let price: f64 = row.get::<_, Option<f64>>(5)?.unwrap_or(0.0);
        let margin = if price > 0.0 { (price - cost) / price * 100.0 } else { 0.0 };
        Ok(json!({
            "name": row.get::<_, String>(0)?,
            "sku": row.get::<_, String>(1)?,
            "units": row.get::<_, i64>(2)?,
            "revenue": row.get::<_, f64>(3)?,
            "margin": (margin * 10.0).round() / 10.0,
        }))
    })
    .map(|rows| rows.flatten().collect())
    .unwrap_or_default()
}

fn category_data(conn: &Connection, org_id: &str) -> Vec<Value> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT p.category, SUM(oi.quantity * oi.unit_price) AS revenue
         FROM products p
         JOIN order_items oi ON p.id = oi.product_id
         JOIN orders o ON oi.order_id = o.id
         WHERE o.org_id = ?1 AND o.status = 'completed' AND p.category IS NOT NULL
         GROUP BY p.category",
    ) else {
        return vec![];
    };
    let rows: Vec<(String, f64)> = stmt
        .query_map([org_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map(|rows| rows.flatten().collect())
        .unwrap_or_default();
    let total: f64 = rows.iter().map(|(_, r)| r).sum();
    rows.into_iter()
        .map(|(category, revenue)| {
            let pct = if total > 0.0 { revenue / total * 100.0 } else { 0.0 };
            json!({
                "category": category,
                "revenue": revenue,
                "percentage": (pct * 10.0).round() / 10.0,
            })
        })
        .collect()
}

fn recent_sales(conn: &Connection, org_id: &str) -> Vec<Value> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT o.ordered_at, p.name, oi.quantity, oi.unit_price, o.channel
         FROM orders o
         JOIN order_items oi ON o.id = oi.order_id
         JOIN products p ON oi.product_id = p.id
         WHERE o.org_id = ?1 AND o.status = 'completed'
         ORDER BY o.ordered_at DESC
         LIMIT 10",
    ) else {
        return vec![];
    };
    stmt.query_map([org_id], |row| {
        let qty: i64 = row.get(2)?;
        let unit_price: f64 = row.get(3)?;
        Ok(json!({
            "date": row.get::<_, String>(0)?,
            "product": row.get::<_, String>(1)?,
            "quantity": qty,
            "revenue": qty as f64 * unit_price,
            "channel": row.get::<_, Option<String>>(4)?.unwrap_or_else(|| "Unknown".into()),
        }))
    })
    .map(|rows| rows.flatten().collect())
    .unwrap_or_default()
}

fn revenue_trend(conn: &Connection, org_id: &str) -> Vec<Value> {
    let from_mart: Option<Vec<Value>> = conn
        .prepare(
            "SELECT sales_date, SUM(gross_revenue)
             FROM sales_daily
             WHERE org_id = ?1 AND sales_date >= date('now', '-7 days')
             GROUP BY sales_date
             ORDER BY sales_date",
        )
        .ok()
        .and_then(|mut stmt| {
            stmt.query_map([org_id], |row| {
                Ok(json!({
                    "date": row.get::<_, String>(0)?,
                    "revenue": row.get::<_, f64>(1)?,
                }))
            })
            .map(|rows| rows.flatten().collect::<Vec<_>>())
            .ok()
        })
        .filter(|v| !v.is_empty());
    if let Some(trend) = from_mart {
        return trend;
    }

    conn.prepare(
        "SELECT date(ordered_at), SUM(COALESCE(total_amount, 0))
         FROM orders
         WHERE org_id = ?1 AND status = 'completed'
         GROUP BY date(ordered_at)
         ORDER BY date(ordered_at)",
    )
    .ok()
    .and_then(|mut stmt| {
        stmt.query_map([org_id], |row| {
            Ok(json!({
                "date": row.get::<_, String>(0)?,
                "revenue": row.get::<_, f64>(1)?,
            }))
        })
        .map(|rows| rows.flatten().collect())
        .ok()
    })
    .unwrap_or_default()
}

// ── GET /analytics/sales ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SalesAnalyticsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_days_30")]
    pub days: i64,
    pub channel: Option<String>,
    pub product_category: Option<String>,
}

#[derive(Serialize)]
pub struct SalesAnalyticsResponse {
    pub period_summary: Value,
    pub daily_sales: Vec<Value>,
    pub channel_performance: Vec<Value>,
    pub top_performing_products: Vec<Value>,
    pub trending_analysis: Value,
}

pub async fn get_sales_analytics(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<SalesAnalyticsQuery>,
) -> Result<Json<SalesAnalyticsResponse>, ApiError> {
    if !(1..=365).contains(&q.days) {
        return Err(ApiError::Validation(vec![format!(
            "days must be in 1..=365, got {}",
            q.days
        )]));
    }
    let org_id = &auth.org_id;
    let end = q.end_date.unwrap_or_else(|| Utc::now().date_naive());
    let start = q.start_date.unwrap_or(end - Duration::days(q.days));
    let conn = state.inner.db.lock().await;

    // Mart first, appending the optional filters with placeholders only
    // when the option is present.
    let mut sql = String::from(
        "SELECT sales_date, channel, location_name, product_name, sku, category,
                units_sold, gross_revenue, gross_margin, margin_percent, orders_count,
                COALESCE(units_7day_avg, 0), COALESCE(units_30day_avg, 0)
         FROM sales_daily
         WHERE org_id = ?1 AND sales_date BETWEEN ?2 AND ?3",
    );
    let start_s = start.to_string();
    let end_s = end.to_string();
    let mut binds: Vec<&dyn rusqlite::ToSql> = vec![&org_id, &start_s, &end_s];
    if let Some(channel) = &q.channel {
        sql.push_str(" AND channel = ?");
        binds.push(channel);
    }
    if let Some(category) = &q.product_category {
        sql.push_str(" AND category = ?");
        binds.push(category);
    }
    sql.push_str(" ORDER BY sales_date DESC, gross_revenue DESC");

    let read_daily = |sql: &str,
                      binds: &[&dyn rusqlite::ToSql]|
     -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(binds, |row| {
                Ok(json!({
                    "sales_date": row.get::<_, String>(0)?,
                    "channel": row.get::<_, Option<String>>(1)?.unwrap_or_else(|| "Unknown".into()),
                    "location_name": row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "Unknown".into()),
                    "product_name": row.get::<_, String>(3)?,
                    "sku": row.get::<_, String>(4)?,
                    "category": row.get::<_, Option<String>>(5)?.unwrap_or_else(|| "Uncategorized".into()),
                    "units_sold": row.get::<_, i64>(6)?,
                    "gross_revenue": row.get::<_, f64>(7)?,
                    "gross_margin": row.get::<_, f64>(8)?,
                    "margin_percent": row.get::<_, f64>(9)?,
                    "orders_count": row.get::<_, i64>(10)?,
                    "units_7day_avg": row.get::<_, f64>(11)?,
                    "units_30day_avg": row.get::<_, f64>(12)?,
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };

    let daily_sales = match read_daily(&sql, &binds) {
        Ok(rows) if !rows.is_empty() => rows,
        _ => {
            // Mart missing or empty: approximate from the order tables.
            let mut fb = String::from(
                "SELECT date(o.ordered_at), COALESCE(o.channel, 'Unknown'),
                        COALESCE(l.name, 'Unknown'), p.name, p.sku,
                        COALESCE(p.category, 'Uncategorized'),
                        oi.quantity,
                        oi.unit_price * oi.quantity - oi.discount,
                        (oi.unit_price - COALESCE(p.cost, 0)) * oi.quantity,
                        CASE WHEN oi.unit_price > 0
                             THEN (oi.unit_price - COALESCE(p.cost, 0)) / oi.unit_price * 100
                             ELSE 0 END,
                        1, 0, 0
                 FROM orders o
                 JOIN order_items oi ON o.id = oi.order_id
                 JOIN products p ON oi.product_id = p.id
                 LEFT JOIN locations l ON o.location_id = l.id
                 WHERE o.org_id = ?1 AND date(o.ordered_at) BETWEEN ?2 AND ?3
                   AND o.status IN ('fulfilled', 'completed', 'shipped')",
            );
            let mut fb_binds: Vec<&dyn rusqlite::ToSql> = vec![&org_id, &start_s, &end_s];
            if let Some(channel) = &q.channel {
                fb.push_str(" AND COALESCE(o.channel, 'Unknown') = ?");
                fb_binds.push(channel);
            }
            if let Some(category) = &q.product_category {
                fb.push_str(" AND COALESCE(p.category, 'Uncategorized') = ?");
                fb_binds.push(category);
            }
            fb.push_str(" ORDER BY o.ordered_at DESC");
            read_daily(&fb, &fb_binds).unwrap_or_default()
        }
    };

    let total_revenue: f64 = daily_sales.iter().filter_map(|r| r["gross_revenue"].as_f64()).sum();
    let total_units: i64 = daily_sales.iter().filter_map(|r| r["units_sold"].as_i64()).sum();
    let total_margin: f64 = daily_sales.iter().filter_map(|r| r["gross_margin"].as_f64()).sum();
    let total_orders: i64 = daily_sales.iter().filter_map(|r| r["orders_count"].as_i64()).sum();

    let period_summary = json!({
        "total_revenue": total_revenue,
        "total_units": total_units,
        "total_margin": total_margin,
        "total_orders": total_orders,
        "avg_order_value": if total_orders > 0 { total_revenue / total_orders as f64 } else { 0.0 },
        "avg_margin_percent": if total_revenue > 0.0 { total_margin / total_revenue * 100.0 } else { 0.0 },
        "date_range": { "start_date": start_s, "end_date": end_s, "days": (end - start).num_days() + 1 },
    });

    let channel_performance = conn
        .prepare(
            "SELECT channel, SUM(gross_revenue), SUM(units_sold), SUM(orders_count),
                    AVG(margin_percent)
             FROM sales_daily
             WHERE org_id = ?1 AND sales_date BETWEEN ?2 AND ?3
             GROUP BY channel
             ORDER BY SUM(gross_revenue) DESC",
        )
        .ok()
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params![org_id, start_s, end_s], |row| {
                let revenue: f64 = row.get(1)?;
                let orders: i64 = row.get(3)?;
                Ok(json!({
                    "channel": row.get::<_, Option<String>>(0)?.unwrap_or_else(|| "Unknown".into()),
                    "total_revenue": revenue,
                    "total_units": row.get::<_, i64>(2)?,
                    "orders_count": orders,
                    "avg_order_value": if orders > 0 { revenue / orders as f64 } else { 0.0 },
                    "margin_percent": row.get::<_, f64>(4)?,
                }))
            })
            .map(|rows| rows.flatten().collect::<Vec<_>>())
            .ok()
        })
        .unwrap_or_default();

    let top_performing_products = conn
        .prepare(
            "SELECT product_name, sku, category, SUM(gross_revenue), SUM(units_sold),
                    AVG(margin_percent), AVG(COALESCE(units_7day_avg, 0))
             FROM sales_daily
             WHERE org_id = ?1 AND sales_date BETWEEN ?2 AND ?3
             GROUP BY product_name, sku, category
             ORDER BY SUM(gross_revenue) DESC
             LIMIT 10",
        )
        .ok()
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params![org_id, start_s, end_s], |row| {
                Ok(json!({
                    "product_name": row.get::<_, String>(0)?,
                    "sku": row.get::<_, String>(1)?,
                    "category": row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "Uncategorized".into()),
                    "total_revenue": row.get::<_, f64>(3)?,
                    "total_units": row.get::<_, i64>(4)?,
                    "avg_margin_percent": row.get::<_, f64>(5)?,
                    "avg_velocity": row.get::<_, f64>(6)?,
                }))
            })
            .map(|rows| rows.flatten().collect::<Vec<_>>())
            .ok()
        })
        .unwrap_or_default();

    // 7d vs 30d velocity ratio: >1.2 growing, <0.8 declining.
    let mut growth = Vec::new();
    let mut declining = Vec::new();
    for row in &daily_sales {
        let v30 = row["units_30day_avg"].as_f64().unwrap_or(0.0);
        if v30 > 0.0 {
            let ratio = row["units_7day_avg"].as_f64().unwrap_or(0.0) / v30;
            let entry = json!({
                "product_name": row["product_name"],
                "sku": row["sku"],
                "trend_ratio": (ratio * 100.0).round() / 100.0,
            });
            if ratio > 1.2 && growth.len() < 5 {
                growth.push(entry);
            } else if ratio < 0.8 && declining.len() < 5 {
                declining.push(entry);
            }
        }
    }
    let trending_analysis = json!({
        "growth_products": growth,
        "declining_products": declining,
    });

    Ok(Json(SalesAnalyticsResponse {
        period_summary,
        daily_sales,
        channel_performance,
        top_performing_products,
        trending_analysis,
    }))
}

// ── GET /analytics/stockout-risk ────────────────────────────────────────

#[derive(Deserialize)]
pub struct StockoutRiskQuery {
    #[serde(default = "default_days_30")]
    pub days: i64,
    #[serde(default = "default_strategy")]
    pub velocity_strategy: String,
}

fn default_strategy() -> String {
    "latest".into()
}

#[derive(Serialize)]
pub struct StockoutRisk {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub on_hand: f64,
    pub reorder_point: Option<i64>,
    pub velocity_7d: Option<f64>,
    pub velocity_30d: Option<f64>,
    pub velocity_56d: Option<f64>,
    pub velocity_source: String,
    pub days_to_stockout: Option<f64>,
    pub risk_level: RiskBand,
    pub forecast_30d_units: Option<f64>,
}

/// Per-product stockout risk from current stock and mart velocity.
/// Bands when velocity > 0: <=7 high, <=14 medium, <=30 low, else none;
/// at-or-below reorder point upgrades `none` to `medium`.
pub async fn get_stockout_risk(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<StockoutRiskQuery>,
) -> Result<Json<Vec<StockoutRisk>>, ApiError> {
    if !(7..=120).contains(&q.days) {
        return Err(ApiError::Validation(vec![format!(
            "days must be in 7..=120, got {}",
            q.days
        )]));
    }
    let strategy = VelocityStrategy::parse(&q.velocity_strategy).ok_or_else(|| {
        ApiError::Validation(vec![format!(
            "velocity_strategy must be latest or conservative, got {}",
            q.velocity_strategy
        )])
    })?;
    let org_id = &auth.org_id;

    let conn = state.inner.db.lock().await;
    let stock = mart::on_hand_rows(&conn, org_id).map_err(|e| ApiError::Internal(e.to_string()))?;
    let velocities = mart::velocity_map(&conn, org_id, q.days).unwrap_or_default();
    drop(conn);

    let mut results: Vec<StockoutRisk> = stock
        .iter()
        .map(|s| {
            let vel = velocities.get(&s.sku).copied().unwrap_or_default();
            let (chosen, source) = choose_velocity(strategy, vel.v7, vel.v30, vel.v56);
            let days_to = chosen.map(|v| s.on_hand / v.max(1e-6));
            let band = days_to
                .map(RiskBand::from_days)
                .unwrap_or(RiskBand::None)
                .with_reorder_bump(s.on_hand, s.reorder_point);
            let forecast = vel
                .v7
                .or(vel.v30)
                .or(vel.v56)
                .map(|v| v * 30.0);
            StockoutRisk {
                product_id: s.product_id.clone(),
                product_name: s.name.clone(),
                sku: s.sku.clone(),
                on_hand: s.on_hand,
                reorder_point: s.reorder_point,
                velocity_7d: vel.v7,
                velocity_30d: vel.v30,
                velocity_56d: vel.v56,
                velocity_source: source.into(),
                days_to_stockout: days_to.map(|d| (d * 10.0).round() / 10.0),
                risk_level: band,
                forecast_30d_units: forecast,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        a.risk_level
            .cmp(&b.risk_level)
            .then(
                a.days_to_stockout
                    .unwrap_or(9999.0)
                    .total_cmp(&b.days_to_stockout.unwrap_or(9999.0)),
            )
    });
    Ok(Json(results))
}
