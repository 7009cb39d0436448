//! Closed intent set, typed parameter models, and the analytic handlers.
//!
//! Every handler runs org-scoped SQL, prefers the precomputed `sales_daily`
//! mart, and falls back to an equivalent query over the base tables when
//! the mart is unavailable (marking the definition accordingly).

use anyhow::Result;
use chrono::{Datelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::mart;

// ── Intent set ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TopSkusByMargin,
    StockoutRisk,
    WeekInReview,
    ReorderSuggestions,
    SlowMovers,
    ProductDetail,
    QuarterlyForecast,
    AnnualBreakdown,
}

pub const ALL_INTENTS: [Intent; 8] = [
    Intent::TopSkusByMargin,
    Intent::StockoutRisk,
    Intent::WeekInReview,
    Intent::ReorderSuggestions,
    Intent::SlowMovers,
    Intent::ProductDetail,
    Intent::QuarterlyForecast,
    Intent::AnnualBreakdown,
];

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::TopSkusByMargin => "top_skus_by_margin",
            Intent::StockoutRisk => "stockout_risk",
            Intent::WeekInReview => "week_in_review",
            Intent::ReorderSuggestions => "reorder_suggestions",
            Intent::SlowMovers => "slow_movers",
            Intent::ProductDetail => "product_detail",
            Intent::QuarterlyForecast => "quarterly_forecast",
            Intent::AnnualBreakdown => "annual_breakdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_INTENTS.iter().copied().find(|i| i.as_str() == s)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Intent::TopSkusByMargin => "Top SKUs by Margin",
            Intent::StockoutRisk => "Stockout Risk Analysis",
            Intent::WeekInReview => "Week in Review",
            Intent::ReorderSuggestions => "Reorder Suggestions",
            Intent::SlowMovers => "Slow Moving Inventory",
            Intent::ProductDetail => "Product Detail",
            Intent::QuarterlyForecast => "Quarterly Forecast",
            Intent::AnnualBreakdown => "Annual Business Performance",
        }
    }
}

// ── Resolution result shared by the rule and LLM resolvers ──────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Rules,
    Llm,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentResolution {
    pub intent: Option<Intent>,
    pub params: Map<String, Value>,
    pub confidence: f64,
    pub source: ResolutionSource,
    pub reasons: Vec<String>,
}

impl IntentResolution {
    pub fn unresolved(source: ResolutionSource, reasons: Vec<String>) -> Self {
        Self { intent: None, params: Map::new(), confidence: 0.0, source, reasons }
    }
}

// ── Parameter models ────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParamError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Period::OneDay => 1,
            Period::SevenDays => 7,
            Period::ThirtyDays => 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopSkusByMarginParams {
    #[serde(default = "default_period_7d")]
    pub period: Period,
    #[serde(default = "default_n")]
    pub n: i64,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default, alias = "location")]
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockoutRiskParams {
    #[serde(default = "default_horizon")]
    pub horizon_days: i64,
    #[serde(default, alias = "location")]
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeekInReviewParams {
    #[serde(default, alias = "location")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderSuggestionsParams {
    #[serde(default, alias = "location")]
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlowMoversParams {
    #[serde(default = "default_period_30d")]
    pub period: Period,
    #[serde(default = "default_n")]
    pub n: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductDetailParams {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastPeriod {
    CurrentQuarter,
    NextQuarter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuarterlyForecastParams {
    #[serde(default = "default_forecast_period")]
    pub period: ForecastPeriod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnualBreakdownParams {
    #[serde(default)]
    pub target_year: Option<i32>,
}

fn default_period_7d() -> Period {
    Period::SevenDays
}
fn default_period_30d() -> Period {
    Period::ThirtyDays
}
fn default_n() -> i64 {
    10
}
fn default_horizon() -> i64 {
    14
}
fn default_forecast_period() -> ForecastPeriod {
    ForecastPeriod::CurrentQuarter
}

/// Tagged parameter variants: one struct per intent, selected by the
/// intent discriminator, with defaults filled and bounds enforced.
#[derive(Debug, Clone)]
pub enum IntentParams {
    TopSkusByMargin(TopSkusByMarginParams),
    StockoutRisk(StockoutRiskParams),
    WeekInReview(WeekInReviewParams),
    ReorderSuggestions(ReorderSuggestionsParams),
    SlowMovers(SlowMoversParams),
    ProductDetail(ProductDetailParams),
    QuarterlyForecast(QuarterlyForecastParams),
    AnnualBreakdown(AnnualBreakdownParams),
}

impl IntentParams {
    /// Validate a raw JSON object against the intent's parameter model.
    pub fn from_value(intent: Intent, raw: &Map<String, Value>) -> Result<Self, ParamError> {
        let value = Value::Object(raw.clone());
        let invalid = |e: serde_json::Error| ParamError(format!("param_validation_failed: {e}"));
        let params = match intent {
            Intent::TopSkusByMargin => {
                let p: TopSkusByMarginParams = serde_json::from_value(value).map_err(invalid)?;
                if !(1..=50).contains(&p.n) {
                    return Err(ParamError(format!("n must be in 1..=50, got {}", p.n)));
                }
                IntentParams::TopSkusByMargin(p)
            }
            Intent::StockoutRisk => {
                let p: StockoutRiskParams = serde_json::from_value(value).map_err(invalid)?;
                if !(7..=30).contains(&p.horizon_days) {
                    return Err(ParamError(format!(
                        "horizon_days must be in 7..=30, got {}",
                        p.horizon_days
                    )));
                }
                IntentParams::StockoutRisk(p)
            }
            Intent::WeekInReview => {
                IntentParams::WeekInReview(serde_json::from_value(value).map_err(invalid)?)
            }
            Intent::ReorderSuggestions => {
                IntentParams::ReorderSuggestions(serde_json::from_value(value).map_err(invalid)?)
            }
            Intent::SlowMovers => {
                let p: SlowMoversParams = serde_json::from_value(value).map_err(invalid)?;
                if !(1..=50).contains(&p.n) {
                    return Err(ParamError(format!("n must be in 1..=50, got {}", p.n)));
                }
                if p.period == Period::OneDay {
                    return Err(ParamError("period must be 7d or 30d".into()));
                }
                IntentParams::SlowMovers(p)
            }
            Intent::ProductDetail => {
                IntentParams::ProductDetail(serde_json::from_value(value).map_err(invalid)?)
            }
            Intent::QuarterlyForecast => {
                IntentParams::QuarterlyForecast(serde_json::from_value(value).map_err(invalid)?)
            }
            Intent::AnnualBreakdown => {
                IntentParams::AnnualBreakdown(serde_json::from_value(value).map_err(invalid)?)
            }
        };
        Ok(params)
    }
}

// ── Handler output ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: &'static str,
}

fn col(name: &'static str, ty: &'static str) -> ColumnSpec {
    ColumnSpec { name, ty }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentData {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Value>,
    pub sql: Option<String>,
    pub definition: String,
    /// Source tables backing the result, for provenance.
    pub tables: Vec<String>,
}

/// Registry dispatch: validate-then-execute for one intent.
pub fn execute(params: &IntentParams, conn: &Connection, org_id: &str) -> Result<IntentData> {
    match params {
        IntentParams::TopSkusByMargin(p) => top_skus_by_margin(p, conn, org_id),
        IntentParams::StockoutRisk(p) => stockout_risk(p, conn, org_id),
        IntentParams::WeekInReview(p) => week_in_review(p, conn, org_id),
        IntentParams::ReorderSuggestions(p) => reorder_suggestions(p, conn, org_id),
        IntentParams::SlowMovers(p) => slow_movers(p, conn, org_id),
        IntentParams::ProductDetail(p) => product_detail(p, conn, org_id),
        IntentParams::QuarterlyForecast(p) => quarterly_forecast(p, conn, org_id),
        IntentParams::AnnualBreakdown(p) => annual_breakdown(p, conn, org_id),
    }
}

fn flatten_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Handlers ────────────────────────────────────────────────────────────

fn top_skus_by_margin(
    p: &TopSkusByMarginParams,
    conn: &Connection,
    org_id: &str,
) -> Result<IntentData> {
    let days = p.period.days();
    let mart_sql = "
        SELECT product_name, sku, SUM(gross_margin) AS gross_margin,
               SUM(gross_revenue) AS revenue, SUM(units_sold) AS units
        FROM sales_daily
        WHERE org_id = ?1 AND sales_date >= date('now', ?2)
        GROUP BY product_name, sku
        ORDER BY gross_margin DESC
        LIMIT ?3";
    let modifier = format!("-{days} days");

    let read = |sql: &str| -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params![org_id, modifier, p.n], |row| {
                Ok(json!({
                    "product_name": row.get::<_, String>(0)?,
                    "sku": row.get::<_, String>(1)?,
                    "gross_margin": row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    "revenue": row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    "units": row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };

    let (rows, executed_sql, fallback_used) = match read(mart_sql) {
        Ok(rows) => (rows, mart_sql, false),
        Err(_) => {
            // Mart unavailable: derive from order items.
            let fallback_sql = "
                SELECT p.name AS product_name, p.sku,
                       SUM((oi.unit_price - COALESCE(p.cost, 0)) * oi.quantity) AS gross_margin,
                       SUM(oi.unit_price * oi.quantity) AS revenue,
                       SUM(oi.quantity) AS units
                FROM order_items oi
                JOIN orders o ON o.id = oi.order_id
                JOIN products p ON p.id = oi.product_id
                WHERE p.org_id = ?1 AND o.ordered_at >= date('now', ?2)
                GROUP BY p.name, p.sku
                ORDER BY gross_margin DESC
                LIMIT ?3";
            (read(fallback_sql)?, fallback_sql, true)
        }
    };

    let mut definition =
        "Top SKUs ranked by total gross margin over the selected period.".to_string();
    if fallback_used {
        definition.push_str(" (fallback approximation)");
    }
    Ok(IntentData {
        columns: vec![
            col("product_name", "string"),
            col("sku", "string"),
            col("gross_margin", "number"),
            col("revenue", "number"),
            col("units", "number"),
        ],
        rows,
        sql: Some(flatten_sql(executed_sql)),
        definition,
        tables: if fallback_used {
            vec!["orders".into(), "order_items".into(), "products".into()]
        } else {
            vec!["sales_daily".into()]
        },
    })
}

fn stockout_risk(p: &StockoutRiskParams, conn: &Connection, org_id: &str) -> Result<IntentData> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    let velocities = mart::velocity_map(conn, org_id, 60).unwrap_or_default();

    let mut rows: Vec<(crate::model::RiskBand, f64, Value)> = Vec::new();
    for s in &stock {
        let vel = velocities.get(&s.sku);
        let v7 = vel.and_then(|v| v.v7);
        let v30 = vel.and_then(|v| v.v30);
        let v = v7.filter(|v| *v > 0.0).or(v30.filter(|v| *v > 0.0));
        let Some(v) = v else { continue };
        let days_to = s.on_hand / v;
        if days_to > p.horizon_days as f64 {
            continue;
        }
        let band = crate::model::RiskBand::from_days(days_to);
        rows.push((
            band,
            days_to,
            json!({
                "product_name": s.name,
                "sku": s.sku,
                "on_hand": s.on_hand,
                "days_to_stockout": (days_to * 10.0).round() / 10.0,
                "risk_level": band.as_str(),
            }),
        ));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    Ok(IntentData {
        columns: vec![
            col("product_name", "string"),
            col("sku", "string"),
            col("on_hand", "number"),
            col("days_to_stockout", "number"),
            col("risk_level", "string"),
        ],
        rows: rows.into_iter().map(|(_, _, v)| v).collect(),
        sql: Some(
            "SELECT on_hand, units_7day_avg, units_30day_avg FROM products JOIN sales_daily"
                .into(),
        ),
        definition:
            "Products at risk of stocking out within the specified horizon based on recent velocity."
                .into(),
        tables: vec!["products".into(), "inventory_movements".into(), "sales_daily".into()],
    })
}

fn week_in_review(p: &WeekInReviewParams, conn: &Connection, org_id: &str) -> Result<IntentData> {
    let _ = p; // no extra parameters yet
    let mart_sql = "
        SELECT sales_date, SUM(gross_revenue) AS revenue, SUM(units_sold) AS units,
               SUM(gross_margin) AS margin
        FROM sales_daily
        WHERE org_id = ?1 AND sales_date >= date('now', '-7 days')
        GROUP BY sales_date
        ORDER BY sales_date DESC";

    let read = |sql: &str| -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([org_id], |row| {
                Ok(json!({
                    "date": row.get::<_, String>(0)?,
                    "revenue": row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    "units": row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    "margin": row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };

    let (rows, executed_sql, fallback_used) = match read(mart_sql) {
        Ok(rows) => (rows, mart_sql, false),
        Err(_) => {
            let fallback_sql = "
                SELECT date(o.ordered_at) AS sales_date,
                       SUM(oi.unit_price * oi.quantity - oi.discount) AS revenue,
                       SUM(oi.quantity) AS units,
                       SUM((oi.unit_price - COALESCE(p.cost, 0)) * oi.quantity) AS margin
                FROM orders o
                JOIN order_items oi ON oi.order_id = o.id
                JOIN products p ON p.id = oi.product_id
                WHERE o.org_id = ?1 AND o.ordered_at >= date('now', '-7 days')
                GROUP BY date(o.ordered_at)
                ORDER BY sales_date DESC";
            (read(fallback_sql)?, fallback_sql, true)
        }
    };

    let mut definition = "Daily revenue, units, and margin for the last 7 days.".to_string();
    if fallback_used {
        definition.push_str(" (fallback approximation)");
    }
    Ok(IntentData {
        columns: vec![
            col("date", "date"),
            col("revenue", "number"),
            col("units", "number"),
            col("margin", "number"),
        ],
        rows,
        sql: Some(flatten_sql(executed_sql)),
        definition,
        tables: if fallback_used {
            vec!["orders".into(), "order_items".into(), "products".into()]
        } else {
            vec!["sales_daily".into()]
        },
    })
}

fn reorder_suggestions(
    p: &ReorderSuggestionsParams,
    conn: &Connection,
    org_id: &str,
) -> Result<IntentData> {
    let _ = p;
    let stock = mart::on_hand_rows(conn, org_id)?;
    let velocities = mart::velocity_map(conn, org_id, 60).unwrap_or_default();

    // Light conversational variant: target 30 days of cover from the
    // 30-day velocity. The purchasing surface applies the full guardrails.
    let mut suggestions: Vec<Value> = Vec::new();
    for s in &stock {
        let v30 = velocities.get(&s.sku).and_then(|v| v.v30).unwrap_or(0.0);
        if v30 <= 0.0 {
            continue;
        }
        let needed = v30 * 30.0 - s.on_hand;
        if needed > 0.0 {
            suggestions.push(json!({
                "product_name": s.name,
                "sku": s.sku,
                "on_hand": s.on_hand,
                "avg_30d_units": v30,
                "suggested_order_qty": needed.round() as i64,
            }));
        }
    }
    suggestions.sort_by_key(|v| -v["suggested_order_qty"].as_i64().unwrap_or(0));

    Ok(IntentData {
        columns: vec![
            col("product_name", "string"),
            col("sku", "string"),
            col("on_hand", "number"),
            col("avg_30d_units", "number"),
            col("suggested_order_qty", "number"),
        ],
        rows: suggestions,
        sql: Some("SELECT on_hand, units_30day_avg FROM products JOIN sales_daily".into()),
        definition:
            "Suggested replenishment quantities to cover 30 days based on 30-day average velocity."
                .into(),
        tables: vec!["products".into(), "inventory_movements".into(), "sales_daily".into()],
    })
}

fn slow_movers(p: &SlowMoversParams, conn: &Connection, org_id: &str) -> Result<IntentData> {
    let days = p.period.days();
    let stock = mart::on_hand_rows(conn, org_id)?;
    let sold = mart::units_sold_map(conn, org_id, days).unwrap_or_default();

    let mut rows: Vec<(i64, f64, Value)> = Vec::new();
    for s in &stock {
        if s.on_hand <= 0.0 {
            continue;
        }
        let units = sold.get(&s.sku).copied().unwrap_or(0);
        rows.push((
            units,
            s.on_hand,
            json!({
                "product_name": s.name,
                "sku": s.sku,
                "on_hand": s.on_hand,
                "units_sold_period": units,
            }),
        ));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)));
    rows.truncate(p.n as usize);

    Ok(IntentData {
        columns: vec![
            col("product_name", "string"),
            col("sku", "string"),
            col("on_hand", "number"),
            col("units_sold_period", "number"),
        ],
        rows: rows.into_iter().map(|(_, _, v)| v).collect(),
        sql: Some("SELECT on_hand, units_sold FROM products JOIN sales_daily".into()),
        definition: format!(
            "Products with on-hand inventory but low sales in last {days} days (potential dead stock)."
        ),
        tables: vec!["products".into(), "inventory_movements".into(), "sales_daily".into()],
    })
}

fn product_detail(p: &ProductDetailParams, conn: &Connection, org_id: &str) -> Result<IntentData> {
    if p.sku.is_none() && p.name.is_none() {
        return Ok(IntentData {
            columns: vec![],
            rows: vec![],
            sql: None,
            definition: "Provide sku or name for product detail.".into(),
            tables: vec![],
        });
    }

    // Optional filters are appended with placeholders only when present.
    let mut filters: Vec<&str> = Vec::new();
    let mut binds: Vec<&dyn rusqlite::ToSql> = vec![&org_id];
    if let Some(sku) = &p.sku {
        filters.push("p.sku = ?");
        binds.push(sku);
    }
    if let Some(name) = &p.name {
        filters.push("lower(p.name) = lower(?)");
        binds.push(name);
    }
    let sql = format!(
        "SELECT p.id, p.name, p.sku,
                COALESCE((SELECT SUM(CASE WHEN im.movement_type IN ('in','adjust') THEN im.quantity
                                          WHEN im.movement_type = 'out' THEN -im.quantity
                                          ELSE 0 END)
                          FROM inventory_movements im WHERE im.product_id = p.id), 0) AS on_hand
         FROM products p
         WHERE p.org_id = ?1 AND {}
         LIMIT 1",
        filters.join(" AND ")
    );

    let found = conn
        .query_row(&sql, binds.as_slice(), |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, f64>(3)?))
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some((name, sku, on_hand)) = found else {
        return Ok(IntentData {
            columns: vec![],
            rows: vec![],
            sql: Some(flatten_sql(&sql)),
            definition: "Product not found for given filters.".into(),
            tables: vec!["products".into(), "inventory_movements".into()],
        });
    };

    let sales = mart::product_sales_summary(conn, org_id, &sku).unwrap_or_default();
    let row = json!({
        "product_name": name,
        "sku": sku,
        "on_hand": on_hand,
        "units_sold_7d": sales.units_7d,
        "units_sold_30d": sales.units_30d,
        "margin_30d": sales.margin_30d,
        "revenue_30d": sales.revenue_30d,
    });

    Ok(IntentData {
        columns: vec![
            col("product_name", "string"),
            col("sku", "string"),
            col("on_hand", "number"),
            col("units_sold_7d", "number"),
            col("units_sold_30d", "number"),
            col("margin_30d", "number"),
            col("revenue_30d", "number"),
        ],
        rows: vec![row],
        sql: Some(flatten_sql(&sql)),
        definition: "Detailed product snapshot: current on-hand, recent sales & economics.".into(),
        tables: vec!["products".into(), "inventory_movements".into(), "sales_daily".into()],
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct QuarterTotals {
    revenue: f64,
    units: i64,
    margin: f64,
}

fn quarterly_forecast(
    p: &QuarterlyForecastParams,
    conn: &Connection,
    org_id: &str,
) -> Result<IntentData> {
    let today = Utc::now().date_naive();
    let current_quarter = ((today.month() - 1) / 3 + 1) as i32;
    let current_year = today.year();

    let (target_quarter, target_year) = match p.period {
        ForecastPeriod::CurrentQuarter => (current_quarter, current_year),
        ForecastPeriod::NextQuarter => {
            if current_quarter < 4 {
                (current_quarter + 1, current_year)
            } else {
                (1, current_year + 1)
            }
        }
    };

    // Last ~15 months of quarterly totals for the trend, plus the current
    // quarter's partial figures for a linear projection.
    let sql = "
        SELECT CAST(strftime('%Y', sales_date) AS INTEGER) AS year,
               (CAST(strftime('%m', sales_date) AS INTEGER) + 2) / 3 AS quarter,
               SUM(gross_revenue) AS revenue,
               SUM(units_sold) AS units,
               SUM(gross_margin) AS margin,
               COUNT(DISTINCT sales_date) AS active_days
        FROM sales_daily
        WHERE org_id = ?1 AND sales_date >= date('now', '-15 months')
        GROUP BY year, quarter
        ORDER BY year, quarter";

    let quarters: Vec<(i32, i32, QuarterTotals, i64)> = match conn.prepare(sql) {
        Ok(mut stmt) => stmt
            .query_map([org_id], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, i32>(1)?,
                    QuarterTotals {
                        revenue: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        units: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        margin: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    },
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        Err(_) => Vec::new(),
    };

    if quarters.is_empty() {
        return Ok(IntentData {
            columns: vec![],
            rows: vec![],
            sql: Some(flatten_sql(sql)),
            definition: "No historical data available for quarterly forecast.".into(),
            tables: vec!["sales_daily".into()],
        });
    }

    let current = quarters
        .iter()
        .find(|(y, q, _, _)| *y == current_year && *q == current_quarter);
    let historical: Vec<&QuarterTotals> = quarters
        .iter()
        .filter(|(y, q, _, _)| !(*y == current_year && *q == current_quarter))
        .map(|(_, _, t, _)| t)
        .collect();

    let (projected_revenue, projected_units, projected_margin) = match current {
        // Partial data for the running quarter: project linearly onto a
        // 90-day quarter.
        Some((_, _, totals, days_elapsed)) if *days_elapsed > 0 => {
            let factor = 90.0 / *days_elapsed as f64;
            (
                totals.revenue * factor,
                (totals.units as f64 * factor) as i64,
                totals.margin * factor,
            )
        }
        _ if !historical.is_empty() => {
            let recent: Vec<&&QuarterTotals> =
                historical.iter().rev().take(4).collect();
            let n = recent.len() as f64;
            (
                recent.iter().map(|t| t.revenue).sum::<f64>() / n,
                (recent.iter().map(|t| t.units).sum::<i64>() as f64 / n) as i64,
                recent.iter().map(|t| t.margin).sum::<f64>() / n,
            )
        }
        _ => (0.0, 0, 0.0),
    };

    let confidence = if historical.len() >= 4 { "medium" } else { "low" };
    let row = json!({
        "quarter": format!("Q{target_quarter} {target_year}"),
        "projected_revenue": (projected_revenue * 100.0).round() / 100.0,
        "projected_units": projected_units,
        "projected_margin": (projected_margin * 100.0).round() / 100.0,
        "confidence": confidence,
    });

    Ok(IntentData {
        columns: vec![
            col("quarter", "string"),
            col("projected_revenue", "number"),
            col("projected_units", "number"),
            col("projected_margin", "number"),
            col("confidence", "string"),
        ],
        rows: vec![row],
        sql: Some(flatten_sql(sql)),
        definition: "Quarterly forecast based on historical trends and current quarter performance."
            .into(),
        tables: vec!["sales_daily".into()],
    })
}

fn annual_breakdown(
    p: &AnnualBreakdownParams,
    conn: &Connection,
    org_id: &str,
) -> Result<IntentData> {
    let year = p.target_year.unwrap_or_else(|| Utc::now().year());

    let mart_sql = "
        SELECT CAST(strftime('%Y', sales_date) AS INTEGER) AS year,
               (CAST(strftime('%m', sales_date) AS INTEGER) + 2) / 3 AS quarter,
               SUM(gross_revenue) AS revenue,
               SUM(units_sold) AS units,
               SUM(gross_margin) AS margin,
               COUNT(DISTINCT sales_date) AS active_days
        FROM sales_daily
        WHERE org_id = ?1 AND CAST(strftime('%Y', sales_date) AS INTEGER) = ?2
        GROUP BY year, quarter
        ORDER BY year, quarter";

    let read = |sql: &str| -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params![org_id, year], |row| {
                let revenue = row.get::<_, Option<f64>>(2)?.unwrap_or(0.0);
                let margin = row.get::<_, Option<f64>>(4)?.unwrap_or(0.0);
                let margin_pct = if revenue > 0.0 { margin / revenue * 100.0 } else { 0.0 };
                Ok(json!({
                    "year": row.get::<_, i32>(0)?,
                    "quarter": format!("Q{}", row.get::<_, i32>(1)?),
                    "revenue": revenue,
                    "units": row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    "margin": margin,
                    "active_days": row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    "margin_percentage": (margin_pct * 10.0).round() / 10.0,
                }))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };

    let (rows, executed_sql, fallback_used) = match read(mart_sql) {
        Ok(rows) => (rows, mart_sql, false),
        Err(_) => {
            let fallback_sql = "
                SELECT CAST(strftime('%Y', o.ordered_at) AS INTEGER) AS year,
                       (CAST(strftime('%m', o.ordered_at) AS INTEGER) + 2) / 3 AS quarter,
                       SUM(oi.unit_price * oi.quantity - oi.discount) AS revenue,
                       SUM(oi.quantity) AS units,
                       SUM((oi.unit_price - COALESCE(p.cost, 0)) * oi.quantity) AS margin,
                       COUNT(DISTINCT date(o.ordered_at)) AS active_days
                FROM orders o
                JOIN order_items oi ON oi.order_id = o.id
                JOIN products p ON p.id = oi.product_id
                WHERE o.org_id = ?1 AND CAST(strftime('%Y', o.ordered_at) AS INTEGER) = ?2
                GROUP BY year, quarter
                ORDER BY year, quarter";
            (read(fallback_sql)?, fallback_sql, true)
        }
    };

    let mut definition = format!(
        "{year} annual performance broken down by quarters showing revenue, units, margin and profitability."
    );
    if fallback_used {
        definition.push_str(" (fallback approximation)");
    }
    Ok(IntentData {
        columns: vec![
            col("year", "number"),
            col("quarter", "string"),
            col("revenue", "number"),
            col("units", "number"),
            col("margin", "number"),
            col("active_days", "number"),
            col("margin_percentage", "number"),
        ],
        rows,
        sql: Some(flatten_sql(executed_sql)),
        definition,
        tables: if fallback_used {
            vec!["orders".into(), "order_items".into(), "products".into()]
        } else {
            vec!["sales_daily".into()]
        },
    })
}
