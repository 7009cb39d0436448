//! Legacy chat surface: resolve an analytic intent and answer with a
//! typed table payload, or fall back to grounded open conversation.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::chat::context::business_context;
use crate::chat::intents::{
    ColumnSpec, Intent, IntentData, IntentParams, IntentResolution, ResolutionSource,
};
use crate::chat::resolver::{general_chat, resolve_intent};

#[derive(Deserialize)]
pub struct ChatQueryRequest {
    pub prompt: String,
    /// Optional explicit intent override (advanced).
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Serialize)]
pub struct QueryExplainer {
    pub definition: String,
    pub sql: Option<String>,
    pub sources: Vec<Value>,
}

#[derive(Serialize)]
pub struct FreshnessMeta {
    pub generated_at: String,
    pub data_fresh_at: Option<String>,
    pub max_lag_seconds: Option<i64>,
}

#[derive(Serialize)]
pub struct ConfidenceMeta {
    pub level: &'static str,
    pub reasons: Vec<String>,
}

#[derive(Serialize)]
pub struct NextAction {
    pub label: String,
    pub action_type: String,
    pub payload: Value,
}

#[derive(Serialize)]
pub struct ChatQueryResponse {
    pub intent: Option<Intent>,
    pub title: String,
    pub answer_summary: String,
    pub data: ChatData,
    pub query_explainer: QueryExplainer,
    pub freshness: FreshnessMeta,
    pub confidence: ConfidenceMeta,
    pub next_action: Option<NextAction>,
    pub warnings: Vec<String>,
    pub source: ResolutionSource,
}

#[derive(Serialize)]
pub struct ChatData {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Value>,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub async fn chat_query(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ChatQueryRequest>,
) -> Result<Json<ChatQueryResponse>, ApiError> {
    let settings = &state.inner.settings;
    if !settings.chat_enabled {
        return Err(ApiError::Forbidden("Chat disabled".into()));
    }
    let org_id = &auth.org_id;

    // Resolve the intent: explicit override wins, rules + LLM otherwise.
    let resolution: IntentResolution = match &req.intent {
        Some(name) => {
            let intent = Intent::parse(name)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown intent `{name}`")))?;
            IntentResolution {
                intent: Some(intent),
                params: req.params.clone(),
                confidence: 1.0,
                source: ResolutionSource::Rules,
                reasons: vec!["explicit".into()],
            }
        }
        None => resolve_intent(&req.prompt, &state.inner.llm, settings).await,
    };

    // No analytic intent: grounded general conversation, degrading to a
    // structured fallback instead of a 500 when the LLM is unreachable.
    if resolution.intent.is_none() {
        if settings.chat_llm_fallback_enabled {
            let context = {
                let conn = state.inner.db.lock().await;
                business_context(&conn, org_id)
            };
            return match general_chat(&req.prompt, &context, &state.inner.llm).await {
                Ok(answer) => Ok(Json(ChatQueryResponse {
                    intent: None,
                    title: "Assistant".into(),
                    answer_summary: sanitize_answer(&answer),
                    data: ChatData { columns: vec![], rows: vec![] },
                    query_explainer: QueryExplainer {
                        definition: "Business-aware conversation".into(),
                        sql: None,
                        sources: vec![],
                    },
                    freshness: FreshnessMeta {
                        generated_at: now_iso(),
                        data_fresh_at: None,
                        max_lag_seconds: None,
                    },
                    confidence: ConfidenceMeta {
                        level: "high",
                        reasons: vec!["business_context_aware".into()],
                    },
                    next_action: None,
                    warnings: vec![],
                    source: ResolutionSource::Llm,
                })),
                Err(e) => {
                    warn!(error = %e, "general chat degraded");
                    Ok(Json(ChatQueryResponse {
                        intent: None,
                        title: "Assistant".into(),
                        answer_summary: "LLM temporarily unavailable. You can still run analytic \
                                         intents (e.g. 'top margin skus last week')."
                            .into(),
                        data: ChatData { columns: vec![], rows: vec![] },
                        query_explainer: QueryExplainer {
                            definition: "Business-aware conversation fallback".into(),
                            sql: None,
                            sources: vec![],
                        },
                        freshness: FreshnessMeta {
                            generated_at: now_iso(),
                            data_fresh_at: None,
                            max_lag_seconds: None,
                        },
                        confidence: ConfidenceMeta {
                            level: "low",
                            reasons: vec![format!("llm_error:{e}")],
                        },
                        next_action: None,
                        warnings: vec!["llm_unavailable".into()],
                        source: ResolutionSource::Llm,
                    }))
                }
            };
        }
    }

    let Some(intent) = resolution.intent else {
        return Err(ApiError::BadRequest(format!(
            "intent_unresolved: {}",
            resolution.reasons.join(", ")
        )));
    };

    // Request params override resolver-extracted ones.
    let mut merged = resolution.params.clone();
    for (k, v) in &req.params {
        merged.insert(k.clone(), v.clone());
    }
    let params = IntentParams::from_value(intent, &merged)?;

    let conn = state.inner.db.lock().await;
    let data = crate::chat::intents::execute(&params, &conn, org_id)
        .map_err(|e| ApiError::Internal(format!("handler failed: {e:#}")))?;
    let (data_fresh_at, lag) = compute_freshness(&conn, org_id);
    let summary = summarize_with_context(intent, &data);
    drop(conn);

    let level = if resolution.confidence >= 0.75 {
        "high"
    } else if resolution.confidence >= 0.55 {
        "medium"
    } else {
        "low"
    };

    Ok(Json(ChatQueryResponse {
        intent: Some(intent),
        title: intent.title().into(),
        answer_summary: summary,
        query_explainer: QueryExplainer {
            definition: data.definition.clone(),
            sql: data.sql.clone(),
            sources: vec![],
        },
        data: ChatData { columns: data.columns, rows: data.rows },
        freshness: FreshnessMeta {
            generated_at: now_iso(),
            data_fresh_at,
            max_lag_seconds: lag,
        },
        confidence: ConfidenceMeta { level, reasons: resolution.reasons },
        next_action: None,
        warnings: vec![],
        source: resolution.source,
    }))
}

/// Latest data timestamp across movements and orders, with staleness lag.
fn compute_freshness(
    conn: &rusqlite::Connection,
    org_id: &str,
) -> (Option<String>, Option<i64>) {
    let latest: Option<String> = conn
        .query_row(
            "SELECT MAX(ts) FROM (
                 SELECT MAX(im.moved_at) AS ts
                 FROM inventory_movements im
                 JOIN products p ON p.id = im.product_id
                 WHERE p.org_id = ?1
                 UNION ALL
                 SELECT MAX(ordered_at) AS ts FROM orders WHERE org_id = ?1
             )",
            [org_id],
            |row| row.get(0),
        )
        .ok()
        .flatten();

    match latest {
        Some(ts) => {
            let lag = chrono::DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|t| (Utc::now() - t.to_utc()).num_seconds());
            (Some(ts), lag)
        }
        None => (None, None),
    }
}

/// Plain-text cleanup for UIs without markdown rendering: strip bold
/// markers, flatten simple tables into `Header: value` lines, collapse
/// repeated blank lines.
pub fn sanitize_answer(text: &str) -> String {
    let without_bold = text.replace("**", "");
    let lines: Vec<&str> = without_bold.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim_start().starts_with('|') && line.trim_start()[1..].contains('|') {
            let mut block = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('|') {
                block.push(lines[i]);
                i += 1;
            }
            if block.len() >= 2 {
                let headers: Vec<String> = block[0]
                    .trim()
                    .trim_matches('|')
                    .split('|')
                    .map(|h| h.trim().to_string())
                    .collect();
                for row in &block[1..] {
                    // skip separator rows (---)
                    let stripped: String = row.replace('|', "");
                    if stripped.trim().chars().all(|c| c == '-' || c == ' ') {
                        continue;
                    }
                    let cells: Vec<&str> =
                        row.trim().trim_matches('|').split('|').map(str::trim).collect();
                    if cells.len() == headers.len() {
                        for (h, c) in headers.iter().zip(&cells) {
                            out.push(format!("{h}: {c}"));
                        }
                    } else {
                        out.push(row.to_string());
                    }
                }
                continue;
            }
            for b in block {
                out.push(b.to_string());
            }
            continue;
        }
        out.push(line.to_string());
        i += 1;
    }

    let mut cleaned: Vec<String> = Vec::new();
    let mut prev_blank = false;
    for line in out {
        let blank = line.trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        cleaned.push(line);
        prev_blank = blank;
    }
    cleaned.join("\n").trim().to_string()
}

fn summarize(intent: Intent, data: &IntentData) -> String {
    let rows = &data.rows;
    if rows.is_empty() {
        return "No data found for selection.".into();
    }
    match intent {
        Intent::TopSkusByMargin => {
            let top = &rows[0];
            format!(
                "Top SKU {} with margin ${:.2}.",
                top["sku"].as_str().unwrap_or("?"),
                top["gross_margin"].as_f64().unwrap_or(0.0)
            )
        }
        Intent::StockoutRisk => {
            let high = rows
                .iter()
                .filter(|r| r["risk_level"].as_str() == Some("high"))
                .count();
            format!("{high} high-risk SKUs; {} at-risk within horizon.", rows.len())
        }
        Intent::WeekInReview => {
            let total: f64 = rows.iter().filter_map(|r| r["revenue"].as_f64()).sum();
            format!("Week revenue ${total:.2} across {} days.", rows.len())
        }
        Intent::ReorderSuggestions => format!(
            "{} SKUs need reorder; top suggestion qty {}",
            rows.len(),
            rows[0]["suggested_order_qty"].as_i64().unwrap_or(0)
        ),
        Intent::SlowMovers => {
            let zero = rows
                .iter()
                .filter(|r| r["units_sold_period"].as_i64() == Some(0))
                .count();
            format!(
                "{} slow movers (including {zero} with zero sales). Top stuck SKU {} with {} on hand.",
                rows.len(),
                rows[0]["sku"].as_str().unwrap_or("?"),
                rows[0]["on_hand"].as_f64().unwrap_or(0.0)
            )
        }
        Intent::AnnualBreakdown => {
            let revenue: f64 = rows.iter().filter_map(|r| r["revenue"].as_f64()).sum();
            let units: i64 = rows.iter().filter_map(|r| r["units"].as_i64()).sum();
            let year = rows[0]["year"].as_i64().unwrap_or(0);
            format!(
                "{year} Business Performance: ${revenue:.2} total revenue from {units} units sold \
                 across {} active quarters.",
                rows.len()
            )
        }
        _ => format!("Data with {} results.", rows.len()),
    }
}

/// Summary with one contextual insight layered on top of the base line.
fn summarize_with_context(intent: Intent, data: &IntentData) -> String {
    let rows = &data.rows;
    if rows.is_empty() {
        return "No data found for your query. This might indicate you need to add inventory data \
                or the specified filters returned no results."
            .into();
    }
    let base = summarize(intent, data);
    match intent {
        Intent::TopSkusByMargin => {
            let total: f64 = rows.iter().filter_map(|r| r["gross_margin"].as_f64()).sum();
            format!(
                "{base} Total margin from top performers: ${total:.2}. These products are driving \
                 your profitability."
            )
        }
        Intent::StockoutRisk => {
            let high = rows
                .iter()
                .filter(|r| r["risk_level"].as_str() == Some("high"))
                .count();
            if high > 0 {
                format!(
                    "{base} Immediate action needed on {high} high-risk items to prevent lost sales."
                )
            } else {
                format!("{base} Your inventory levels look healthy with good stock coverage.")
            }
        }
        Intent::WeekInReview if rows.len() >= 2 => {
            let latest = rows[0]["revenue"].as_f64().unwrap_or(0.0);
            let prev = rows[1]["revenue"].as_f64().unwrap_or(0.0);
            let trend = if latest > prev {
                "up"
            } else if latest < prev {
                "down"
            } else {
                "stable"
            };
            format!("{base} Daily revenue trend is {trend} compared to previous day.")
        }
        Intent::ReorderSuggestions => {
            let urgent = rows
                .iter()
                .filter(|r| r["suggested_order_qty"].as_i64().unwrap_or(0) > 50)
                .count();
            if urgent > 0 {
                format!(
                    "{base}. {urgent} items need large reorder quantities (>50 units) - consider \
                     bulk purchasing."
                )
            } else {
                format!("{base}. Regular restocking levels suggested.")
            }
        }
        Intent::ProductDetail => {
            let r = &rows[0];
            format!(
                "Product {} (SKU {}) has on-hand {} units. Sold {} units in last 7d and {} in \
                 last 30d. 30d revenue ${:.2} margin ${:.2}.",
                r["product_name"].as_str().unwrap_or("?"),
                r["sku"].as_str().unwrap_or("?"),
                r["on_hand"].as_f64().unwrap_or(0.0),
                r["units_sold_7d"].as_i64().unwrap_or(0),
                r["units_sold_30d"].as_i64().unwrap_or(0),
                r["revenue_30d"].as_f64().unwrap_or(0.0),
                r["margin_30d"].as_f64().unwrap_or(0.0)
            )
        }
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_bold_and_tables() {
        let input = "**Bold** intro\n\n| Metric | Value |\n|---|---|\n| Revenue | $100 |\n\n\nEnd";
        let out = sanitize_answer(input);
        assert!(!out.contains("**"));
        assert!(out.contains("Metric: Revenue"));
        assert!(out.contains("Value: $100"));
        assert!(!out.contains("\n\n\n"));
    }
}
