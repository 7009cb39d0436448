//! Hybrid chat surface: route the message (RAG / OPEN / BI), execute the
//! matching path, and answer with the unified, contract-validated shape.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::chat::composer;
use crate::chat::contracts::UnifiedResponse;
use crate::chat::intents::{Intent, IntentData, IntentParams};
use crate::chat::params as param_utils;
use crate::chat::router::{self, Route};
use crate::chat::rules::find_year;
use crate::llm::ChatMessage;

#[derive(Deserialize)]
pub struct UnifiedChatRequest {
    pub message: String,
    /// Optional explicit override for a BI intent.
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

pub async fn unified_chat(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UnifiedChatRequest>,
) -> Result<Json<UnifiedResponse>, ApiError> {
    let settings = &state.inner.settings;
    if !settings.hybrid_chat_enabled {
        return Err(ApiError::Forbidden("Hybrid chat disabled".into()));
    }
    let org_id = &auth.org_id;

    // Step 1: route.
    let mut decision = router::route(
        &req.message,
        &state.inner.llm,
        settings,
        &state.inner.embedding_cache,
    )
    .await;

    // Explicit BI intent override; only registered intents are accepted.
    if let Some(name) = &req.intent {
        let intent = Intent::parse(name)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown intent `{name}`")))?;
        decision.route = Route::Bi;
        decision.intent = Some(intent);
        decision.reason = "explicit_intent".into();
        decision.confidence = 1.0;
    }

    // Step 2: parameter extraction (analysis window for provenance).
    let now = Utc::now().with_timezone(&settings.app_tz);
    let (window_start, window_end) = param_utils::normalize_time(&req.message, now);

    // Step 3: BI execution.
    let mut bi_result: Option<IntentData> = None;
    if decision.route == Route::Bi || decision.route == Route::Mixed {
        if let Some(mut intent) = decision.intent {
            let lower = req.message.to_lowercase();
            let target_year = find_year(&lower);

            // Annual wording on a weekly intent means the per-quarter
            // breakdown of that year.
            if intent == Intent::WeekInReview
                && ["2025", "2024", "year", "annual", "ytd", "revenue for"]
                    .iter()
                    .any(|t| lower.contains(t))
            {
                intent = Intent::AnnualBreakdown;
            }

            let mut raw = Map::new();
            if intent == Intent::AnnualBreakdown {
                if let Some(year) = target_year {
                    raw.insert("target_year".into(), json!(year));
                }
            }

            let executed = {
                let params = IntentParams::from_value(intent, &raw)?;
                let conn = state.inner.db.lock().await;
                crate::chat::intents::execute(&params, &conn, org_id)
            };
            match executed {
                Ok(mut data) => {
                    if data.tables.is_empty() {
                        data.tables = vec!["sales_daily".into()];
                    }
                    bi_result = Some(data);
                }
                Err(e) => {
                    warn!(intent = intent.as_str(), error = %e, "BI handler failed");
                    if decision.route == Route::Bi {
                        return Ok(Json(composer::compose_no_answer(
                            format!(
                                "Business intelligence analysis temporarily unavailable: {}",
                                truncate(&e.to_string(), 100)
                            ),
                            vec![
                                "Try a simpler question".into(),
                                "Ask about documents instead".into(),
                            ],
                        )?));
                    }
                }
            }
            decision.intent = Some(intent);
        }
    }

    // Step 4: retrieval.
    let mut snippets = Vec::new();
    if decision.route == Route::Rag || decision.route == Route::Mixed {
        match state.inner.retriever.search(&req.message, settings.rag_top_k).await {
            Ok(found) => snippets = found,
            Err(e) => {
                warn!(error = %e, "retriever search failed");
                if decision.route == Route::Rag {
                    return Ok(Json(composer::compose_no_answer(
                        "Document search system temporarily unavailable".into(),
                        vec!["Ask a BI question".into(), "Try again later".into()],
                    )?));
                }
            }
        }

        if decision.route == Route::Rag {
            if snippets.is_empty() {
                return Ok(Json(composer::compose_no_answer(
                    "No relevant documents found. Please add documents to the knowledge base or \
                     try a different question."
                        .into(),
                    vec![
                        "Ask a BI question about your data".into(),
                        "Refine your question".into(),
                        "Contact support for document ingestion".into(),
                    ],
                )?));
            }
            let answer = state
                .inner
                .retriever
                .synthesize(&req.message, &snippets)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "RAG synthesis failed");
                    "Relevant documents are attached below.".into()
                });
            return Ok(Json(composer::compose_rag(&snippets, answer, decision.confidence)?));
        }
    }

    // Step 5: MIXED synthesis, degrading to BI-only without documents.
    if decision.route == Route::Mixed {
        let intent_name = decision.intent.map(|i| i.as_str()).unwrap_or("");
        let data = bi_result.unwrap_or_else(empty_bi_result);
        if snippets.is_empty() {
            let summary =
                format!("Data analysis for {intent_name}. No relevant documents found.");
            return Ok(Json(composer::compose_bi(
                &data,
                summary,
                intent_name,
                decision.confidence,
            )?));
        }
        let synthesis_prompt = format!(
            "Question: {}\n\nBI Analysis: {} data points found\nDocumentation: {} relevant \
             sections found\nAnalysis window: {window_start} to {window_end}\n\nProvide a \
             comprehensive answer combining both data analysis and policy/documentation insights.",
            req.message,
            data.rows.len(),
            snippets.len()
        );
        let messages = [
            ChatMessage::system(
                "You are a business analyst combining data insights with policy documentation.",
            ),
            ChatMessage::user(synthesis_prompt),
        ];
        return match state.inner.llm.chat_text(&messages, 0.3, 512, false).await {
            Ok(synthesis) => Ok(Json(composer::compose_mixed(
                &data,
                &snippets,
                synthesis,
                decision.confidence,
                intent_name,
            )?)),
            Err(e) => {
                warn!(error = %e, "mixed synthesis failed");
                let summary =
                    format!("Data analysis complete. Document synthesis unavailable: {e}");
                Ok(Json(composer::compose_bi(
                    &data,
                    summary,
                    intent_name,
                    decision.confidence,
                )?))
            }
        };
    }

    // Step 6: BI answer.
    if decision.route == Route::Bi {
        if let (Some(intent), Some(data)) = (decision.intent, bi_result.as_ref()) {
            let summary = intelligent_summary(intent, data, &req.message);
            return Ok(Json(composer::compose_bi(
                data,
                summary,
                intent.as_str(),
                decision.confidence,
            )?));
        }
    }

    // Step 7: OPEN chat with graceful degradation.
    if decision.route == Route::Open {
        let messages = [
            ChatMessage::system(
                "You are an assistant for inventory management and sales analytics. Help with \
                 product stock levels, sales data, purchasing, and warehouse operations. Be \
                 concise.",
            ),
            ChatMessage::user(req.message.clone()),
        ];
        return match state.inner.llm.chat_text(&messages, 0.7, 512, false).await {
            Ok(content) if !content.is_empty() => Ok(Json(composer::compose_open(content)?)),
            Ok(_) | Err(_) => Ok(Json(composer::compose_no_answer(
                "LLM temporarily unavailable".into(),
                vec!["Ask a BI question".into(), "Retry in a moment".into()],
            )?)),
        };
    }

    let _ = req.options;
    Ok(Json(composer::compose_no_answer(
        "Unable to determine an answer path".into(),
        vec!["Ask a simpler question".into(), "Request top SKUs by margin".into()],
    )?))
}

fn empty_bi_result() -> IntentData {
    IntentData {
        columns: vec![],
        rows: vec![],
        sql: None,
        definition: String::new(),
        tables: vec![],
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Contextual one-paragraph summaries per intent for the BI card.
fn intelligent_summary(intent: Intent, data: &IntentData, original_query: &str) -> String {
    let rows = &data.rows;
    if rows.is_empty() {
        return format!(
            "No data available for your {} query.",
            intent.as_str().replace('_', " ")
        );
    }
    let query_lower = original_query.to_lowercase();

    match intent {
        Intent::WeekInReview => {
            let revenue: f64 = rows.iter().filter_map(|r| r["revenue"].as_f64()).sum();
            let units: i64 = rows.iter().filter_map(|r| r["units"].as_i64()).sum();
            let margin: f64 = rows.iter().filter_map(|r| r["margin"].as_f64()).sum();
            let days = rows.len().max(1);
            let daily = revenue / days as f64;
            let margin_pct = if revenue > 0.0 { margin / revenue * 100.0 } else { 0.0 };
            format!(
                "Weekly Performance: ${revenue:.0} revenue from {units} units. ${margin:.0} margin \
                 ({margin_pct:.1}%). Daily average: ${daily:.0} over {days} days."
            )
        }
        Intent::TopSkusByMargin => {
            let top = &rows[0];
            let top5: f64 = rows
                .iter()
                .take(5)
                .filter_map(|r| r["gross_margin"].as_f64())
                .sum();
            format!(
                "Top Performers: {} leads with ${:.0} margin. Top 5 products generated ${top5:.0} \
                 combined margin. These are your profit drivers.",
                top["sku"].as_str().unwrap_or("?"),
                top["gross_margin"].as_f64().unwrap_or(0.0)
            )
        }
        Intent::StockoutRisk => {
            let high = rows
                .iter()
                .filter(|r| r["risk_level"].as_str() == Some("high"))
                .count();
            let medium = rows
                .iter()
                .filter(|r| r["risk_level"].as_str() == Some("medium"))
                .count();
            if high > 0 {
                format!(
                    "Urgent Attention: {high} products at HIGH stockout risk, {medium} at medium \
                     risk. Immediate reordering recommended."
                )
            } else if medium > 0 {
                format!(
                    "Watch List: {medium} products at medium stockout risk. Plan reorders within \
                     1-2 weeks."
                )
            } else {
                "All Clear: No immediate stockout risks detected. Inventory levels are healthy."
                    .into()
            }
        }
        Intent::QuarterlyForecast => {
            let revenue: f64 = rows
                .iter()
                .filter_map(|r| r["projected_revenue"].as_f64())
                .sum();
            let units: i64 = rows
                .iter()
                .filter_map(|r| r["projected_units"].as_i64())
                .sum();
            if query_lower.contains("quarter") {
                format!(
                    "Quarterly Forecast: ${revenue:.0} projected revenue from {units} units. \
                     Based on current trends and historical performance."
                )
            } else {
                format!(
                    "Annual Outlook: ${revenue:.0} projected revenue, {units} units forecasted."
                )
            }
        }
        Intent::ReorderSuggestions => format!(
            "Reorder Recommendations: {} products need reordering. Prioritize high-velocity items \
             to avoid stockouts.",
            rows.len()
        ),
        Intent::SlowMovers => format!(
            "Slow Movers Identified: {} underperforming products. {} and similar items may need \
             promotion or clearance.",
            rows.len(),
            rows[0]["product_name"].as_str().unwrap_or("Unknown")
        ),
        Intent::ProductDetail => {
            let r = &rows[0];
            format!(
                "Product Analysis: Detailed breakdown for {}. Current performance metrics and \
                 inventory status.",
                r["product_name"]
                    .as_str()
                    .or(r["sku"].as_str())
                    .unwrap_or("Unknown")
            )
        }
        Intent::AnnualBreakdown => {
            let revenue: f64 = rows.iter().filter_map(|r| r["revenue"].as_f64()).sum();
            let units: i64 = rows.iter().filter_map(|r| r["units"].as_i64()).sum();
            let year = rows[0]["year"].as_i64().unwrap_or(0);
            format!(
                "{year} Business Performance: ${revenue:.0} total revenue from {units} units sold \
                 across {} active quarters.",
                rows.len()
            )
        }
    }
}
