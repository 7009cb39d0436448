//! Purchasing surface: full reorder-suggestion engine, per-product
//! explanations, and draft-PO generation.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::model::VelocityStrategy;
use crate::reorder::{
    self, DraftPo, DraftPoSummary, ReorderExplanation, ReorderSuggestion,
};

fn parse_strategy(raw: &str) -> Result<VelocityStrategy, ApiError> {
    VelocityStrategy::parse(raw).ok_or_else(|| {
        ApiError::Validation(vec![format!(
            "strategy must be latest or conservative, got {raw}"
        )])
    })
}

fn validate_override(horizon_days_override: Option<i64>) -> Result<(), ApiError> {
    if let Some(o) = horizon_days_override {
        if !(1..=365).contains(&o) {
            return Err(ApiError::Validation(vec![format!(
                "horizon_days_override must be in 1..=365, got {o}"
            )]));
        }
    }
    Ok(())
}

// ── GET /purchasing/reorder-suggestions ─────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReorderSuggestionsQuery {
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub horizon_days_override: Option<i64>,
    #[serde(default)]
    pub include_zero_velocity: bool,
    #[serde(default)]
    pub min_days_cover: Option<i64>,
    #[serde(default)]
    pub max_days_cover: Option<i64>,
}

fn default_strategy() -> String {
    "latest".into()
}

#[derive(Serialize)]
pub struct ReorderSuggestionsResponse {
    pub suggestions: Vec<ReorderSuggestion>,
    pub summary: Value,
    pub generated_at: String,
    pub parameters: ReorderSuggestionsQuery,
}

pub async fn get_reorder_suggestions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<ReorderSuggestionsQuery>,
) -> Result<Json<ReorderSuggestionsResponse>, ApiError> {
    let strategy = parse_strategy(&q.strategy)?;
    validate_override(q.horizon_days_override)?;

    let conn = state.inner.db.lock().await;
    let mut suggestions = reorder::compute_reorder_suggestions(
        &conn,
        &auth.org_id,
        strategy,
        q.horizon_days_override,
    )
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    drop(conn);

    // Post-filters: velocity-less suggestions are opt-in, and coverage
    // bounds apply only where current cover is known.
    if !q.include_zero_velocity {
        suggestions.retain(|s| s.chosen_velocity.is_some());
    }
    if let Some(min) = q.min_days_cover {
        suggestions.retain(|s| s.days_cover_current.is_none_or(|d| d >= min as f64));
    }
    if let Some(max) = q.max_days_cover {
        suggestions.retain(|s| s.days_cover_current.is_none_or(|d| d <= max as f64));
    }

    let total_units: i64 = suggestions.iter().map(|s| s.recommended_quantity).sum();
    let suppliers: std::collections::HashSet<&str> = suggestions
        .iter()
        .filter_map(|s| s.supplier_id.as_deref())
        .collect();
    let summary = json!({
        "total_suggestions": suggestions.len(),
        "total_recommended_units": total_units,
        "suppliers_involved": suppliers.len(),
        "strategy": strategy.as_str(),
    });

    Ok(Json(ReorderSuggestionsResponse {
        suggestions,
        summary,
        generated_at: Utc::now().to_rfc3339(),
        parameters: q,
    }))
}

// ── GET /purchasing/reorder-suggestions/explain/{product_id} ────────────

#[derive(Deserialize)]
pub struct ExplainQuery {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub horizon_days_override: Option<i64>,
}

pub async fn explain_reorder_suggestion(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(q): Query<ExplainQuery>,
) -> Result<Json<ReorderExplanation>, ApiError> {
    let strategy = parse_strategy(&q.strategy)?;
    validate_override(q.horizon_days_override)?;

    let conn = state.inner.db.lock().await;
    let explanation = reorder::explain_reorder_suggestion(
        &conn,
        &auth.org_id,
        &product_id,
        strategy,
        q.horizon_days_override,
    )
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    explanation
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Product not found in reorder inputs".into()))
}

// ── POST /purchasing/reorder-suggestions/draft-po ───────────────────────

#[derive(Deserialize)]
pub struct DraftPoRequest {
    pub product_ids: Vec<String>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub horizon_days_override: Option<i64>,
    #[serde(default = "default_true")]
    pub auto_number: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
pub struct DraftPoResponse {
    pub draft_pos: Vec<DraftPo>,
    pub summary: DraftPoSummary,
    pub created_at: String,
}

pub async fn create_draft_pos(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<DraftPoRequest>,
) -> Result<Json<DraftPoResponse>, ApiError> {
    auth.require_role(&["admin", "purchaser"])?;
    let strategy = parse_strategy(&req.strategy)?;
    validate_override(req.horizon_days_override)?;
    if req.product_ids.is_empty() {
        return Err(ApiError::Validation(vec!["product_ids must not be empty".into()]));
    }

    let mut conn = state.inner.db.lock().await;
    let (draft_pos, summary) = reorder::build_draft_pos(
        &mut conn,
        &auth.org_id,
        &req.product_ids,
        strategy,
        req.horizon_days_override,
        req.auto_number,
        Some(&auth.user_id),
    )
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    Ok(Json(DraftPoResponse {
        draft_pos,
        summary,
        created_at: Utc::now().to_rfc3339(),
    }))
}
