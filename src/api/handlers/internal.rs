//! Internal cron-triggered endpoints, authenticated with the shared
//! scheduler bearer token rather than a user JWT.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use crate::alerts::{self, AlertRunReport};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::model::VelocityStrategy;

#[derive(Deserialize)]
pub struct RunAlertsQuery {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_channels")]
    pub channels: String,
}

fn default_strategy() -> String {
    "latest".into()
}

fn default_channels() -> String {
    "email,webhook".into()
}

pub async fn run_daily_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<RunAlertsQuery>,
) -> Result<Json<AlertRunReport>, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));
    if token != Some(state.inner.settings.alert_cron_token.as_str()) {
        return Err(ApiError::Unauthorized("Invalid cron token".into()));
    }

    let strategy = VelocityStrategy::parse(&q.strategy).ok_or_else(|| {
        ApiError::Validation(vec![format!(
            "strategy must be latest or conservative, got {}",
            q.strategy
        )])
    })?;
    let channels: Vec<String> = q
        .channels
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let report = alerts::run_daily_alerts(
        &state.inner.db,
        state.inner.idem.as_ref(),
        &state.inner.settings,
        strategy,
        &channels,
    )
    .await
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    Ok(Json(report))
}
