pub mod auth;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use std::path::Path;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::alerts::SqliteIdemStore;
use crate::chat::retriever::UnconfiguredRetriever;
use crate::config::Settings;

use state::AppState;

/// Build the versioned API router around an already-constructed state.
/// Split out from `serve` so tests can drive the same routes in-process.
pub fn app(state: AppState) -> Router {
    let origins = &state.inner.settings.allowed_origins;
    let cors = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api = Router::new()
        // Auth (public)
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        // Chat (JWT required)
        .route("/chat/query", post(handlers::chat::chat_query))
        .route("/chat2/query", post(handlers::chat2::unified_chat))
        // Analytics (JWT required)
        .route("/analytics", get(handlers::analytics::get_analytics))
        .route("/analytics/sales", get(handlers::analytics::get_sales_analytics))
        .route("/analytics/stockout-risk", get(handlers::analytics::get_stockout_risk))
        // Purchasing (JWT required)
        .route(
            "/purchasing/reorder-suggestions",
            get(handlers::purchasing::get_reorder_suggestions),
        )
        .route(
            "/purchasing/reorder-suggestions/explain/{product_id}",
            get(handlers::purchasing::explain_reorder_suggestion),
        )
        .route(
            "/purchasing/reorder-suggestions/draft-po",
            post(handlers::purchasing::create_draft_pos),
        )
        // Internal (cron token)
        .route("/internal/run-daily-alerts", post(handlers::internal::run_daily_alerts));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(state)
}

pub async fn serve(host: &str, port: u16, data_dir: &Path) -> Result<()> {
    let settings = Settings::from_env();

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = match &settings.database_url {
        Some(url) => std::path::PathBuf::from(url.trim_start_matches("sqlite://")),
        None => data_dir.join("stocksense.db"),
    };
    let db = db::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let idem = Box::new(SqliteIdemStore::new(db.clone()));
    let state = AppState::new(db, settings, idem, Box::new(UnconfiguredRetriever));
    let app = app(state);

    let addr = format!("{host}:{port}");
    info!(addr, "API server listening");
    info!("  Health:    GET  http://{addr}/health");
    info!("  Auth:      POST http://{addr}/api/v1/auth/login");
    info!("  Chat:      POST http://{addr}/api/v1/chat/query");
    info!("  Hybrid:    POST http://{addr}/api/v1/chat2/query");
    info!("  Analytics: GET  http://{addr}/api/v1/analytics");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app).await.context("running server")?;
    Ok(())
}
