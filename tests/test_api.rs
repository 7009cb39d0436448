//! End-to-end API tests over the in-process axum router: auth, org
//! isolation, feature flags, parameter bounds, alert idempotency, and
//! the degraded chat paths.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use stocksense::alerts::MemoryIdemStore;
use stocksense::api::db;
use stocksense::api::state::AppState;
use stocksense::api::{app, auth};
use stocksense::chat::retriever::UnconfiguredRetriever;
use stocksense::config::Settings;

// ── Harness ─────────────────────────────────────────────────────────────

struct TestApp {
    router: Router,
    db: db::Db,
}

async fn build_app(settings: Settings) -> TestApp {
    let db = db::open_in_memory().unwrap();
    {
        let conn = db.lock().await;
        db::ensure_mart(&conn, true).unwrap();
    }
    let state = AppState::new(
        db.clone(),
        settings,
        Box::new(MemoryIdemStore::default()),
        Box::new(UnconfiguredRetriever),
    );
    TestApp { router: app(state), db }
}

async fn seed_org(app: &TestApp, org: &str, email: &str, role: &str) {
    let conn = app.db.lock().await;
    conn.execute(
        "INSERT OR IGNORE INTO organizations (id, name) VALUES (?1, ?1)",
        [org],
    )
    .unwrap();
    let hash = auth::hash_password("password123").unwrap();
    conn.execute(
        "INSERT INTO users (id, org_id, email, password_hash, role)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![format!("user-{email}"), org, email, hash, role],
    )
    .unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO locations (id, org_id, name, type)
         VALUES (?1, ?2, 'WH', 'warehouse')",
        rusqlite::params![format!("loc-{org}"), org],
    )
    .unwrap();
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

async fn login(router: &Router, email: &str) -> String {
    let (status, body) = send(
        router,
        post("/api/v1/auth/login", None, json!({"email": email, "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["access_token"].as_str().unwrap().to_string()
}

// ── Auth ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public_everything_else_is_not() {
    let app = build_app(Settings::for_tests()).await;
    let resp = app.router.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = send(&app.router, get("/api/v1/analytics", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_and_refresh_issue_usable_tokens() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;

    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/auth/login",
            None,
            json!({"email": "a@test.local", "password": "password123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let refresh_token = body["refresh_token"].as_str().unwrap();

    let (status, refreshed) = send(
        &app.router,
        post("/api/v1/auth/refresh", None, json!({"refresh_token": refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = refreshed["access_token"].as_str().unwrap();

    let (status, _) = send(&app.router, get("/api/v1/analytics?days=7", Some(access))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    let (status, _) = send(
        &app.router,
        post("/api/v1/auth/login", None, json!({"email": "a@test.local", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Org isolation ───────────────────────────────────────────────────────

#[tokio::test]
async fn org_a_token_never_sees_org_b_rows() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    seed_org(&app, "org-b", "b@test.local", "admin").await;
    {
        let conn = app.db.lock().await;
        for (org, pid, sku) in [("org-a", "p-a", "SKU-A"), ("org-b", "p-b", "SKU-B")] {
            conn.execute(
                "INSERT INTO products (id, org_id, sku, name, reorder_point)
                 VALUES (?1, ?2, ?3, ?3, 0)",
                rusqlite::params![pid, org, sku],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO inventory_movements
                     (id, product_id, location_id, quantity, movement_type, moved_at)
                 VALUES (?1, ?2, ?3, 10, 'in', datetime('now'))",
                rusqlite::params![format!("m-{pid}"), pid, format!("loc-{org}")],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO sales_daily
                     (org_id, sales_date, channel, product_name, sku, units_sold, gross_revenue,
                      gross_margin, units_7day_avg, units_30day_avg)
                 VALUES (?1, date('now'), 'online', ?2, ?2, 5, 100, 50, 2.0, 2.0)",
                rusqlite::params![org, sku],
            )
            .unwrap();
        }
    }

    let token_a = login(&app.router, "a@test.local").await;
    let (status, body) = send(
        &app.router,
        get("/api/v1/analytics/stockout-risk?days=30&velocity_strategy=latest", Some(&token_a)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r["sku"] == json!("SKU-A")));
}

// ── Feature flags & bounds ──────────────────────────────────────────────

#[tokio::test]
async fn disabled_chat_surfaces_are_forbidden() {
    let mut settings = Settings::for_tests();
    settings.chat_enabled = false;
    settings.hybrid_chat_enabled = false;
    let app = build_app(settings).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    let token = login(&app.router, "a@test.local").await;

    let (status, _) =
        send(&app.router, post("/api/v1/chat/query", Some(&token), json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        send(&app.router, post("/api/v1/chat2/query", Some(&token), json!({"message": "hi"})))
            .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn out_of_bounds_params_are_unprocessable() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    let token = login(&app.router, "a@test.local").await;

    // n above the model bound on an explicit intent
    let (status, _) = send(
        &app.router,
        post(
            "/api/v1/chat/query",
            Some(&token),
            json!({"prompt": "top", "intent": "top_skus_by_margin", "params": {"n": 51}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // horizon override outside 1..=365
    for bad in [0, 366] {
        let (status, _) = send(
            &app.router,
            get(
                &format!("/api/v1/purchasing/reorder-suggestions?horizon_days_override={bad}"),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    // analytics windows
    let (status, _) = send(&app.router, get("/api/v1/analytics?days=91", Some(&token))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = send(
        &app.router,
        get("/api/v1/analytics/stockout-risk?days=6", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ── Reorder surface ─────────────────────────────────────────────────────

async fn seed_reorder_inputs(app: &TestApp) {
    let conn = app.db.lock().await;
    conn.execute(
        "INSERT INTO suppliers (id, org_id, name, lead_time_days, minimum_order_quantity)
         VALUES ('sup-1', 'org-a', 'Supplier', 7, 25)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO products (id, org_id, sku, name, cost) VALUES ('p-moq', 'org-a', 'SKU-MOQ', 'Moq', 2.0)",
        [],
    )
    .unwrap();
    // Scenario: on_hand 2, reorder point 10, v 1.0/day, lead 7 + safety 3,
    // MOQ 25, pack 12 -> bump to 8, MOQ to 25, pack-round to 36.
    conn.execute(
        "INSERT INTO reorder_inputs
             (org_id, product_id, sku, product_name, supplier_id, supplier_name, on_hand,
              reorder_point, safety_stock_days, pack_size, max_stock_days, lead_time_days, moq,
              chosen_velocity_latest, chosen_velocity_conservative,
              velocity_source_latest, velocity_source_conservative,
              incoming_units_30d, incoming_units_60d)
         VALUES ('org-a', 'p-moq', 'SKU-MOQ', 'Moq', 'sup-1', 'Supplier', 2, 10, 3, 12, NULL, 7, 25,
                 1.0, 1.0, '7d', '7d', 0, 0)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO reorder_inputs
             (org_id, product_id, sku, product_name, supplier_id, supplier_name, on_hand,
              reorder_point, safety_stock_days, pack_size, max_stock_days, lead_time_days, moq,
              chosen_velocity_latest, chosen_velocity_conservative,
              velocity_source_latest, velocity_source_conservative,
              incoming_units_30d, incoming_units_60d)
         VALUES ('org-a', 'p-zero', 'SKU-ZERO', 'Zero', 'sup-1', 'Supplier', 20, 5, 3, 1, NULL, 7, 1,
                 0.0, 0.0, 'none', 'none', 0, 0)",
        [],
    )
    .unwrap();
}

#[tokio::test]
async fn reorder_suggestions_apply_moq_and_pack_rounding() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    seed_reorder_inputs(&app).await;
    let token = login(&app.router, "a@test.local").await;

    let (status, body) = send(
        &app.router,
        get("/api/v1/purchasing/reorder-suggestions?strategy=latest", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1, "zero-velocity product must be skipped");
    let s = &suggestions[0];
    assert_eq!(s["sku"], json!("SKU-MOQ"));
    assert_eq!(s["recommended_quantity"], json!(36));
    let reasons: Vec<&str> =
        s["reasons"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    for expected in ["BELOW_REORDER_POINT", "LEAD_TIME_RISK", "MOQ_ENFORCED", "PACK_ROUNDED"] {
        assert!(reasons.contains(&expected), "missing {expected}");
    }
    assert_eq!(body["parameters"]["strategy"], json!("latest"));
}

#[tokio::test]
async fn zero_velocity_explain_reports_skip() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    seed_reorder_inputs(&app).await;
    let token = login(&app.router, "a@test.local").await;

    let (status, body) = send(
        &app.router,
        get("/api/v1/purchasing/reorder-suggestions/explain/p-zero", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(true));
    assert!(body["skip_reason"].as_str().is_some());

    let (status, _) = send(
        &app.router,
        get("/api/v1/purchasing/reorder-suggestions/explain/nope", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn draft_po_requires_purchasing_role() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    seed_org(&app, "org-a", "v@test.local", "viewer").await;
    seed_reorder_inputs(&app).await;

    let viewer = login(&app.router, "v@test.local").await;
    let (status, _) = send(
        &app.router,
        post(
            "/api/v1/purchasing/reorder-suggestions/draft-po",
            Some(&viewer),
            json!({"product_ids": ["p-moq"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = login(&app.router, "a@test.local").await;
    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/purchasing/reorder-suggestions/draft-po",
            Some(&admin),
            json!({"product_ids": ["p-moq", "p-zero"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let drafts = body["draft_pos"].as_array().unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0]["po_number"], json!("PO-1001"));
    assert_eq!(drafts[0]["items"][0]["quantity"], json!(36));
    // 36 units at cost 2.0
    assert_eq!(drafts[0]["items"][0]["line_total"], json!(72.0));
    assert_eq!(body["summary"]["skipped_products"], json!(["p-zero"]));
}

// ── Daily alerts ────────────────────────────────────────────────────────

#[tokio::test]
async fn daily_alerts_require_cron_token_and_run_once() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;

    let (status, _) = send(
        &app.router,
        post("/api/v1/internal/run-daily-alerts", Some("wrong-token"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = "/api/v1/internal/run-daily-alerts?strategy=latest&channels=email,webhook";
    let (status, first) =
        send(&app.router, post(uri, Some("test-cron-token"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["orgs_processed"], json!(1));
    assert_eq!(first["already_ran"], json!(false));

    let (status, second) =
        send(&app.router, post(uri, Some("test-cron-token"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["orgs_processed"], json!(0));
    assert_eq!(second["already_ran"], json!(true));
    assert_eq!(second["alerts_sent_total"], json!(0));
}

// ── Degraded chat paths ─────────────────────────────────────────────────

#[tokio::test]
async fn open_chat_degrades_when_llm_is_down() {
    // LLM fallback on, but the endpoint points at a closed port.
    let mut settings = Settings::for_tests();
    settings.chat_llm_fallback_enabled = true;
    let app = build_app(settings).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    let token = login(&app.router, "a@test.local").await;

    let (status, body) = send(
        &app.router,
        post("/api/v1/chat/query", Some(&token), json!({"prompt": "how are things going?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["answer_summary"].as_str().unwrap().contains("LLM temporarily unavailable"));
    assert_eq!(body["confidence"]["level"], json!("low"));
    assert_eq!(body["warnings"], json!(["llm_unavailable"]));
}

#[tokio::test]
async fn hybrid_open_route_degrades_to_no_answer() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    let token = login(&app.router, "a@test.local").await;

    let (status, body) = send(
        &app.router,
        post("/api/v1/chat2/query", Some(&token), json!({"message": "hello there"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["route"], json!("NO_ANSWER"));
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert!(!body["follow_ups"].as_array().unwrap().is_empty());
    // Contract holds on the wire shape.
    assert!(stocksense::chat::contracts::validate_output(&body).is_ok());
}

#[tokio::test]
async fn explicit_bi_intent_answers_from_the_mart() {
    let app = build_app(Settings::for_tests()).await;
    seed_org(&app, "org-a", "a@test.local", "admin").await;
    {
        let conn = app.db.lock().await;
        conn.execute(
            "INSERT INTO products (id, org_id, sku, name) VALUES ('p-1', 'org-a', 'SKU-1', 'One')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sales_daily
                 (org_id, sales_date, channel, product_name, sku, units_sold, gross_revenue,
                  gross_margin, units_7day_avg, units_30day_avg)
             VALUES ('org-a', date('now', '-1 days'), 'online', 'One', 'SKU-1', 10, 1500, 1000, 2.0, 2.0)",
            [],
        )
        .unwrap();
    }
    let token = login(&app.router, "a@test.local").await;

    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/chat2/query",
            Some(&token),
            json!({"message": "top skus", "intent": "top_skus_by_margin"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["route"], json!("BI"));
    assert_eq!(body["provenance"]["data"]["tables"], json!(["sales_daily"]));
    let card = &body["cards"][0];
    assert_eq!(card["type"], json!("table"));
    assert_eq!(card["data"]["rows"][0]["sku"], json!("SKU-1"));
    assert!(stocksense::chat::contracts::validate_output(&body).is_ok());

    // Legacy surface answers the same seeded scenario.
    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/chat/query",
            Some(&token),
            json!({"prompt": "top skus by margin last week"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], json!("top_skus_by_margin"));
    assert_eq!(body["data"]["rows"][0]["sku"], json!("SKU-1"));
    assert_eq!(body["data"]["rows"][0]["gross_margin"], json!(1000.0));
    assert_eq!(body["confidence"]["level"], json!("high"));
    assert!(body["freshness"]["generated_at"].as_str().is_some());
}
