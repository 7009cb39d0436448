//! Chat-core integration: typed parameter validation, intent handlers
//! against a seeded in-memory database, mart fallbacks, and composer
//! contract guarantees.

use rusqlite::Connection;
use serde_json::{Map, Value, json};

use stocksense::api::db;
use stocksense::chat::composer;
use stocksense::chat::intents::{self, ALL_INTENTS, Intent, IntentParams};
use stocksense::chat::rules::resolve_intent_rules;

// ── Helpers ─────────────────────────────────────────────────────────────

fn setup() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    db::migrate(&conn).unwrap();
    db::ensure_mart(&conn, true).unwrap();
    conn.execute("INSERT INTO organizations (id, name) VALUES ('org-1', 'O')", []).unwrap();
    conn.execute(
        "INSERT INTO locations (id, org_id, name, type) VALUES ('loc-1', 'org-1', 'WH', 'warehouse')",
        [],
    )
    .unwrap();
    conn
}

fn seed_product(conn: &Connection, id: &str, sku: &str, name: &str, on_hand: i64) {
    conn.execute(
        "INSERT INTO products (id, org_id, sku, name, cost, price)
         VALUES (?1, 'org-1', ?2, ?3, 10.0, 25.0)",
        rusqlite::params![id, sku, name],
    )
    .unwrap();
    if on_hand != 0 {
        conn.execute(
            "INSERT INTO inventory_movements
                 (id, product_id, location_id, quantity, movement_type, moved_at)
             VALUES (?1, ?2, 'loc-1', ?3, 'in', datetime('now'))",
            rusqlite::params![format!("m-{id}"), id, on_hand],
        )
        .unwrap();
    }
}

fn seed_margin(conn: &Connection, sku: &str, name: &str, margin: f64, days_ago: i64) {
    conn.execute(
        "INSERT OR REPLACE INTO sales_daily
             (org_id, sales_date, channel, product_name, sku, units_sold, gross_revenue,
              gross_margin, units_7day_avg, units_30day_avg)
         VALUES ('org-1', date('now', ?1), 'online', ?2, ?3, 10, ?4, ?4, 2.0, 2.0)",
        rusqlite::params![format!("-{days_ago} days"), name, sku, margin],
    )
    .unwrap();
}

fn params_for(intent: Intent, raw: Value) -> Result<IntentParams, intents::ParamError> {
    let map: Map<String, Value> = raw.as_object().cloned().unwrap_or_default();
    IntentParams::from_value(intent, &map)
}

// ── Parameter models ────────────────────────────────────────────────────

#[test]
fn n_out_of_bounds_is_rejected() {
    assert!(params_for(Intent::TopSkusByMargin, json!({"n": 51})).is_err());
    assert!(params_for(Intent::TopSkusByMargin, json!({"n": 0})).is_err());
    assert!(params_for(Intent::TopSkusByMargin, json!({"n": 50})).is_ok());
}

#[test]
fn horizon_days_bounds_are_enforced() {
    assert!(params_for(Intent::StockoutRisk, json!({"horizon_days": 6})).is_err());
    assert!(params_for(Intent::StockoutRisk, json!({"horizon_days": 31})).is_err());
    assert!(params_for(Intent::StockoutRisk, json!({"horizon_days": 14})).is_ok());
}

#[test]
fn defaults_fill_missing_params() {
    let IntentParams::TopSkusByMargin(p) =
        params_for(Intent::TopSkusByMargin, json!({})).unwrap()
    else {
        panic!("wrong variant");
    };
    assert_eq!(p.n, 10);
    assert_eq!(p.period.days(), 7);
}

#[test]
fn unknown_period_is_rejected() {
    assert!(params_for(Intent::TopSkusByMargin, json!({"period": "90d"})).is_err());
    assert!(params_for(Intent::SlowMovers, json!({"period": "1d"})).is_err());
}

#[test]
fn every_resolved_intent_is_registered() {
    for prompt in [
        "top skus by margin last week",
        "what might run out of stock soon",
        "week in review please",
        "what should I reorder",
        "show slow movers",
        "tell me about SKU ACC-CBL-001",
        "forecast next quarter",
        "annual revenue for 2024",
    ] {
        let res = resolve_intent_rules(prompt);
        let intent = res.intent.expect(prompt);
        assert!(ALL_INTENTS.contains(&intent), "unregistered intent for {prompt}");
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

#[test]
fn top_skus_by_margin_orders_by_margin() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-1", "Product One", 10);
    seed_product(&conn, "p-2", "SKU-2", "Product Two", 10);
    seed_margin(&conn, "SKU-1", "Product One", 1000.0, 2);
    seed_margin(&conn, "SKU-2", "Product Two", 800.0, 2);

    let params = params_for(Intent::TopSkusByMargin, json!({"period": "7d"})).unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    assert_eq!(data.rows[0]["sku"], json!("SKU-1"));
    assert_eq!(data.rows[0]["gross_margin"], json!(1000.0));
    assert_eq!(data.rows[1]["sku"], json!("SKU-2"));
    assert!(!data.definition.contains("fallback"));
    assert_eq!(data.tables, vec!["sales_daily"]);
}

#[test]
fn top_skus_falls_back_to_order_items_without_mart() {
    let conn = Connection::open_in_memory().unwrap();
    db::migrate(&conn).unwrap();
    conn.execute("INSERT INTO organizations (id, name) VALUES ('org-1', 'O')", []).unwrap();
    conn.execute(
        "INSERT INTO products (id, org_id, sku, name, cost) VALUES ('p-1', 'org-1', 'SKU-1', 'One', 10.0)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO orders (id, org_id, order_number, status, ordered_at)
         VALUES ('o-1', 'org-1', 'SO-1', 'completed', datetime('now'))",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
         VALUES ('oi-1', 'o-1', 'p-1', 4, 35.0)",
        [],
    )
    .unwrap();

    let params = params_for(Intent::TopSkusByMargin, json!({})).unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    assert_eq!(data.rows.len(), 1);
    // (35 - 10) * 4
    assert_eq!(data.rows[0]["gross_margin"], json!(100.0));
    assert!(data.definition.contains("(fallback approximation)"));
}

#[test]
fn stockout_risk_handler_bands_and_sorts() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-HIGH", "High", 7);
    seed_product(&conn, "p-2", "SKU-MED", "Med", 20);
    conn.execute(
        "INSERT INTO sales_daily (org_id, sales_date, channel, product_name, sku, units_sold,
                                  gross_revenue, gross_margin, units_7day_avg, units_30day_avg)
         VALUES ('org-1', date('now'), 'online', 'High', 'SKU-HIGH', 1, 10, 5, 1.0, 1.0),
                ('org-1', date('now'), 'online', 'Med', 'SKU-MED', 1, 10, 5, 2.0, 2.0)",
        [],
    )
    .unwrap();

    let params = params_for(Intent::StockoutRisk, json!({"horizon_days": 14})).unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    // 7/1.0 = 7.0 -> high first; 20/2.0 = 10 -> medium second.
    assert_eq!(data.rows[0]["sku"], json!("SKU-HIGH"));
    assert_eq!(data.rows[0]["risk_level"], json!("high"));
    assert_eq!(data.rows[0]["days_to_stockout"], json!(7.0));
    assert_eq!(data.rows[1]["risk_level"], json!("medium"));
}

#[test]
fn stockout_risk_respects_horizon_filter() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-FAR", "Far", 100);
    conn.execute(
        "INSERT INTO sales_daily (org_id, sales_date, channel, product_name, sku, units_sold,
                                  gross_revenue, gross_margin, units_7day_avg, units_30day_avg)
         VALUES ('org-1', date('now'), 'online', 'Far', 'SKU-FAR', 1, 10, 5, 1.0, 1.0)",
        [],
    )
    .unwrap();
    let params = params_for(Intent::StockoutRisk, json!({"horizon_days": 30})).unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    assert!(data.rows.is_empty()); // 100 days out is beyond any horizon
}

#[test]
fn slow_movers_sorts_ascending_by_sales() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-DEAD", "Dead", 50);
    seed_product(&conn, "p-2", "SKU-SLOW", "Slow", 30);
    seed_product(&conn, "p-3", "SKU-NONE", "NoStock", 0);
    seed_margin(&conn, "SKU-SLOW", "Slow", 40.0, 3);

    let params = params_for(Intent::SlowMovers, json!({"period": "30d", "n": 10})).unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    // Only products with stock; zero-sales first, by on-hand descending.
    assert_eq!(data.rows.len(), 2);
    assert_eq!(data.rows[0]["sku"], json!("SKU-DEAD"));
    assert_eq!(data.rows[0]["units_sold_period"], json!(0));
    assert_eq!(data.rows[1]["sku"], json!("SKU-SLOW"));
}

#[test]
fn product_detail_looks_up_by_sku_or_name() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-1", "Fancy Gadget", 12);
    seed_margin(&conn, "SKU-1", "Fancy Gadget", 90.0, 2);

    let by_sku = intents::execute(
        &params_for(Intent::ProductDetail, json!({"sku": "SKU-1"})).unwrap(),
        &conn,
        "org-1",
    )
    .unwrap();
    assert_eq!(by_sku.rows[0]["on_hand"], json!(12.0));
    assert_eq!(by_sku.rows[0]["units_sold_30d"], json!(10));

    let by_name = intents::execute(
        &params_for(Intent::ProductDetail, json!({"name": "fancy gadget"})).unwrap(),
        &conn,
        "org-1",
    )
    .unwrap();
    assert_eq!(by_name.rows[0]["sku"], json!("SKU-1"));

    let missing = intents::execute(
        &params_for(Intent::ProductDetail, json!({"sku": "NOPE"})).unwrap(),
        &conn,
        "org-1",
    )
    .unwrap();
    assert!(missing.rows.is_empty());
    assert!(missing.definition.contains("not found"));

    let no_filter = intents::execute(
        &params_for(Intent::ProductDetail, json!({})).unwrap(),
        &conn,
        "org-1",
    )
    .unwrap();
    assert!(no_filter.definition.contains("Provide sku or name"));
}

#[test]
fn annual_breakdown_computes_margin_percentage() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-1", "One", 5);
    let year = chrono::Utc::now().format("%Y").to_string();
    conn.execute(
        "INSERT INTO sales_daily (org_id, sales_date, channel, product_name, sku, units_sold,
                                  gross_revenue, gross_margin, units_7day_avg, units_30day_avg)
         VALUES ('org-1', ?1, 'online', 'One', 'SKU-1', 10, 200.0, 50.0, 1.0, 1.0)",
        [format!("{year}-02-10")],
    )
    .unwrap();

    let params = params_for(
        Intent::AnnualBreakdown,
        json!({"target_year": year.parse::<i64>().unwrap()}),
    )
    .unwrap();
    let data = intents::execute(&params, &conn, "org-1").unwrap();
    assert_eq!(data.rows.len(), 1);
    assert_eq!(data.rows[0]["quarter"], json!("Q1"));
    assert_eq!(data.rows[0]["margin_percentage"], json!(25.0));
}

#[test]
fn handlers_are_org_scoped() {
    let conn = setup();
    conn.execute("INSERT INTO organizations (id, name) VALUES ('org-2', 'Other')", []).unwrap();
    seed_product(&conn, "p-1", "SKU-1", "Mine", 10);
    seed_margin(&conn, "SKU-1", "Mine", 500.0, 2);
    conn.execute(
        "INSERT INTO products (id, org_id, sku, name) VALUES ('p-x', 'org-2', 'SKU-X', 'Theirs')",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT OR REPLACE INTO sales_daily
             (org_id, sales_date, channel, product_name, sku, units_sold, gross_revenue,
              gross_margin, units_7day_avg, units_30day_avg)
         VALUES ('org-2', date('now'), 'online', 'Theirs', 'SKU-X', 10, 9999.0, 9999.0, 1.0, 1.0)",
        [],
    )
    .unwrap();

    for (intent, raw) in [
        (Intent::TopSkusByMargin, json!({})),
        (Intent::StockoutRisk, json!({})),
        (Intent::WeekInReview, json!({})),
        (Intent::SlowMovers, json!({})),
        (Intent::ReorderSuggestions, json!({})),
    ] {
        let data =
            intents::execute(&params_for(intent, raw).unwrap(), &conn, "org-1").unwrap();
        for row in &data.rows {
            let sku = row.get("sku").and_then(Value::as_str);
            assert_ne!(sku, Some("SKU-X"), "{:?} leaked another org's row", intent);
        }
    }
}

// ── Composer contract ───────────────────────────────────────────────────

#[test]
fn bi_composition_validates_and_carries_provenance() {
    let conn = setup();
    seed_product(&conn, "p-1", "SKU-1", "One", 10);
    seed_margin(&conn, "SKU-1", "One", 100.0, 2);
    let data = intents::execute(
        &params_for(Intent::TopSkusByMargin, json!({})).unwrap(),
        &conn,
        "org-1",
    )
    .unwrap();

    let resp = composer::compose_bi(&data, "summary".into(), "top_skus_by_margin", 0.8).unwrap();
    assert_eq!(resp.route, "BI");
    assert_eq!(resp.provenance.data.tables, vec!["sales_daily"]);

    // Re-validating the serialized object succeeds.
    let value = serde_json::to_value(&resp).unwrap();
    assert!(stocksense::chat::contracts::validate_output(&value).is_ok());
}
