//! Purchase-suggestion engine.
//!
//! Computes per-product replenishment recommendations from the
//! `reorder_inputs` mart: velocity selection, horizon, demand forecast,
//! incoming coverage, then the adjustment chain (reorder bump, MOQ, pack
//! rounding, max-stock cap) and guardrails. Every surviving suggestion
//! carries machine reason tags, human adjustment strings, and a full
//! explanation of inputs and intermediate values.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::model::{PurchaseOrderStatus, VelocityStrategy};

// Machine-readable reason tags.
pub const BELOW_REORDER_POINT: &str = "BELOW_REORDER_POINT";
pub const LEAD_TIME_RISK: &str = "LEAD_TIME_RISK";
pub const INCOMING_COVERAGE: &str = "INCOMING_COVERAGE";
pub const MOQ_ENFORCED: &str = "MOQ_ENFORCED";
pub const PACK_ROUNDED: &str = "PACK_ROUNDED";
pub const CAPPED_BY_MAX_DAYS: &str = "CAPPED_BY_MAX_DAYS";
pub const ZERO_VELOCITY_SKIPPED: &str = "ZERO_VELOCITY_SKIPPED";
pub const NO_VELOCITY: &str = "NO_VELOCITY";

/// One row of the precomputed reorder-inputs mart.
#[derive(Debug, Clone)]
pub struct ReorderInputs {
    pub product_id: String,
    pub sku: String,
    pub product_name: String,
    pub supplier_id: Option<String>,
    pub supplier_name: Option<String>,
    pub on_hand: i64,
    pub reorder_point: i64,
    pub safety_stock_days: i64,
    pub pack_size: i64,
    pub max_stock_days: Option<i64>,
    pub lead_time_days: i64,
    pub moq: i64,
    pub chosen_velocity_latest: f64,
    pub chosen_velocity_conservative: f64,
    pub velocity_source_latest: String,
    pub velocity_source_conservative: String,
    pub incoming_units_30d: i64,
    pub incoming_units_60d: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplanationInputs {
    pub on_hand: i64,
    pub incoming_units_within_horizon: i64,
    pub chosen_velocity: f64,
    pub lead_time_days: i64,
    pub safety_stock_days: i64,
    pub horizon_days: i64,
    pub reorder_point: i64,
    pub moq: i64,
    pub pack_size: i64,
    pub max_stock_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplanationCalcs {
    pub demand_forecast_units: f64,
    pub net_available_after_incoming: i64,
    pub raw_shortfall: f64,
    pub recommended_base: f64,
    pub final_quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub inputs: ExplanationInputs,
    pub calculations: ExplanationCalcs,
    pub logic_path: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorderSuggestion {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub supplier_id: Option<String>,
    pub supplier_name: Option<String>,
    pub on_hand: i64,
    pub incoming: i64,
    pub days_cover_current: Option<f64>,
    pub days_cover_after: Option<f64>,
    pub recommended_quantity: i64,
    pub chosen_velocity: Option<f64>,
    pub velocity_source: String,
    pub horizon_days: i64,
    pub demand_forecast_units: f64,
    pub reasons: Vec<String>,
    pub adjustments: Vec<String>,
    pub explanation: Explanation,
}

/// Core per-product algorithm. Returns `None` when the product is
/// guarded out (zero velocity at or above reorder point, or a final
/// quantity below one without MOQ enforcement).
pub fn compute_suggestion(
    row: &ReorderInputs,
    strategy: VelocityStrategy,
    horizon_days_override: Option<i64>,
) -> Option<ReorderSuggestion> {
    let on_hand = row.on_hand;
    let reorder_point = row.reorder_point;
    let pack_size = row.pack_size.max(1);
    let moq = row.moq.max(1);

    // 1. Velocity by strategy (preselected per strategy in the mart).
    let (chosen_velocity, velocity_source) = match strategy {
        VelocityStrategy::Conservative => (
            row.chosen_velocity_conservative,
            row.velocity_source_conservative.clone(),
        ),
        VelocityStrategy::Latest => {
            (row.chosen_velocity_latest, row.velocity_source_latest.clone())
        }
    };

    // 2. Horizon.
    let horizon_days = match horizon_days_override {
        Some(o) => o.max(7),
        None => (row.lead_time_days + row.safety_stock_days).max(7),
    };

    // 3. Demand forecast over the horizon.
    let demand_forecast_units = chosen_velocity * horizon_days as f64;

    // 4. Incoming units within the horizon.
    let incoming = if horizon_days <= 30 {
        row.incoming_units_30d
    } else {
        row.incoming_units_60d
    };

    // 5. Raw shortfall.
    let net_available = on_hand + incoming;
    let raw_shortfall = demand_forecast_units - net_available as f64;
    let recommended_base = raw_shortfall.max(0.0);

    let mut reasons: Vec<String> = Vec::new();
    let mut adjustments: Vec<String> = Vec::new();
    let mut final_quantity = recommended_base;

    // 6a. Reorder bump.
    if on_hand < reorder_point {
        let bump = (reorder_point - on_hand).max(0) as f64;
        if bump > final_quantity {
            final_quantity = bump;
            adjustments.push(format!("Bumped to reorder point: {} units", bump as i64));
        }
        reasons.push(BELOW_REORDER_POINT.into());
    }

    if raw_shortfall > 0.0 {
        reasons.push(LEAD_TIME_RISK.into());
    }
    if incoming > 0 {
        reasons.push(INCOMING_COVERAGE.into());
    }

    // 6b. MOQ enforcement.
    if final_quantity > 0.0 && final_quantity < moq as f64 {
        final_quantity = moq as f64;
        adjustments.push(format!("Raised to MOQ: {moq} units"));
        reasons.push(MOQ_ENFORCED.into());
    }

    // 6c. Pack rounding.
    if final_quantity > 0.0 && pack_size > 1 {
        let rounded = (final_quantity / pack_size as f64).ceil() * pack_size as f64;
        if rounded != final_quantity {
            adjustments.push(format!(
                "Rounded to pack size {pack_size}: {} -> {}",
                final_quantity as i64, rounded as i64
            ));
            final_quantity = rounded;
            reasons.push(PACK_ROUNDED.into());
        }
    }

    // 6d. Max-stock cap.
    if let Some(max_days) = row.max_stock_days {
        if chosen_velocity > 0.0 {
            let max_units = chosen_velocity * max_days as f64;
            let total_after = net_available as f64 + final_quantity;
            if total_after > max_units {
                let capped = (max_units - net_available as f64).max(0.0);
                if capped != final_quantity {
                    adjustments.push(format!(
                        "Capped by max stock days {max_days}: {} -> {}",
                        final_quantity as i64, capped as i64
                    ));
                    final_quantity = capped;
                    reasons.push(CAPPED_BY_MAX_DAYS.into());
                }
            }
        }
    }

    // 7a. Zero-velocity guardrail.
    if chosen_velocity == 0.0 {
        if on_hand >= reorder_point {
            return None;
        }
        reasons.push(NO_VELOCITY.into());
    }

    // 7b. Minimum-quantity guardrail.
    if final_quantity < 1.0 && !reasons.iter().any(|r| r == MOQ_ENFORCED) {
        return None;
    }

    let days_cover_current =
        (chosen_velocity > 0.0).then(|| on_hand as f64 / chosen_velocity);
    let days_cover_after = (chosen_velocity > 0.0)
        .then(|| (net_available as f64 + final_quantity) / chosen_velocity);

    let final_int = final_quantity as i64;
    let explanation = Explanation {
        inputs: ExplanationInputs {
            on_hand,
            incoming_units_within_horizon: incoming,
            chosen_velocity,
            lead_time_days: row.lead_time_days,
            safety_stock_days: row.safety_stock_days,
            horizon_days,
            reorder_point,
            moq,
            pack_size,
            max_stock_days: row.max_stock_days,
        },
        calculations: ExplanationCalcs {
            demand_forecast_units,
            net_available_after_incoming: net_available,
            raw_shortfall,
            recommended_base,
            final_quantity: final_int,
        },
        logic_path: adjustments.clone(),
    };

    Some(ReorderSuggestion {
        product_id: row.product_id.clone(),
        sku: row.sku.clone(),
        name: row.product_name.clone(),
        supplier_id: row.supplier_id.clone(),
        supplier_name: row.supplier_name.clone(),
        on_hand,
        incoming,
        days_cover_current,
        days_cover_after,
        recommended_quantity: final_int,
        chosen_velocity: (chosen_velocity > 0.0).then_some(chosen_velocity),
        velocity_source,
        horizon_days,
        demand_forecast_units,
        reasons,
        adjustments,
        explanation,
    })
}

// ── Mart access ─────────────────────────────────────────────────────────

const INPUT_COLUMNS: &str = "product_id, sku, product_name, supplier_id, supplier_name, on_hand,
    reorder_point, safety_stock_days, pack_size, max_stock_days, lead_time_days, moq,
    chosen_velocity_latest, chosen_velocity_conservative,
    velocity_source_latest, velocity_source_conservative,
    incoming_units_30d, incoming_units_60d";

fn row_to_inputs(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReorderInputs> {
    Ok(ReorderInputs {
        product_id: row.get(0)?,
        sku: row.get(1)?,
        product_name: row.get(2)?,
        supplier_id: row.get(3)?,
        supplier_name: row.get(4)?,
        on_hand: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        reorder_point: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        safety_stock_days: row.get::<_, Option<i64>>(7)?.unwrap_or(3),
        pack_size: row.get::<_, Option<i64>>(8)?.unwrap_or(1).max(1),
        max_stock_days: row.get(9)?,
        lead_time_days: row.get::<_, Option<i64>>(10)?.unwrap_or(7),
        moq: row.get::<_, Option<i64>>(11)?.unwrap_or(1).max(1),
        chosen_velocity_latest: row.get::<_, Option<f64>>(12)?.unwrap_or(0.0),
        chosen_velocity_conservative: row.get::<_, Option<f64>>(13)?.unwrap_or(0.0),
        velocity_source_latest: row
            .get::<_, Option<String>>(14)?
            .unwrap_or_else(|| "none".into()),
        velocity_source_conservative: row
            .get::<_, Option<String>>(15)?
            .unwrap_or_else(|| "none".into()),
        incoming_units_30d: row.get::<_, Option<i64>>(16)?.unwrap_or(0),
        incoming_units_60d: row.get::<_, Option<i64>>(17)?.unwrap_or(0),
    })
}

pub fn load_inputs(conn: &Connection, org_id: &str) -> Result<Vec<ReorderInputs>> {
    let sql = format!(
        "SELECT {INPUT_COLUMNS} FROM reorder_inputs WHERE org_id = ?1 ORDER BY product_name"
    );
    let mut stmt = conn.prepare(&sql).context("reorder_inputs mart unavailable")?;
    let rows = stmt
        .query_map([org_id], |row| row_to_inputs(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn load_input(
    conn: &Connection,
    org_id: &str,
    product_id: &str,
) -> Result<Option<ReorderInputs>> {
    let sql = format!(
        "SELECT {INPUT_COLUMNS} FROM reorder_inputs
         WHERE org_id = ?1 AND product_id = ?2 LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql).context("reorder_inputs mart unavailable")?;
    let mut rows = stmt.query_map([org_id, product_id], |row| row_to_inputs(row))?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Run the engine for every product in the org.
pub fn compute_reorder_suggestions(
    conn: &Connection,
    org_id: &str,
    strategy: VelocityStrategy,
    horizon_days_override: Option<i64>,
) -> Result<Vec<ReorderSuggestion>> {
    let inputs = load_inputs(conn, org_id)?;
    Ok(inputs
        .iter()
        .filter_map(|row| compute_suggestion(row, strategy, horizon_days_override))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorderExplanation {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<ReorderSuggestion>,
}

/// Detailed explanation for one product; skipped products still get an
/// answer with the skip reason.
pub fn explain_reorder_suggestion(
    conn: &Connection,
    org_id: &str,
    product_id: &str,
    strategy: VelocityStrategy,
    horizon_days_override: Option<i64>,
) -> Result<Option<ReorderExplanation>> {
    let Some(row) = load_input(conn, org_id, product_id)? else {
        return Ok(None);
    };
    match compute_suggestion(&row, strategy, horizon_days_override) {
        Some(suggestion) => Ok(Some(ReorderExplanation {
            product_id: row.product_id,
            sku: row.sku,
            name: row.product_name,
            skipped: false,
            skip_reason: None,
            suggestion: Some(suggestion),
        })),
        None => Ok(Some(ReorderExplanation {
            product_id: row.product_id,
            sku: row.sku,
            name: row.product_name,
            skipped: true,
            skip_reason: Some(
                "Zero velocity and above reorder point, or final quantity < 1".into(),
            ),
            suggestion: None,
        })),
    }
}

// ── Draft purchase orders ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DraftPoItem {
    pub product_id: String,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_cost: Option<f64>,
    pub line_total: Option<f64>,
    pub on_hand: i64,
    pub recommended_quantity: i64,
    pub reasons: Vec<String>,
    pub adjustments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftPo {
    pub id: String,
    pub supplier_id: String,
    pub supplier_name: String,
    pub po_number: String,
    pub items: Vec<DraftPoItem>,
    pub total_items: i64,
    pub total_quantity: i64,
    pub estimated_total: Option<f64>,
    pub lead_time_days: i64,
    pub minimum_order_quantity: i64,
    pub payment_terms: Option<String>,
    pub created_at: String,
    pub expected_delivery: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftPoSummary {
    pub draft_count: i64,
    pub total_line_items: i64,
    pub total_units: i64,
    pub skipped_products: Vec<String>,
}

/// Next sequential PO number for the org (`PO-1001`, `PO-1002`, ...).
pub fn generate_po_number(conn: &Connection, org_id: &str) -> Result<String> {
    let last: Option<String> = conn
        .query_row(
            "SELECT po_number FROM purchase_orders
             WHERE org_id = ?1 ORDER BY created_at DESC, po_number DESC LIMIT 1",
            [org_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(last) = last {
        if let Some(num) = last.strip_prefix("PO-").and_then(|n| n.parse::<i64>().ok()) {
            return Ok(format!("PO-{:04}", num + 1));
        }
    }
    Ok("PO-1001".into())
}

/// Group suggestions for the selected products into per-supplier draft
/// POs and persist them (status `draft`) with their line items.
pub fn build_draft_pos(
    conn: &mut Connection,
    org_id: &str,
    product_ids: &[String],
    strategy: VelocityStrategy,
    horizon_days_override: Option<i64>,
    auto_number: bool,
    created_by: Option<&str>,
) -> Result<(Vec<DraftPo>, DraftPoSummary)> {
    let mut by_supplier: Vec<(String, String, Vec<ReorderSuggestion>)> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();

    for product_id in product_ids {
        let Some(row) = load_input(conn, org_id, product_id)? else {
            skipped.push(product_id.clone());
            continue;
        };
        let Some(suggestion) = compute_suggestion(&row, strategy, horizon_days_override) else {
            skipped.push(product_id.clone());
            continue;
        };
        let (Some(supplier_id), Some(supplier_name)) =
            (suggestion.supplier_id.clone(), suggestion.supplier_name.clone())
        else {
            skipped.push(product_id.clone());
            continue;
        };
        match by_supplier.iter_mut().find(|(id, _, _)| *id == supplier_id) {
            Some((_, _, bucket)) => bucket.push(suggestion),
            None => by_supplier.push((supplier_id, supplier_name, vec![suggestion])),
        }
    }

    let now = Utc::now();
    let mut drafts: Vec<DraftPo> = Vec::new();
    let mut next_number = generate_po_number(conn, org_id)?
        .strip_prefix("PO-")
        .and_then(|n| n.parse::<i64>().ok())
        .unwrap_or(1001);

    let tx = conn.transaction()?;
    for (supplier_id, supplier_name, suggestions) in by_supplier {
        let (lead_time_days, minimum_order_quantity, payment_terms): (i64, i64, Option<String>) =
            tx.query_row(
                "SELECT lead_time_days, minimum_order_quantity, payment_terms
                 FROM suppliers WHERE id = ?1 AND org_id = ?2",
                rusqlite::params![supplier_id, org_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap_or((7, 1, None));

        let po_number = if auto_number {
            let n = format!("PO-{next_number:04}");
            next_number += 1;
            n
        } else {
            format!("DRAFT-{}", Uuid::new_v4())
        };

        let mut items: Vec<DraftPoItem> = Vec::new();
        let mut estimated_total: Option<f64> = None;
        for s in &suggestions {
            let unit_cost: Option<f64> = tx
                .query_row(
                    "SELECT cost FROM products WHERE id = ?1 AND org_id = ?2",
                    rusqlite::params![s.product_id, org_id],
                    |row| row.get(0),
                )
                .unwrap_or(None);
            let line_total = unit_cost.map(|c| c * s.recommended_quantity as f64);
            if let Some(lt) = line_total {
                estimated_total = Some(estimated_total.unwrap_or(0.0) + lt);
            }
            items.push(DraftPoItem {
                product_id: s.product_id.clone(),
                sku: s.sku.clone(),
                product_name: s.name.clone(),
                quantity: s.recommended_quantity,
                unit_cost,
                line_total,
                on_hand: s.on_hand,
                recommended_quantity: s.recommended_quantity,
                reasons: s.reasons.clone(),
                adjustments: s.adjustments.clone(),
            });
        }

        let expected_delivery = now + Duration::days(lead_time_days);
        let po_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO purchase_orders
                 (id, org_id, supplier_id, po_number, status, expected_date, total_amount,
                  created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                po_id,
                org_id,
                supplier_id,
                po_number,
                PurchaseOrderStatus::Draft.as_str(),
                expected_delivery.to_rfc3339(),
                estimated_total.unwrap_or(0.0),
                created_by,
                now.to_rfc3339(),
            ],
        )?;
        for item in &items {
            tx.execute(
                "INSERT INTO purchase_order_items
                     (id, purchase_order_id, product_id, quantity, unit_cost, total_cost,
                      received_quantity, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    po_id,
                    item.product_id,
                    item.quantity,
                    item.unit_cost.unwrap_or(0.0),
                    item.line_total.unwrap_or(0.0),
                    now.to_rfc3339(),
                ],
            )?;
        }

        let total_quantity = items.iter().map(|i| i.quantity).sum();
        drafts.push(DraftPo {
            id: po_id,
            supplier_id,
            supplier_name,
            po_number,
            total_items: items.len() as i64,
            total_quantity,
            estimated_total,
            items,
            lead_time_days,
            minimum_order_quantity,
            payment_terms,
            created_at: now.to_rfc3339(),
            expected_delivery: expected_delivery.to_rfc3339(),
        });
    }
    tx.commit()?;

    let summary = DraftPoSummary {
        draft_count: drafts.len() as i64,
        total_line_items: drafts.iter().map(|d| d.total_items).sum(),
        total_units: drafts.iter().map(|d| d.total_quantity).sum(),
        skipped_products: skipped,
    };
    Ok((drafts, summary))
}
