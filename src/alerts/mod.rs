//! Daily stockout alerting: per-org digest generation (velocity + risk
//! bands), at-most-once-per-day idempotency, and channel fan-out.

pub mod notify;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::mart;
use crate::model::{RiskBand, VelocityStrategy, risk::choose_velocity};

// ── Digest (C7) ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StockoutItem {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub on_hand: f64,
    pub reorder_point: Option<i64>,
    pub velocity_7d: Option<f64>,
    pub velocity_30d: Option<f64>,
    pub velocity_56d: Option<f64>,
    pub chosen_velocity: Option<f64>,
    pub velocity_source: String,
    pub days_to_stockout: Option<f64>,
    pub risk_level: RiskBand,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyDigest {
    pub org_id: String,
    pub run_date: NaiveDate,
    pub strategy: VelocityStrategy,
    pub high: Vec<StockoutItem>,
    pub medium: Vec<StockoutItem>,
    pub counts: DigestCounts,
    pub top_soonest: Vec<StockoutItem>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DigestCounts {
    pub high: usize,
    pub medium: usize,
}

/// Build the stockout digest for one org: derived on-hand joined with the
/// mart's rolling velocities, risk-banded and bucketed. The mart may be
/// missing its 56-day column or be absent entirely; both degrade to the
/// windows that exist.
pub fn generate_daily_stockout_digest(
    conn: &Connection,
    org_id: &str,
    strategy: VelocityStrategy,
) -> Result<DailyDigest> {
    let stock = mart::on_hand_rows(conn, org_id)?;
    let velocities = match mart::velocity_map(conn, org_id, 60) {
        Ok(map) => map,
        Err(e) => {
            warn!(org_id, error = %e, "sales_daily mart unavailable for digest");
            Default::default()
        }
    };

    let mut high: Vec<StockoutItem> = Vec::new();
    let mut medium: Vec<StockoutItem> = Vec::new();

    for s in &stock {
        let vel = velocities.get(&s.sku).copied().unwrap_or_default();
        let (chosen, source) = choose_velocity(strategy, vel.v7, vel.v30, vel.v56);

        let days_to_stockout = chosen.map(|v| s.on_hand / v.max(1e-6));
        let band = days_to_stockout
            .map(RiskBand::from_days)
            .unwrap_or(RiskBand::None)
            .with_reorder_bump(s.on_hand, s.reorder_point);

        let item = StockoutItem {
            product_id: s.product_id.clone(),
            sku: s.sku.clone(),
            name: s.name.clone(),
            on_hand: s.on_hand,
            reorder_point: s.reorder_point,
            velocity_7d: vel.v7,
            velocity_30d: vel.v30,
            velocity_56d: vel.v56,
            chosen_velocity: chosen,
            velocity_source: source.into(),
            days_to_stockout: days_to_stockout.map(|d| (d * 10.0).round() / 10.0),
            risk_level: band,
        };

        match band {
            RiskBand::High => high.push(item),
            RiskBand::Medium
                if item.days_to_stockout.is_none_or(|d| d <= 14.0) =>
            {
                medium.push(item)
            }
            _ => {}
        }
    }

    let sort_key = |i: &StockoutItem| i.days_to_stockout.unwrap_or(9999.0);
    high.sort_by(|a, b| sort_key(a).total_cmp(&sort_key(b)));
    medium.sort_by(|a, b| sort_key(a).total_cmp(&sort_key(b)));

    let mut combined: Vec<StockoutItem> = high.iter().chain(medium.iter()).cloned().collect();
    combined.sort_by(|a, b| sort_key(a).total_cmp(&sort_key(b)));
    combined.truncate(5);

    Ok(DailyDigest {
        org_id: org_id.to_string(),
        run_date: Utc::now().date_naive(),
        strategy,
        counts: DigestCounts { high: high.len(), medium: medium.len() },
        high,
        medium,
        top_soonest: combined,
    })
}

// ── Idempotency (C8) ────────────────────────────────────────────────────

pub fn idempotency_key(org_id: &str, run_date: NaiveDate) -> String {
    format!("alerts:daily:{org_id}:{}", run_date.format("%Y%m%d"))
}

/// Check-and-set store keyed by the daily idempotency key. Returns `true`
/// when the key was already marked (the caller skips the org).
#[async_trait]
pub trait IdemStore: Send + Sync {
    async fn check_and_set(&self, key: &str) -> bool;
}

/// Process-local store; suitable for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryIdemStore {
    keys: std::sync::Mutex<HashSet<String>>,
}

#[async_trait]
impl IdemStore for MemoryIdemStore {
    async fn check_and_set(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|p| p.into_inner());
        !keys.insert(key.to_string())
    }
}

/// Durable store backed by the `alert_runs` table. Entries expire after
/// the TTL so the table does not grow unbounded.
pub struct SqliteIdemStore {
    db: crate::api::db::Db,
    ttl_hours: i64,
}

impl SqliteIdemStore {
    pub fn new(db: crate::api::db::Db) -> Self {
        Self { db, ttl_hours: 48 }
    }
}

#[async_trait]
impl IdemStore for SqliteIdemStore {
    async fn check_and_set(&self, key: &str) -> bool {
        let conn = self.db.lock().await;
        let now = Utc::now();
        let expires = now + chrono::Duration::hours(self.ttl_hours);
        let _ = conn.execute("DELETE FROM alert_runs WHERE expires_at < ?1", [now.to_rfc3339()]);
        match conn.execute(
            "INSERT OR IGNORE INTO alert_runs (key, marked_at, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, now.to_rfc3339(), expires.to_rfc3339()],
        ) {
            Ok(inserted) => inserted == 0,
            Err(e) => {
                warn!(key, error = %e, "idempotency mark failed; treating as already run");
                true
            }
        }
    }
}

// ── Orchestration (C8) ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OrgAlertResult {
    pub org_id: String,
    pub counts: DigestCounts,
    pub channels: Vec<notify::ChannelResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRunReport {
    pub date: NaiveDate,
    pub orgs_processed: usize,
    pub alerts_sent_total: usize,
    pub per_org: Vec<OrgAlertResult>,
    pub already_ran: bool,
}

/// One scheduler tick: walk every org, skip those already marked for the
/// day, otherwise digest and fan out to the requested channels. A failing
/// org is logged and does not abort the run.
pub async fn run_daily_alerts(
    db: &crate::api::db::Db,
    idem: &dyn IdemStore,
    settings: &crate::config::Settings,
    strategy: VelocityStrategy,
    channels: &[String],
) -> Result<AlertRunReport> {
    let org_ids: Vec<String> = {
        let conn = db.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM organizations")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };

    let run_date = Utc::now().date_naive();
    let mut per_org: Vec<OrgAlertResult> = Vec::new();
    let mut alerts_sent = 0usize;

    for org_id in org_ids {
        let key = idempotency_key(&org_id, run_date);
        if idem.check_and_set(&key).await {
            continue;
        }

        let digest = {
            let conn = db.lock().await;
            match generate_daily_stockout_digest(&conn, &org_id, strategy) {
                Ok(d) => d,
                Err(e) => {
                    warn!(org_id, error = %e, "digest generation failed");
                    continue;
                }
            }
        };

        let results = notify::dispatch_digest(&digest, channels, settings).await;
        alerts_sent += results.iter().filter(|r| r.delivered).count();
        info!(
            org_id,
            high = digest.counts.high,
            medium = digest.counts.medium,
            "daily stockout digest dispatched"
        );
        per_org.push(OrgAlertResult {
            org_id,
            counts: digest.counts,
            channels: results,
        });
    }

    Ok(AlertRunReport {
        date: run_date,
        orgs_processed: per_org.len(),
        alerts_sent_total: alerts_sent,
        already_ran: per_org.is_empty(),
        per_org,
    })
}

impl DailyDigest {
    /// Compact JSON payload for webhook delivery.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({ "digest": self })
    }

    /// Subject + body for the email channel.
    pub fn render_email(&self) -> (String, String) {
        let subject = format!(
            "Stockout Digest {} (H:{} M:{})",
            self.run_date, self.counts.high, self.counts.medium
        );
        let mut lines = vec![subject.clone(), format!("Strategy: {}", self.strategy.as_str())];
        for item in &self.top_soonest {
            lines.push(format!(
                "{} {} on_hand={} days={} src={}",
                item.sku,
                item.name,
                item.on_hand,
                item.days_to_stockout.map_or("-".into(), |d| d.to_string()),
                item.velocity_source
            ));
        }
        (subject, lines.join("\n"))
    }
}
