//! Demo tenant seeding: core rows plus the mart tables the external
//! analytics pipeline would normally maintain.

use anyhow::Result;
use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::Connection;
use uuid::Uuid;

use crate::api::db;
use crate::model::MovementType;

pub struct SeededOrg {
    pub org_id: String,
    pub admin_email: String,
    pub admin_password: String,
}

struct ProductSpec {
    sku: &'static str,
    name: &'static str,
    category: &'static str,
    cost: f64,
    price: f64,
    reorder_point: i64,
    pack_size: i64,
    moq: i64,
    daily_velocity: f64,
    opening_stock: i64,
}

const PRODUCTS: &[ProductSpec] = &[
    ProductSpec {
        sku: "APPL-IPH-001",
        name: "iPhone 15 Pro",
        category: "Phones",
        cost: 900.0,
        price: 1199.0,
        reorder_point: 20,
        pack_size: 1,
        moq: 5,
        daily_velocity: 4.0,
        opening_stock: 120,
    },
    ProductSpec {
        sku: "APPL-MBP-001",
        name: "MacBook Pro 14",
        category: "Laptops",
        cost: 1700.0,
        price: 2199.0,
        reorder_point: 10,
        pack_size: 1,
        moq: 2,
        daily_velocity: 1.5,
        opening_stock: 45,
    },
    ProductSpec {
        sku: "ACC-CASE-001",
        name: "Silicone Case",
        category: "Accessories",
        cost: 8.0,
        price: 29.0,
        reorder_point: 50,
        pack_size: 12,
        moq: 24,
        daily_velocity: 11.0,
        opening_stock: 400,
    },
    ProductSpec {
        sku: "ACC-CBL-001",
        name: "USB-C Cable 2m",
        category: "Accessories",
        cost: 3.0,
        price: 15.0,
        reorder_point: 80,
        pack_size: 20,
        moq: 40,
        daily_velocity: 18.0,
        opening_stock: 600,
    },
    ProductSpec {
        sku: "AUD-HDP-001",
        name: "Over-Ear Headphones",
        category: "Audio",
        cost: 120.0,
        price: 249.0,
        reorder_point: 15,
        pack_size: 4,
        moq: 8,
        daily_velocity: 0.0,
        opening_stock: 60,
    },
];

pub fn seed_demo_org(conn: &Connection) -> Result<SeededOrg> {
    db::ensure_mart(conn, true)?;

    let org_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO organizations (id, name) VALUES (?1, ?2)",
        rusqlite::params![org_id, "TechFlow Demo"],
    )?;

    let admin_email = "admin@techflow.demo".to_string();
    let admin_password = "demo-password".to_string();
    let password_hash = crate::api::auth::hash_password(&admin_password)?;
    conn.execute(
        "INSERT INTO users (id, org_id, email, password_hash, role) VALUES (?1, ?2, ?3, ?4, 'admin')",
        rusqlite::params![Uuid::new_v4().to_string(), org_id, admin_email, password_hash],
    )?;

    let warehouse_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO locations (id, org_id, name, type) VALUES (?1, ?2, 'Main Warehouse', 'warehouse')",
        rusqlite::params![warehouse_id, org_id],
    )?;
    conn.execute(
        "INSERT INTO locations (id, org_id, name, type) VALUES (?1, ?2, 'Downtown Store', 'store')",
        rusqlite::params![Uuid::new_v4().to_string(), org_id],
    )?;

    let supplier_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO suppliers (id, org_id, name, lead_time_days, minimum_order_quantity, payment_terms)
         VALUES (?1, ?2, 'Pacific Components', 7, 5, 'NET 30')",
        rusqlite::params![supplier_id, org_id],
    )?;

    let mut rng = rand::rng();
    let now = Utc::now();

    for spec in PRODUCTS {
        let product_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO products
                 (id, org_id, sku, name, category, cost, price, reorder_point, safety_stock_days,
                  pack_size, preferred_supplier_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 3, ?9, ?10)",
            rusqlite::params![
                product_id,
                org_id,
                spec.sku,
                spec.name,
                spec.category,
                spec.cost,
                spec.price,
                spec.reorder_point,
                spec.pack_size,
                supplier_id,
            ],
        )?;

        // Opening stock then thirty days of outflow and sales.
        conn.execute(
            "INSERT INTO inventory_movements
                 (id, product_id, location_id, quantity, movement_type, reference, moved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'opening-stock', ?6)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                product_id,
                warehouse_id,
                spec.opening_stock,
                MovementType::In.as_str(),
                (now - Duration::days(31)).to_rfc3339(),
            ],
        )?;

        let mut on_hand = spec.opening_stock as f64;
        for day_offset in (0..30).rev() {
            let day = now - Duration::days(day_offset);
            let jitter: f64 = rng.random_range(0.6..1.4);
            let units = (spec.daily_velocity * jitter).round() as i64;
            if units <= 0 {
                continue;
            }
            on_hand -= units as f64;

            conn.execute(
                "INSERT INTO inventory_movements
                     (id, product_id, location_id, quantity, movement_type, reference, moved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'daily-sales', ?6)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    product_id,
                    warehouse_id,
                    units,
                    MovementType::Out.as_str(),
                    day.to_rfc3339(),
                ],
            )?;

            let order_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO orders
                     (id, org_id, order_number, channel, status, ordered_at, total_amount)
                 VALUES (?1, ?2, ?3, 'online', 'completed', ?4, ?5)",
                rusqlite::params![
                    order_id,
                    org_id,
                    format!("SO-{}-{}", spec.sku, day.format("%Y%m%d")),
                    day.to_rfc3339(),
                    spec.price * units as f64,
                ],
            )?;
            conn.execute(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    order_id,
                    product_id,
                    units,
                    spec.price,
                ],
            )?;

            let revenue = spec.price * units as f64;
            let margin = (spec.price - spec.cost) * units as f64;
            conn.execute(
                "INSERT OR REPLACE INTO sales_daily
                     (org_id, sales_date, channel, location_name, product_name, sku, category,
                      units_sold, gross_revenue, gross_margin, margin_percent, orders_count,
                      units_7day_avg, units_30day_avg, units_56day_avg)
                 VALUES (?1, ?2, 'online', 'Main Warehouse', ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10, ?10)",
                rusqlite::params![
                    org_id,
                    day.date_naive().to_string(),
                    spec.name,
                    spec.sku,
                    spec.category,
                    units,
                    revenue,
                    margin,
                    if revenue > 0.0 { margin / revenue * 100.0 } else { 0.0 },
                    spec.daily_velocity,
                ],
            )?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO reorder_inputs
                 (org_id, product_id, sku, product_name, supplier_id, supplier_name, on_hand,
                  reorder_point, safety_stock_days, pack_size, max_stock_days, lead_time_days, moq,
                  chosen_velocity_latest, chosen_velocity_conservative,
                  velocity_source_latest, velocity_source_conservative,
                  incoming_units_30d, incoming_units_60d)
             VALUES (?1, ?2, ?3, ?4, ?5, 'Pacific Components', ?6, ?7, 3, ?8, NULL, 7, ?9,
                     ?10, ?10, ?11, ?11, 0, 0)",
            rusqlite::params![
                org_id,
                product_id,
                spec.sku,
                spec.name,
                supplier_id,
                on_hand as i64,
                spec.reorder_point,
                spec.pack_size,
                spec.moq,
                spec.daily_velocity,
                if spec.daily_velocity > 0.0 { "7d" } else { "none" },
            ],
        )?;
    }

    Ok(SeededOrg { org_id, admin_email, admin_password })
}
