//! # Cache Seeder
//!
//! Fills the local cache with sample farm-shop data so local mode has
//! something to show during development.
//!
//! ## Usage
//! ```bash
//! # Seed ./farmshop_dev.db with 40 orders (default)
//! cargo run -p farmshop-db --bin seed
//!
//! # Custom amount and path
//! cargo run -p farmshop-db --bin seed -- --orders 200 --db ./data/farmshop.db
//! ```
//!
//! Seeds three tables: `products`, `customers` and `orders`. Existing
//! snapshots are left untouched unless `--force` is passed.

use chrono::{Duration, Utc};
use serde_json::json;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use farmshop_core::Record;
use farmshop_db::{Database, DbConfig};

/// (name, unit, price in cents)
const PRODUCTS: &[(&str, &str, i64)] = &[
    ("Pommes Reinette", "kg", 320),
    ("Poires Conférence", "kg", 380),
    ("Carottes", "kg", 210),
    ("Pommes de terre", "kg", 180),
    ("Oeufs fermiers", "douzaine", 450),
    ("Lait cru", "litre", 130),
    ("Beurre doux", "250g", 390),
    ("Tomme de montagne", "kg", 1890),
    ("Miel de fleurs", "500g", 950),
    ("Confiture de fraises", "370g", 520),
    ("Jus de pomme", "litre", 340),
    ("Poulet fermier", "pièce", 1650),
];

const CUSTOMERS: &[(&str, &str)] = &[
    ("Camille Martin", "+33612345601"),
    ("Alex Bernard", "+33612345602"),
    ("Dominique Petit", "+33612345603"),
    ("Sacha Durand", "+33612345604"),
    ("Claude Leroy", "+33612345605"),
    ("Morgan Moreau", "+33612345606"),
];

const STATUSES: &[&str] = &["new", "packed", "ready", "collected"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut orders: usize = 40;
    let mut db_path = String::from("./farmshop_dev.db");
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--orders" | "-o" => {
                if i + 1 < args.len() {
                    orders = args[i + 1].parse().unwrap_or(40);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--force" | "-f" => force = true,
            "--help" | "-h" => {
                println!("FarmShop Cache Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -o, --orders <N>   Number of orders to generate (default: 40)");
                println!("  -d, --db <PATH>    Database file path (default: ./farmshop_dev.db)");
                println!("  -f, --force        Overwrite existing snapshots");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let db = Database::connect(DbConfig::new(&db_path)).await?;
    let cache = db.cache();
    info!(path = %db_path, "Connected to database");

    let existing = cache.tables().await?;
    if !existing.is_empty() && !force {
        warn!(tables = ?existing, "Cache already seeded, pass --force to overwrite");
        return Ok(());
    }

    let products = generate_products();
    let customers = generate_customers();
    let order_rows = generate_orders(orders);

    cache.set("products", &products).await?;
    cache.set("customers", &customers).await?;
    cache.set("orders", &order_rows).await?;

    info!(
        products = products.len(),
        customers = customers.len(),
        orders = order_rows.len(),
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,farmshop=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn to_record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn generate_products() -> Vec<Record> {
    PRODUCTS
        .iter()
        .enumerate()
        .map(|(idx, (name, unit, price))| {
            to_record(json!({
                "id": format!("p-{:03}", idx + 1),
                "name": name,
                "unit": unit,
                "price_cents": price,
                "in_stock": idx % 5 != 4,
            }))
        })
        .collect()
}

fn generate_customers() -> Vec<Record> {
    CUSTOMERS
        .iter()
        .enumerate()
        .map(|(idx, (name, phone))| {
            to_record(json!({
                "id": format!("c-{:03}", idx + 1),
                "name": name,
                "phone": phone,
                "sms_opt_in": idx % 3 != 2,
            }))
        })
        .collect()
}

fn generate_orders(count: usize) -> Vec<Record> {
    let now = Utc::now();

    (0..count)
        .map(|seed| {
            let customer = seed % CUSTOMERS.len();
            let (_, _, price) = PRODUCTS[(seed * 7) % PRODUCTS.len()];
            let quantity = 1 + (seed % 4) as i64;

            to_record(json!({
                "id": format!("o-{:05}", seed + 1),
                "customer_id": format!("c-{:03}", customer + 1),
                "status": STATUSES[seed % STATUSES.len()],
                "total_cents": price * quantity,
                "created_at": (now - Duration::hours(seed as i64 * 3)).to_rfc3339(),
            }))
        })
        .collect()
}
