//! # Demo Data Seeder
//!
//! Registers a small airfield (two fixed tanks, two refuelling trucks) and
//! receives a few declarations into it, for local development.
//!
//! ## Usage
//! ```bash
//! cargo run -p aerofuel-ledger --bin seed
//!
//! # Specify database path
//! cargo run -p aerofuel-ledger --bin seed -- --db ./data/aerofuel.db
//! ```

use std::env;
use std::path::PathBuf;

use aerofuel_core::{Density, Mass, TankKind, Volume};
use aerofuel_ledger::operations::Intake;
use aerofuel_ledger::telemetry::init_tracing;
use aerofuel_ledger::{FuelLedger, LedgerConfig, RegisterTank};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

const ACTOR: &str = "system:seed";

/// (code, kind, capacity in litres)
const TANKS: &[(&str, TankKind, i64)] = &[
    ("FT-01", TankKind::Fixed, 250_000),
    ("FT-02", TankKind::Fixed, 250_000),
    ("TRK-7", TankKind::Mobile, 20_000),
    ("TRK-9", TankKind::Mobile, 20_000),
];

/// (tank code, declaration ref, kg, litres, density in thousandths, days ago)
const INTAKES: &[(&str, &str, i64, i64, i64, i64)] = &[
    ("FT-01", "24PK0001IM0000001", 80_000, 100_000, 800, 30),
    ("FT-01", "24PK0001IM0000002", 39_500, 50_000, 790, 12),
    ("FT-02", "24PK0001IM0000003", 122_400, 150_000, 816, 20),
    ("TRK-7", "24PK0001IM0000001", 8_000, 10_000, 800, 2),
    ("TRK-9", "24PK0001IM0000003", 4_080, 5_000, 816, 1),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Aerofuel Demo Data Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: from config)");
                println!("  -c, --config <PATH>   Config file (default: platform config dir)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing();

    let mut config = LedgerConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = Some(path);
    }

    println!("Aerofuel Demo Data Seeder");
    println!("=========================");
    println!("Database: {}", config.database.resolved_path()?.display());
    println!();

    let ledger = FuelLedger::open(&config).await?;

    let existing = ledger.list_tanks().await?;
    if !existing.is_empty() {
        println!("Database already has {} tanks", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut tanks = Vec::with_capacity(TANKS.len());
    for (code, kind, capacity) in TANKS {
        let tank = ledger
            .register_tank(RegisterTank {
                code: code.to_string(),
                kind: *kind,
                fuel_type: "JET-A1".to_string(),
                capacity: Volume::from_whole(*capacity),
            })
            .await?;
        println!("✓ Registered {} ({})", tank.code, tank.kind);
        tanks.push(tank);
    }

    let now = Utc::now();
    for (code, declaration_ref, kg, litres, density, days_ago) in INTAKES {
        let Some(tank) = tanks.iter().find(|t| t.code == *code) else {
            continue;
        };
        let result = ledger
            .intake(
                Intake {
                    tank_id: tank.id.clone(),
                    declaration_ref: declaration_ref.to_string(),
                    mass: Mass::from_whole(*kg),
                    volume: Volume::from_whole(*litres),
                    density: Density::new(Decimal::new(*density, 3)),
                    received_at: Some(now - Duration::days(*days_ago)),
                    source_intake_id: None,
                },
                ACTOR,
            )
            .await?;
        println!(
            "✓ {} ← {} ({} / {})",
            code, result.lot.declaration_ref, result.lot.remaining_mass, result.lot.remaining_volume
        );
    }

    println!();
    for tank in &tanks {
        let report = ledger.verify_consistency(&tank.id).await?;
        println!(
            "  {:<6} declared {:>12}  lots {:>12}  consistent: {}",
            tank.code, report.declared_total, report.lot_sum, report.is_consistent
        );
    }

    println!();
    println!("✓ Seed complete");
    Ok(())
}
