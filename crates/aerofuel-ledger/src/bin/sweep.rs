//! # Orphan Sweep
//!
//! Reconciles stranded volume in mobile tanks. Run once per period from an
//! external scheduler, or keep it running with `--daemon`.
//!
//! ## Usage
//! ```bash
//! # One pass (cron, systemd timer)
//! cargo run -p aerofuel-ledger --bin sweep
//!
//! # Run on the configured interval until Ctrl-C
//! cargo run -p aerofuel-ledger --bin sweep -- --daemon
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use aerofuel_ledger::telemetry::init_tracing;
use aerofuel_ledger::{FuelLedger, LedgerConfig, OrphanSweeper};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut daemon = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--daemon" => daemon = true,
            "--help" | "-h" => {
                println!("Aerofuel Orphan Sweep");
                println!();
                println!("Usage: sweep [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>   Config file (default: platform config dir)");
                println!("  -d, --db <PATH>       Database file path (default: from config)");
                println!("      --daemon          Sweep on the configured interval until Ctrl-C");
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
    let ledger = Arc::new(FuelLedger::open(&config).await?);

    if !daemon {
        let report = ledger.sweep_orphans().await?;
        println!(
            "scanned {}, reconciled {}, unavailable {}, failed {}",
            report.scanned, report.reconciled, report.unavailable, report.failed
        );
        return Ok(());
    }

    let (sweeper, handle) = OrphanSweeper::new(ledger, config.sweep_interval());
    let task = tokio::spawn(sweeper.run());

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");
    handle.shutdown().await?;

    let totals = task.await?;
    println!(
        "scanned {}, reconciled {}, unavailable {}, failed {}",
        totals.scanned, totals.reconciled, totals.unavailable, totals.failed
    );
    Ok(())
}
