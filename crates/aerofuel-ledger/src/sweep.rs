//! # Orphan Sweeper
//!
//! Background loop that reconciles stranded volume left in mobile tanks,
//! either because inline reconciliation was off or no fixed-tank lot could
//! take it at the time.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  interval tick (default 3 h) ──► FuelLedger::sweep_orphans    │
//! │                                     │ one transaction per lot │
//! │                                     ▼                         │
//! │                                 SweepReport                   │
//! │  shutdown handle ─────────────► loop exits                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first tick fires immediately, so a freshly started sweeper catches up
//! on whatever accumulated while it was down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{FuelLedger, SweepReport};

pub struct OrphanSweeper {
    ledger: Arc<FuelLedger>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running sweeper.
#[derive(Clone)]
pub struct OrphanSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl OrphanSweeperHandle {
    pub async fn shutdown(&self) -> LedgerResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| LedgerError::Internal("Sweeper shutdown channel closed".into()))
    }
}

impl OrphanSweeper {
    pub fn new(ledger: Arc<FuelLedger>, interval: Duration) -> (Self, OrphanSweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = OrphanSweeper {
            ledger,
            interval,
            shutdown_rx,
        };
        (sweeper, OrphanSweeperHandle { shutdown_tx })
    }

    /// Runs until shut down. Returns the totals over every pass.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) -> SweepReport {
        info!(interval = ?self.interval, "Orphan sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut totals = SweepReport::default();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.ledger.sweep_orphans().await {
                        Ok(report) => {
                            totals.scanned += report.scanned;
                            totals.reconciled += report.reconciled;
                            totals.unavailable += report.unavailable;
                            totals.failed += report.failed;
                        }
                        Err(e) => error!(error = %e, "Orphan sweep failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Orphan sweeper shutting down");
                    break;
                }
            }
        }

        info!(reconciled = totals.reconciled, "Orphan sweeper stopped");
        totals
    }
}
