//! # Fuel Operations
//!
//! Each operation is a request struct implementing
//! [`FuelOperation`](crate::coordinator::FuelOperation). The coordinator owns
//! the transaction; operations only read and write through the connection
//! they are handed.
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────────────────────────────────┐
//! │ Operation    │ Kind           │ Writes                               │
//! ├──────────────┼────────────────┼──────────────────────────────────────┤
//! │ Intake       │ intake         │ lot (create/merge), tank +           │
//! │ Consume      │ consumption /  │ lots −, tank −, orphans → reconcile  │
//! │              │ drain          │                                      │
//! │ Transfer     │ transfer       │ source as Consume, target lots +,    │
//! │              │                │ one lot_transfers row per source lot │
//! │ Reconcile    │ reconciliation │ reserve record, target lot −,        │
//! │              │                │ substitute lot +, lot_transfers row  │
//! │ Adjust       │ adjustment     │ one lot, tank by the same delta      │
//! └──────────────┴────────────────┴──────────────────────────────────────┘
//! ```

pub mod adjust;
pub mod consume;
pub mod intake;
pub mod reconcile;
pub mod transfer;

pub use adjust::{AdjustLot, AdjustmentResult};
pub use consume::{Consume, ConsumptionResult};
pub use intake::{Intake, IntakeResult};
pub use reconcile::{ReconcileExcess, ReconciliationResult};
pub use transfer::{Transfer, TransferResult};

use aerofuel_core::{CoreError, FuelLot, Tank};
use aerofuel_db::{LotRepository, TankRepository};
use sqlx::SqliteConnection;

use crate::error::LedgerResult;

pub(crate) async fn load_tank(conn: &mut SqliteConnection, tank_id: &str) -> LedgerResult<Tank> {
    TankRepository::new(conn)
        .get(tank_id)
        .await?
        .ok_or_else(|| CoreError::TankNotFound(tank_id.to_string()).into())
}

pub(crate) async fn load_lot(conn: &mut SqliteConnection, lot_id: &str) -> LedgerResult<FuelLot> {
    LotRepository::new(conn)
        .get(lot_id)
        .await?
        .ok_or_else(|| CoreError::LotNotFound(lot_id.to_string()).into())
}
