//! # aerofuel-ledger: Transaction Coordinator and Fuel Operations
//!
//! Everything that changes a tank or a lot runs through this crate, inside
//! one SQLite transaction, with consistency checks around it and audit rows
//! written for every involved tank whether it succeeds or fails.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          aerofuel-ledger                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    FuelLedger (public entry point)               │  │
//! │  │  register_tank • intake • consume • drain • transfer • adjust    │  │
//! │  │  reconcile_excess • verify • overrides • audit reads • sweep     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Coordinator   │  │   Operations   │  │    OrphanSweeper       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Phases, retry  │  │ Intake/Consume │  │ Interval loop, one     │    │
//! │  │ with backoff,  │  │ Transfer/Adjust│  │ transaction per        │    │
//! │  │ audit rows     │  │ Reconcile      │  │ stranded lot           │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  aerofuel-core: FIFO, consistency, target selection (pure)             │
//! │  aerofuel-db:   repositories on the coordinator's transaction          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`ledger`] - `FuelLedger`
//! - [`coordinator`] - Phase machine, retry policy, `FuelOperation` trait
//! - [`operations`] - One request type per fuel operation
//! - [`sweep`] - Periodic orphan sweeper
//! - [`config`] - `LedgerConfig` (TOML + environment)
//! - [`error`] - `LedgerError` and its stable `ErrorKind`
//! - [`telemetry`] - Tracing subscriber setup for the binaries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aerofuel_ledger::{FuelLedger, LedgerConfig};
//! use aerofuel_ledger::operations::Consume;
//! use aerofuel_core::{Mass, RequestedQuantity};
//!
//! let config = LedgerConfig::load(None)?;
//! let ledger = FuelLedger::open(&config).await?;
//!
//! let result = ledger
//!     .consume(
//!         Consume {
//!             tank_id: truck.id.clone(),
//!             quantity: RequestedQuantity::Mass(Mass::from_whole(1200)),
//!             allow_partial: false,
//!         },
//!         "ops:jdoe",
//!     )
//!     .await?;
//! println!("{} from {} lots", result.withdrawal.deducted_mass, result.withdrawal.per_lot.len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod operations;
pub mod sweep;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{CoordinatorSettings, DatabaseSettings, LedgerConfig, ReconciliationSettings};
pub use coordinator::{Coordinator, FuelOperation, OperationContext, OperationOptions, Phase, RetryPolicy};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::{FuelLedger, RegisterTank, SweepReport, SWEEPER_ACTOR};
pub use sweep::{OrphanSweeper, OrphanSweeperHandle};
