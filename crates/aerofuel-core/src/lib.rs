//! # aerofuel-core: Pure Fuel-Lot Logic for Aerofuel
//!
//! This crate is the **heart** of Aerofuel. It contains the quantity model and
//! every fuel rule as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Aerofuel Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Callers (HTTP, reporting, job scheduler)               │   │
//! │  │    intake ──► consume ──► transfer ──► reconcile ──► audit      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          aerofuel-ledger (coordinator, operations)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ aerofuel-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌──────────────┐      │   │
//! │  │   │ quantity │ │   fifo   │ │consistency│ │  reconcile   │      │   │
//! │  │   │ Mass     │ │ deduct   │ │  verify   │ │ plan/select  │      │   │
//! │  │   │ Volume   │ │ shortfall│ │ tolerance │ │  target      │      │   │
//! │  │   │ Density  │ └──────────┘ └───────────┘ └──────────────┘      │   │
//! │  │   └──────────┘                                                  │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 aerofuel-db (Database Layer)                    │   │
//! │  │          SQLite queries, migrations, repositories               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`quantity`] - Mass, Volume, Density (fixed-point, banker's rounding)
//! - [`types`] - Domain types (Tank, FuelLot, audit entries, overrides)
//! - [`fifo`] - FIFO Consumption Engine
//! - [`consistency`] - Consistency Verifier
//! - [`reconcile`] - Reconciliation target selection
//! - [`clock`] - Clock and id collaborators
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same lots in, same deduction out
//! 2. **No I/O**: persistence lives in aerofuel-db
//! 3. **Mass is authoritative**: volume follows by proportion
//! 4. **Explicit Errors**: typed variants, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use aerofuel_core::fifo::deduct;
//! use aerofuel_core::quantity::Mass;
//!
//! let outcome = deduct(&[], Mass::from_whole(10), chrono::Utc::now());
//! assert_eq!(outcome.shortfall, Mass::from_whole(10));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod consistency;
pub mod error;
pub mod fifo;
pub mod quantity;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use consistency::ConsistencyReport;
pub use error::{CoreError, CoreResult, ValidationError};
pub use fifo::{Deduction, OrphanedVolume, PerLotDeduction};
pub use quantity::{Density, DensityBand, Mass, Volume};
pub use reconcile::ReconciliationPlan;
pub use types::*;

use rust_decimal::Decimal;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Below this many kilograms a lot remainder is dust and is absorbed whole.
pub const NEGLIGIBLE_MASS: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Stranded volume at or below this many litres is not worth reconciling.
pub const NEGLIGIBLE_VOLUME: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Relative consistency tolerance (0.5%).
pub const CONSISTENCY_RELATIVE_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Absolute consistency tolerance floor in litres.
pub const CONSISTENCY_ABSOLUTE_TOLERANCE: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Absolute shortfall tolerance in kilograms.
pub const SHORTFALL_ABSOLUTE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 0);

/// Relative shortfall tolerance (0.5% of the request).
pub const SHORTFALL_RELATIVE_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Lower bound of plausible jet fuel density (kg/L).
pub const MIN_DENSITY: Decimal = Decimal::from_parts(700, 0, 0, false, 3);

/// Upper bound of plausible jet fuel density (kg/L).
pub const MAX_DENSITY: Decimal = Decimal::from_parts(900, 0, 0, false, 3);

/// Density recorded when the measured one is rejected (kg/L).
pub const DEFAULT_DENSITY: Decimal = Decimal::from_parts(800, 0, 0, false, 3);

/// Maximum length of a customs declaration reference.
pub const MAX_DECLARATION_REF_LEN: usize = 64;

/// Maximum length of a tank code or fuel type.
pub const MAX_TANK_CODE_LEN: usize = 32;
