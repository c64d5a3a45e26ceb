//! # Error Types
//!
//! Domain-specific error types for aerofuel-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  aerofuel-core errors (this file)                                       │
//! │  ├── CoreError        - Fuel-rule violations                            │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  aerofuel-db errors (separate crate)                                    │
//! │  └── DbError          - Database failures, conflicts, timeouts          │
//! │                                                                         │
//! │  aerofuel-ledger errors                                                 │
//! │  └── LedgerError      - What callers see, with a stable ErrorKind       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError ← DbError              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant carries the ids and quantities a caller needs to render a
//! precise message.

use thiserror::Error;

use crate::quantity::{Density, Mass, Volume};
use crate::types::TankKind;

// =============================================================================
// Core Error
// =============================================================================

/// Fuel-rule violations and domain lookups that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Requested more than the tank holds, beyond the shortfall tolerance.
    ///
    /// ## Caller Workflow
    /// ```text
    /// consume(TRK-7, 5000 kg)
    ///      │
    ///      ▼
    /// lots hold 4200 kg, tolerance 25 kg
    ///      │
    ///      ▼
    /// InsufficientFuel { requested: 5000, available: 4200 }
    ///      │
    ///      ▼
    /// retry with a smaller amount, or set allow_partial
    /// ```
    #[error("Insufficient fuel in tank {tank_id}: requested {requested}, available {available}")]
    InsufficientFuel {
        tank_id: String,
        requested: Mass,
        available: Mass,
    },

    #[error("Tank not found: {0}")]
    TankNotFound(String),

    #[error("Lot not found: {0}")]
    LotNotFound(String),

    /// Declared total and lot sum disagree beyond tolerance (pre-check).
    ///
    /// Recoverable only through a consistency override scoped to this tank
    /// and operation kind.
    #[error(
        "Tank {tank_id} is inconsistent: declared {declared}, lots {lot_sum}, \
         difference {difference} exceeds tolerance {tolerance}"
    )]
    ConsistencyViolation {
        tank_id: String,
        declared: Volume,
        lot_sum: Volume,
        difference: Volume,
        tolerance: Volume,
    },

    /// No fixed-tank lot can absorb the orphaned volume.
    #[error("No {fuel_type} lot in a fixed tank can supply {volume} for tank {tank_id}")]
    ReconciliationUnavailable {
        tank_id: String,
        fuel_type: String,
        volume: Volume,
    },

    /// Density outside the physical band. Reported, then substituted.
    #[error("Density {value} is outside the accepted band, substituted {substituted}")]
    InvalidDensity { value: Density, substituted: Density },

    #[error("Tank {tank_id} capacity {capacity} exceeded: would hold {would_hold}")]
    CapacityExceeded {
        tank_id: String,
        capacity: Volume,
        would_hold: Volume,
    },

    #[error("Tank {tank_id} is not a {expected} tank")]
    WrongTankKind { tank_id: String, expected: TankKind },

    #[error("Cannot move {source_fuel} from tank {source_tank_id} into {target_fuel} tank {target_tank_id}")]
    FuelTypeMismatch {
        source_tank_id: String,
        source_fuel: String,
        target_tank_id: String,
        target_fuel: String,
    },

    #[error("Lot {lot_id} does not belong to tank {tank_id}")]
    LotNotInTank { lot_id: String, tank_id: String },

    /// Administrative correction would break `0 ≤ remaining ≤ original`.
    #[error("Invalid adjustment of lot {lot_id}: {reason}")]
    InvalidAdjustment { lot_id: String, reason: String },

    /// Orphan amount asked for does not match what the lot actually holds.
    #[error("Lot {lot_id} holds {available} of stranded volume, {requested} requested")]
    OrphanMismatch {
        lot_id: String,
        requested: Volume,
        available: Volume,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any fuel logic runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Source and target of a move are the same tank.
    #[error("source and target tank must differ ({0})")]
    SameTank(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
