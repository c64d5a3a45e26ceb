//! # Domain Types
//!
//! Core domain types used throughout Aerofuel.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐  1:N  ┌─────────────────┐  0..1 ┌────────────────┐ │
//! │  │      Tank       │──────►│    FuelLot      │──────►│ ReserveFuel    │ │
//! │  │  ─────────────  │       │  ─────────────  │       │ Record         │ │
//! │  │  id (UUID)      │       │  id (UUID)      │       │ ────────────── │ │
//! │  │  code           │       │  declaration_ref│       │ source_lot_id  │ │
//! │  │  kind           │       │  remaining_mass │       │ volume         │ │
//! │  │  declared_mass  │       │  remaining_vol  │       │ is_excess      │ │
//! │  │  declared_volume│       │  density        │       └────────────────┘ │
//! │  │  capacity       │       │  received_at    │                          │
//! │  └─────────────────┘       └─────────────────┘                          │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │ OperationLog    │   │  LotTransfer    │   │ ConsistencyOverride │   │
//! │  │ Entry (append)  │   │  (append)       │   │ (expiring grant)    │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Tanks and lots carry:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business key: tank `code`, lot `declaration_ref` (unique per tank only)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::quantity::{Density, Mass, Volume};

// =============================================================================
// Tank Kind
// =============================================================================

/// Physical category of a tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TankKind {
    /// Ground or underground storage. Reconciliation targets live here.
    Fixed,
    /// Tanker vehicle. Orphaned volume is detected here.
    Mobile,
}

impl TankKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TankKind::Fixed => "fixed",
            TankKind::Mobile => "mobile",
        }
    }
}

impl fmt::Display for TankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TankKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(TankKind::Fixed),
            "mobile" => Ok(TankKind::Mobile),
            _ => Err(ValidationError::NotAllowed {
                field: "tank_kind".to_string(),
                allowed: vec!["fixed".to_string(), "mobile".to_string()],
            }),
        }
    }
}

// =============================================================================
// Tank
// =============================================================================

/// A physical fuel vessel.
///
/// `declared_mass` / `declared_volume` are the tank's running book totals.
/// They must match the sum of its lots within the consistency tolerance and
/// are only ever moved by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tank {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Human-readable code painted on the vessel ("FT-01", "TRK-7").
    pub code: String,

    pub kind: TankKind,

    /// Fuel grade ("JET-A1"). Reconciliation only swaps within one grade.
    pub fuel_type: String,

    /// Maximum volume the vessel can hold.
    pub capacity: Volume,

    pub declared_mass: Mass,

    pub declared_volume: Volume,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Tank {
    #[inline]
    pub fn is_mobile(&self) -> bool {
        self.kind == TankKind::Mobile
    }
}

// =============================================================================
// Fuel Lot
// =============================================================================

/// A batch of fuel received under one customs declaration into one tank.
///
/// ## Lifecycle
/// ```text
/// intake / substitution ──► active (remaining_mass > 0)
///                               │ consume / transfer / reconcile
///                               ▼
///                           exhausted (remaining_mass == 0, kept forever)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelLot {
    pub id: String,
    pub tank_id: String,

    /// Customs declaration reference (MRN). Unique per tank, not globally.
    pub declaration_ref: String,

    pub original_mass: Mass,
    pub original_volume: Volume,
    pub remaining_mass: Mass,
    pub remaining_volume: Volume,

    /// Density measured at receipt. Fixed once established.
    pub density: Density,

    /// Defines FIFO order.
    pub received_at: DateTime<Utc>,

    /// Link to the originating intake record in the surrounding system.
    pub source_intake_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FuelLot {
    /// A lot takes part in FIFO while it still holds mass.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.remaining_mass.is_positive()
    }

    /// Mass exhausted but volume left behind.
    pub fn has_stranded_volume(&self) -> bool {
        self.remaining_mass.is_zero() && self.remaining_volume > Volume::new(crate::NEGLIGIBLE_VOLUME)
    }

    /// Total FIFO ordering key: `(received_at, created_at, id)`.
    pub fn fifo_key(&self) -> (DateTime<Utc>, DateTime<Utc>, &str) {
        (self.received_at, self.created_at, self.id.as_str())
    }

    /// Merges an incoming quantity under the same declaration reference.
    ///
    /// Both original and remaining grow; density and received_at stay.
    pub fn absorb(&mut self, mass: Mass, volume: Volume, now: DateTime<Utc>) {
        self.original_mass += mass;
        self.original_volume += volume;
        self.remaining_mass += mass;
        self.remaining_volume += volume;
        self.updated_at = now;
    }
}

/// Sorts lots into FIFO order in place.
pub fn sort_fifo(lots: &mut [FuelLot]) {
    lots.sort_by(|a, b| a.fifo_key().cmp(&b.fifo_key()));
}

// =============================================================================
// Requested Quantity
// =============================================================================

/// An outbound request expressed either by mass or by volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "amount", rename_all = "snake_case")]
pub enum RequestedQuantity {
    Mass(Mass),
    Volume(Volume),
}

impl RequestedQuantity {
    pub fn is_positive(&self) -> bool {
        match self {
            RequestedQuantity::Mass(m) => m.is_positive(),
            RequestedQuantity::Volume(v) => v.is_positive(),
        }
    }
}

impl fmt::Display for RequestedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedQuantity::Mass(m) => m.fmt(f),
            RequestedQuantity::Volume(v) => v.fmt(f),
        }
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// Category of a fuel-affecting operation, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Intake,
    Transfer,
    Consumption,
    Drain,
    Reconciliation,
    Adjustment,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Intake,
        OperationKind::Transfer,
        OperationKind::Consumption,
        OperationKind::Drain,
        OperationKind::Reconciliation,
        OperationKind::Adjustment,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Intake => "intake",
            OperationKind::Transfer => "transfer",
            OperationKind::Consumption => "consumption",
            OperationKind::Drain => "drain",
            OperationKind::Reconciliation => "reconciliation",
            OperationKind::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "operation_kind".to_string(),
                allowed: OperationKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Tank Snapshot
// =============================================================================

/// Full state of one tank (row + every lot, exhausted ones included).
///
/// Stored as JSON in the audit log for before/after comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankSnapshot {
    pub tank: Tank,
    pub lots: Vec<FuelLot>,
}

impl TankSnapshot {
    pub fn lot_mass_sum(&self) -> Mass {
        self.lots.iter().map(|l| l.remaining_mass).sum()
    }

    pub fn lot_volume_sum(&self) -> Volume {
        self.lots.iter().map(|l| l.remaining_volume).sum()
    }
}

// =============================================================================
// Operation Log Entry
// =============================================================================

/// Append-only audit record. One per affected tank per attempted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: String,

    /// Shared by every row (audit, transfer, reserve) of one operation.
    pub correlation_id: String,

    pub kind: OperationKind,

    /// The tank this row describes.
    pub tank_id: String,

    /// The other side of a transfer or reconciliation, if any.
    pub counterpart_tank_id: Option<String>,

    pub declaration_ref: Option<String>,

    /// Quantity moved in or out of `tank_id` (zero on failure).
    pub mass: Mass,
    pub volume: Volume,

    /// `None` only when the tank could not be read (e.g. it does not exist).
    pub before: Option<TankSnapshot>,
    pub after: Option<TankSnapshot>,

    /// Supplied by the authentication layer.
    pub actor: String,

    pub success: bool,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Reserve Fuel Record
// =============================================================================

/// Volume severed from a lot whose mass reached zero.
///
/// Informational only: once reconciled it is not part of any live balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveFuelRecord {
    pub id: String,
    pub correlation_id: String,
    pub tank_id: String,
    pub tank_kind: TankKind,
    pub source_declaration_ref: String,
    pub source_lot_id: String,
    pub volume: Volume,
    pub is_excess: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Lot Transfer
// =============================================================================

/// Links a source lot to the target lot that received its fuel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotTransfer {
    pub id: String,
    pub correlation_id: String,
    pub kind: OperationKind,
    pub source_tank_id: String,
    pub source_lot_id: String,
    pub source_declaration_ref: String,
    pub target_tank_id: String,
    pub target_lot_id: String,
    pub target_declaration_ref: String,
    pub mass: Mass,
    pub volume: Volume,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Consistency Override
// =============================================================================

/// An administrative grant that lets one operation kind on one tank proceed
/// despite a failed consistency pre-check, until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyOverride {
    pub id: String,
    pub tank_id: String,
    pub kind: OperationKind,
    pub granted_by: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConsistencyOverride {
    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
