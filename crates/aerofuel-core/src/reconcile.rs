//! # Reconciliation Planning
//!
//! Chooses where orphaned volume is restored from. Planning is pure and runs
//! before any write, so a missing target never leaves a half-applied swap.
//!
//! ## The Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mobile tank M                         fixed tank F                     │
//! │  ┌───────────────────┐                 ┌───────────────────┐            │
//! │  │ lot S  mass 0     │                 │ lot T  (oldest    │            │
//! │  │        vol  V ────┼──► reserve      │   qualifying lot) │            │
//! │  └───────────────────┘    record       │   −V, −V×ρ(T)     │            │
//! │  ┌───────────────────┐                 └─────────┬─────────┘            │
//! │  │ lot T' (T's MRN)  │◄──────────────────────────┘                      │
//! │  │   +V, +V×ρ(T)     │        lot transfer row links T → T'             │
//! │  └───────────────────┘                                                  │
//! │                                                                         │
//! │  Σ mass and Σ volume over all tanks are unchanged.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Target Rule
//! Candidates are lots in fixed tanks of the same fuel type with
//! `remaining_mass > 0`, `remaining_volume ≥ V` and `remaining_mass ≥ V × ρ`.
//! The winner is the first candidate in FIFO order across *all* such tanks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::quantity::{Density, Mass, Volume};
use crate::types::{FuelLot, Tank, TankKind};

/// Everything needed to apply one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub source_tank_id: String,
    pub source_lot_id: String,
    pub source_declaration_ref: String,
    pub volume: Volume,

    pub target_tank_id: String,
    pub target_lot_id: String,
    pub target_declaration_ref: String,
    pub target_density: Density,
    pub target_received_at: DateTime<Utc>,

    /// `volume × target_density`.
    pub equivalent_mass: Mass,
}

/// Whether `lot` can give up `volume` without going negative on either axis.
pub fn qualifies(lot: &FuelLot, volume: Volume) -> bool {
    lot.remaining_mass.is_positive()
        && lot.remaining_volume >= volume
        && lot.remaining_mass >= Mass::from_volume(volume, lot.density)
}

/// Picks the oldest qualifying lot.
///
/// `candidates` must already be restricted to fixed tanks of the right fuel
/// type; order does not matter.
pub fn select_target<'a, I>(candidates: I, volume: Volume) -> Option<&'a FuelLot>
where
    I: IntoIterator<Item = &'a FuelLot>,
{
    candidates
        .into_iter()
        .filter(|lot| qualifies(lot, volume))
        .min_by(|a, b| a.fifo_key().cmp(&b.fifo_key()))
}

/// Builds a plan for moving `volume` of orphaned fuel out of `source_lot`.
///
/// Fails with `WrongTankKind` for a fixed source, `LotNotInTank` when the lot
/// belongs elsewhere and `ReconciliationUnavailable` when no candidate
/// qualifies.
pub fn plan(
    source_tank: &Tank,
    source_lot: &FuelLot,
    volume: Volume,
    candidates: &[FuelLot],
) -> CoreResult<ReconciliationPlan> {
    if source_tank.kind != TankKind::Mobile {
        return Err(CoreError::WrongTankKind {
            tank_id: source_tank.id.clone(),
            expected: TankKind::Mobile,
        });
    }
    if source_lot.tank_id != source_tank.id {
        return Err(CoreError::LotNotInTank {
            lot_id: source_lot.id.clone(),
            tank_id: source_tank.id.clone(),
        });
    }
    if !volume.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "orphaned_volume".to_string(),
        }
        .into());
    }

    let others = candidates.iter().filter(|lot| lot.tank_id != source_tank.id);
    let target = select_target(others, volume).ok_or_else(|| CoreError::ReconciliationUnavailable {
        tank_id: source_tank.id.clone(),
        fuel_type: source_tank.fuel_type.clone(),
        volume,
    })?;

    Ok(ReconciliationPlan {
        source_tank_id: source_tank.id.clone(),
        source_lot_id: source_lot.id.clone(),
        source_declaration_ref: source_lot.declaration_ref.clone(),
        volume,
        target_tank_id: target.tank_id.clone(),
        target_lot_id: target.id.clone(),
        target_declaration_ref: target.declaration_ref.clone(),
        target_density: target.density,
        target_received_at: target.received_at,
        equivalent_mass: Mass::from_volume(volume, target.density),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
