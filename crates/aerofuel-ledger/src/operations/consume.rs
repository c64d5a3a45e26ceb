//! # Consumption
//!
//! Fuel leaving a tank: refuelling (consumption), quality drains, and the
//! source side of a transfer.
//!
//! ## Flow
//! ```text
//! request (mass | volume)
//!      │ volume? → mass via each lot's own mass/volume ratio
//!      ▼
//! fifo::deduct over active + not-yet-parked stranded lots   (pure, no writes)
//!      │
//!      ├─ shortfall > max(1 kg, 0.5%) and !allow_partial → InsufficientFuel
//!      │
//!      ├─ orphans? mobile tank + inline → plan reconciliation for each
//!      │           otherwise          → volume stays on the lot (sweeper)
//!      ▼
//! write lots, park unreconciled orphans, tank −deducted, apply plans
//! ```
//!
//! A parked lot keeps its stranded volume but drops out of later FIFO walks,
//! so each orphan is reported by exactly one withdrawal.

use aerofuel_core::fifo::{self, shortfall_tolerance};
use aerofuel_core::reconcile;
use aerofuel_core::{
    CoreError, Deduction, FuelLot, Mass, OrphanedVolume, PerLotDeduction, RequestedQuantity, Tank,
    ValidationError, Volume,
};
use aerofuel_db::{LotRepository, TankRepository};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::load_tank;
use super::reconcile::{apply as apply_reconciliation, ReconciliationResult};
use crate::coordinator::{FuelOperation, Movement, OperationContext};
use crate::error::LedgerResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consume {
    pub tank_id: String,
    pub quantity: RequestedQuantity,
    /// Commit what is available when the shortfall exceeds tolerance.
    #[serde(default)]
    pub allow_partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionResult {
    pub correlation_id: String,
    pub tank_id: String,
    pub requested: RequestedQuantity,
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
}

/// What left one tank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub deducted_mass: Mass,
    pub deducted_volume: Volume,
    pub per_lot: Vec<PerLotDeduction>,
    /// Mass the tank could not supply. Zero when fully satisfied.
    pub shortfall: Mass,
    /// Orphans this withdrawal found. A lot reported here is never reported
    /// again by a later withdrawal.
    pub orphans: Vec<OrphanedVolume>,
    pub reconciliations: Vec<ReconciliationResult>,
    /// Orphans left as stranded volume on their lot.
    pub unreconciled: Vec<OrphanedVolume>,
    /// Touched lots as written, in FIFO order.
    #[serde(skip)]
    pub lots: Vec<FuelLot>,
}

/// A FIFO deduction computed against a tank, not yet written.
pub(crate) struct PlannedWithdrawal {
    pub tank: Tank,
    pub deduction: Deduction,
    pub shortfall: Mass,
}

impl FuelOperation for Consume {
    type Output = ConsumptionResult;

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        ctx: &mut OperationContext,
    ) -> LedgerResult<ConsumptionResult> {
        let tank = load_tank(&mut *conn, &self.tank_id).await?;
        ctx.enlist(&mut *conn, &tank.id).await?;
        let planned = plan(&mut *conn, ctx, tank, self.quantity, self.allow_partial).await?;
        let withdrawal = apply(&mut *conn, ctx, planned).await?;

        let declaration_ref = match withdrawal.per_lot.as_slice() {
            [only] => Some(only.declaration_ref.clone()),
            _ => None,
        };
        ctx.record(
            &self.tank_id,
            Movement {
                mass: withdrawal.deducted_mass,
                volume: withdrawal.deducted_volume,
                declaration_ref,
                counterpart_tank_id: None,
            },
        );

        info!(
            correlation_id = %ctx.correlation_id(),
            kind = %ctx.kind(),
            tank_id = %self.tank_id,
            requested = %self.quantity,
            mass = %withdrawal.deducted_mass,
            volume = %withdrawal.deducted_volume,
            lots = withdrawal.per_lot.len(),
            shortfall = %withdrawal.shortfall,
            "Fuel withdrawn"
        );

        Ok(ConsumptionResult {
            correlation_id: ctx.correlation_id().to_string(),
            tank_id: self.tank_id.clone(),
            requested: self.quantity,
            withdrawal,
        })
    }
}

/// Computes the FIFO deduction and enforces the shortfall policy.
pub(crate) async fn plan(
    conn: &mut SqliteConnection,
    ctx: &OperationContext,
    tank: Tank,
    requested: RequestedQuantity,
    allow_partial: bool,
) -> LedgerResult<PlannedWithdrawal> {
    if !requested.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into());
    }

    let lots = LotRepository::new(&mut *conn).list_consumable(&tank.id).await?;

    let (requested_mass, deduction, shortfall) = match requested {
        RequestedQuantity::Mass(mass) => {
            let deduction = fifo::deduct(&lots, mass, ctx.now());
            let shortfall = deduction.shortfall;
            (mass, deduction, shortfall)
        }
        RequestedQuantity::Volume(volume) => {
            let (mass, uncovered) = fifo::mass_for_volume(&lots, volume);
            let deduction = fifo::deduct(&lots, mass, ctx.now());
            // Uncovered volume counts against the request at the default density
            let uncovered_mass = Mass::from_volume(uncovered, ctx.density_band().default);
            let shortfall = deduction.shortfall + uncovered_mass;
            (mass + uncovered_mass, deduction, shortfall)
        }
    };

    if shortfall > shortfall_tolerance(requested_mass) && !allow_partial {
        return Err(CoreError::InsufficientFuel {
            tank_id: tank.id,
            requested: requested_mass,
            available: deduction.deducted_mass,
        }
        .into());
    }
    if shortfall.is_positive() {
        warn!(
            correlation_id = %ctx.correlation_id(),
            tank_id = %tank.id,
            requested = %requested_mass,
            shortfall = %shortfall,
            "Request not fully covered"
        );
    }

    Ok(PlannedWithdrawal {
        tank,
        deduction,
        shortfall,
    })
}

/// Writes a planned withdrawal: reconciliation targets are chosen first, then
/// lots and the tank are updated, then the plans are applied.
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    ctx: &mut OperationContext,
    planned: PlannedWithdrawal,
) -> LedgerResult<Withdrawal> {
    let PlannedWithdrawal {
        tank,
        deduction,
        shortfall,
    } = planned;
    let now = ctx.now();

    let mut plans = Vec::new();
    let mut unreconciled = Vec::new();
    if !deduction.orphans.is_empty() {
        if tank.is_mobile() && ctx.inline_reconciliation() {
            let mut candidates = LotRepository::new(&mut *conn)
                .list_reconciliation_candidates(&tank.fuel_type, &tank.id)
                .await?;

            for orphan in &deduction.orphans {
                let Some(source) = deduction.updated_lots.iter().find(|l| l.id == orphan.lot_id) else {
                    continue;
                };
                let mut source = source.clone();
                source.remaining_volume = orphan.volume;

                match reconcile::plan(&tank, &source, orphan.volume, &candidates) {
                    Ok(plan) => {
                        // Later orphans must see what this plan already takes
                        if let Some(target) = candidates.iter_mut().find(|l| l.id == plan.target_lot_id) {
                            target.remaining_volume -= plan.volume;
                            target.remaining_mass -= plan.equivalent_mass;
                        }
                        plans.push(plan);
                    }
                    Err(err @ CoreError::ReconciliationUnavailable { .. }) => {
                        warn!(
                            correlation_id = %ctx.correlation_id(),
                            lot_id = %orphan.lot_id,
                            volume = %orphan.volume,
                            "{}; orphan left for the sweeper", err
                        );
                        unreconciled.push(orphan.clone());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        } else {
            for orphan in &deduction.orphans {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    tank_id = %tank.id,
                    tank_kind = %tank.kind,
                    lot_id = %orphan.lot_id,
                    volume = %orphan.volume,
                    "Orphaned volume left on lot"
                );
            }
            unreconciled = deduction.orphans.clone();
        }
    }

    // Orphan volume goes back on its lot; reconciliation severs it from there
    let mut lots = deduction.updated_lots;
    for lot in &mut lots {
        if let Some(orphan) = deduction.orphans.iter().find(|o| o.lot_id == lot.id) {
            lot.remaining_volume = orphan.volume;
        }
        LotRepository::new(&mut *conn).update_remaining(lot).await?;
    }
    for orphan in &unreconciled {
        LotRepository::new(&mut *conn).park_orphan(&orphan.lot_id, now).await?;
    }

    TankRepository::new(&mut *conn)
        .apply_delta(&tank.id, -deduction.deducted_mass, -deduction.deducted_volume, now)
        .await?;

    let mut reconciliations = Vec::with_capacity(plans.len());
    for plan in &plans {
        let note = Some(format!("orphaned during {} {}", ctx.kind(), ctx.correlation_id()));
        reconciliations.push(apply_reconciliation(&mut *conn, ctx, plan, note).await?);
    }

    Ok(Withdrawal {
        deducted_mass: deduction.deducted_mass,
        deducted_volume: deduction.deducted_volume,
        per_lot: deduction.details,
        shortfall,
        orphans: deduction.orphans,
        reconciliations,
        unreconciled,
        lots,
    })
}
