//! # Reconciliation
//!
//! Moves orphaned volume out of a mobile tank's lot into a reserve record and
//! replaces it with the same volume taken from the oldest qualifying lot in a
//! fixed tank.
//!
//! ## Steps (one transaction)
//! ```text
//!   mobile tank TRK-7                          fixed tank FT-01
//!   ┌──────────────────────┐                   ┌──────────────────────┐
//!   │ lot A  0 kg / 12 L   │ 1. −12 L ──► reserve record (is_excess)  │
//!   │                      │                   │ lot X  800 kg/1000 L │
//!   │                      │ ◄── 3. +12 L/9.6 kg ── 2. −12 L/−9.6 kg  │
//!   │ lot X' (X's MRN,     │                   │                      │
//!   │  density, received)  │  4. lot_transfers row X → X'             │
//!   └──────────────────────┘                   └──────────────────────┘
//!   declared totals move by exactly what each tank's lots moved
//! ```
//!
//! Planning (target selection) happens before any write, so a missing target
//! leaves everything untouched.

use aerofuel_core::reconcile::{self, qualifies};
use aerofuel_core::{
    CoreError, FuelLot, LotTransfer, Mass, OperationKind, ReconciliationPlan, ReserveFuelRecord,
    TankKind, Volume,
};
use aerofuel_db::{LotRepository, NewLot, ReserveRepository, TankRepository, TransferRepository};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::{load_lot, load_tank};
use crate::coordinator::{FuelOperation, Movement, OperationContext};
use crate::error::LedgerResult;

/// Standalone reconciliation of one stranded lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileExcess {
    pub mobile_tank_id: String,
    pub source_lot_id: String,
    pub orphaned_volume: Volume,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub correlation_id: String,
    pub plan: ReconciliationPlan,
    pub reserve_record: ReserveFuelRecord,
    /// The lot in the mobile tank that received the substituted fuel.
    pub substitute_lot: FuelLot,
    pub merged: bool,
}

/// Stranded volume a lot can give up: all of its volume once its mass is gone.
pub(crate) fn stranded_volume(lot: &FuelLot) -> Volume {
    if lot.remaining_mass.is_zero() {
        lot.remaining_volume
    } else {
        Volume::zero()
    }
}

impl FuelOperation for ReconcileExcess {
    type Output = ReconciliationResult;

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        ctx: &mut OperationContext,
    ) -> LedgerResult<ReconciliationResult> {
        let tank = load_tank(&mut *conn, &self.mobile_tank_id).await?;
        let lot = load_lot(&mut *conn, &self.source_lot_id).await?;

        if !tank.is_mobile() {
            return Err(CoreError::WrongTankKind {
                tank_id: tank.id,
                expected: TankKind::Mobile,
            }
            .into());
        }
        if lot.tank_id != tank.id {
            return Err(CoreError::LotNotInTank {
                lot_id: lot.id,
                tank_id: tank.id,
            }
            .into());
        }

        let available = stranded_volume(&lot);
        if self.orphaned_volume > available {
            return Err(CoreError::OrphanMismatch {
                lot_id: lot.id,
                requested: self.orphaned_volume,
                available,
            }
            .into());
        }

        ctx.enlist(&mut *conn, &tank.id).await?;
        let candidates = LotRepository::new(&mut *conn)
            .list_reconciliation_candidates(&tank.fuel_type, &tank.id)
            .await?;
        let plan = reconcile::plan(&tank, &lot, self.orphaned_volume, &candidates)?;

        let result = apply(&mut *conn, ctx, &plan, self.note.clone()).await?;
        ctx.record(
            &tank.id,
            Movement {
                mass: plan.equivalent_mass,
                volume: plan.volume,
                declaration_ref: Some(plan.source_declaration_ref.clone()),
                counterpart_tank_id: Some(plan.target_tank_id.clone()),
            },
        );
        Ok(result)
    }
}

/// Applies a plan inside the caller's transaction.
///
/// The source lot must already hold the orphaned volume as stranded volume.
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    ctx: &mut OperationContext,
    plan: &ReconciliationPlan,
    note: Option<String>,
) -> LedgerResult<ReconciliationResult> {
    let now = ctx.now();
    ctx.enlist(&mut *conn, &plan.target_tank_id).await?;

    // 1. Sever the orphan into a reserve record
    let mut source_lot = load_lot(&mut *conn, &plan.source_lot_id).await?;
    let available = stranded_volume(&source_lot);
    if plan.volume > available {
        return Err(CoreError::OrphanMismatch {
            lot_id: source_lot.id,
            requested: plan.volume,
            available,
        }
        .into());
    }
    source_lot.remaining_volume -= plan.volume;
    source_lot.updated_at = now;
    LotRepository::new(&mut *conn).update_remaining(&source_lot).await?;

    let mobile = load_tank(&mut *conn, &plan.source_tank_id).await?;
    let reserve_record = ReserveFuelRecord {
        id: ctx.next_id(),
        correlation_id: ctx.correlation_id().to_string(),
        tank_id: mobile.id.clone(),
        tank_kind: mobile.kind,
        source_declaration_ref: plan.source_declaration_ref.clone(),
        source_lot_id: plan.source_lot_id.clone(),
        volume: plan.volume,
        is_excess: true,
        note,
        created_at: now,
    };
    ReserveRepository::new(&mut *conn).insert(&reserve_record).await?;
    TankRepository::new(&mut *conn)
        .apply_delta(&mobile.id, Mass::zero(), -plan.volume, now)
        .await?;

    // 2. Take the same volume from the target lot at its own density
    let mut target_lot = load_lot(&mut *conn, &plan.target_lot_id).await?;
    if !qualifies(&target_lot, plan.volume) {
        return Err(CoreError::ReconciliationUnavailable {
            tank_id: mobile.id,
            fuel_type: mobile.fuel_type,
            volume: plan.volume,
        }
        .into());
    }
    target_lot.remaining_volume -= plan.volume;
    target_lot.remaining_mass -= plan.equivalent_mass;
    target_lot.updated_at = now;
    LotRepository::new(&mut *conn).update_remaining(&target_lot).await?;
    TankRepository::new(&mut *conn)
        .apply_delta(&plan.target_tank_id, -plan.equivalent_mass, -plan.volume, now)
        .await?;

    // 3. Substitute lot in the mobile tank under the target's declaration
    let (substitute_lot, merged) = LotRepository::new(&mut *conn)
        .create_or_merge(
            &NewLot {
                id: ctx.next_id(),
                tank_id: mobile.id.clone(),
                declaration_ref: plan.target_declaration_ref.clone(),
                mass: plan.equivalent_mass,
                volume: plan.volume,
                density: plan.target_density,
                received_at: plan.target_received_at,
                source_intake_id: target_lot.source_intake_id.clone(),
            },
            now,
        )
        .await?;
    TankRepository::new(&mut *conn)
        .apply_delta(&mobile.id, plan.equivalent_mass, plan.volume, now)
        .await?;

    // 4. Link target lot → substitute lot
    TransferRepository::new(&mut *conn)
        .insert(&LotTransfer {
            id: ctx.next_id(),
            correlation_id: ctx.correlation_id().to_string(),
            kind: OperationKind::Reconciliation,
            source_tank_id: plan.target_tank_id.clone(),
            source_lot_id: plan.target_lot_id.clone(),
            source_declaration_ref: plan.target_declaration_ref.clone(),
            target_tank_id: mobile.id.clone(),
            target_lot_id: substitute_lot.id.clone(),
            target_declaration_ref: substitute_lot.declaration_ref.clone(),
            mass: plan.equivalent_mass,
            volume: plan.volume,
            created_at: now,
        })
        .await?;

    ctx.record(
        &plan.target_tank_id,
        Movement {
            mass: plan.equivalent_mass,
            volume: plan.volume,
            declaration_ref: Some(plan.target_declaration_ref.clone()),
            counterpart_tank_id: Some(mobile.id.clone()),
        },
    );

    info!(
        correlation_id = %ctx.correlation_id(),
        mobile_tank_id = %mobile.id,
        source_lot_id = %plan.source_lot_id,
        target_tank_id = %plan.target_tank_id,
        target_lot_id = %plan.target_lot_id,
        volume = %plan.volume,
        mass = %plan.equivalent_mass,
        "Orphaned volume reconciled"
    );

    Ok(ReconciliationResult {
        correlation_id: ctx.correlation_id().to_string(),
        plan: plan.clone(),
        reserve_record,
        substitute_lot,
        merged,
    })
}
