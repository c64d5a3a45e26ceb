//! Administrative correction of one lot's remaining quantities. The owning
//! tank's declared totals move by the same signed delta, so a consistent tank
//! stays consistent.

use aerofuel_core::validation::validate_required;
use aerofuel_core::{CoreError, FuelLot, Mass, Volume};
use aerofuel_db::{LotRepository, TankRepository};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::load_lot;
use crate::coordinator::{FuelOperation, Movement, OperationContext};
use crate::error::LedgerResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustLot {
    pub lot_id: String,
    pub remaining_mass: Mass,
    pub remaining_volume: Volume,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjustmentResult {
    pub correlation_id: String,
    pub lot: FuelLot,
    /// New minus old; negative when fuel was written off.
    pub mass_delta: Mass,
    pub volume_delta: Volume,
}

impl AdjustLot {
    fn check_bounds(&self, lot: &FuelLot) -> LedgerResult<()> {
        let reason = if self.remaining_mass.is_negative() || self.remaining_volume.is_negative() {
            Some("remaining quantities must not be negative".to_string())
        } else if self.remaining_mass > lot.original_mass {
            Some(format!(
                "remaining mass {} exceeds original {}",
                self.remaining_mass, lot.original_mass
            ))
        } else if self.remaining_volume > lot.original_volume {
            Some(format!(
                "remaining volume {} exceeds original {}",
                self.remaining_volume, lot.original_volume
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CoreError::InvalidAdjustment {
                lot_id: lot.id.clone(),
                reason,
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl FuelOperation for AdjustLot {
    type Output = AdjustmentResult;

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        ctx: &mut OperationContext,
    ) -> LedgerResult<AdjustmentResult> {
        validate_required("reason", &self.reason)?;

        let mut lot = load_lot(&mut *conn, &self.lot_id).await?;
        self.check_bounds(&lot)?;
        ctx.enlist(&mut *conn, &lot.tank_id).await?;

        let now = ctx.now();
        let mass_delta = self.remaining_mass - lot.remaining_mass;
        let volume_delta = self.remaining_volume - lot.remaining_volume;

        lot.remaining_mass = self.remaining_mass;
        lot.remaining_volume = self.remaining_volume;
        lot.updated_at = now;
        LotRepository::new(&mut *conn).update_remaining(&lot).await?;
        TankRepository::new(&mut *conn)
            .apply_delta(&lot.tank_id, mass_delta, volume_delta, now)
            .await?;

        ctx.record(
            &lot.tank_id,
            Movement {
                mass: mass_delta,
                volume: volume_delta,
                declaration_ref: Some(lot.declaration_ref.clone()),
                counterpart_tank_id: None,
            },
        );

        info!(
            correlation_id = %ctx.correlation_id(),
            tank_id = %lot.tank_id,
            lot_id = %lot.id,
            mass_delta = %mass_delta,
            volume_delta = %volume_delta,
            reason = %self.reason,
            actor = %ctx.actor(),
            "Lot adjusted"
        );

        Ok(AdjustmentResult {
            correlation_id: ctx.correlation_id().to_string(),
            lot,
            mass_delta,
            volume_delta,
        })
    }
}
