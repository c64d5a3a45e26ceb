//! Tank-to-tank transfer. The source side is an ordinary FIFO withdrawal;
//! every source lot it touched lands in the target as a lot under the same
//! declaration reference, density and receipt time.

use aerofuel_core::validation::validate_capacity;
use aerofuel_core::{CoreError, FuelLot, LotTransfer, RequestedQuantity, ValidationError};
use aerofuel_db::{LotRepository, NewLot, TankRepository, TransferRepository};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::consume::{self, Withdrawal};
use super::{load_lot, load_tank};
use crate::coordinator::{FuelOperation, Movement, OperationContext};
use crate::error::LedgerResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub source_tank_id: String,
    pub target_tank_id: String,
    pub quantity: RequestedQuantity,
    #[serde(default)]
    pub allow_partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub correlation_id: String,
    pub source_tank_id: String,
    pub target_tank_id: String,
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    /// Lots in the target tank, one per source lot, in FIFO order.
    pub target_lots: Vec<FuelLot>,
    pub links: Vec<LotTransfer>,
}

impl FuelOperation for Transfer {
    type Output = TransferResult;

    async fn execute(&self, conn: &mut SqliteConnection, ctx: &mut OperationContext) -> LedgerResult<TransferResult> {
        if self.source_tank_id == self.target_tank_id {
            return Err(ValidationError::SameTank(self.source_tank_id.clone()).into());
        }

        let source = load_tank(&mut *conn, &self.source_tank_id).await?;
        let target = load_tank(&mut *conn, &self.target_tank_id).await?;
        if source.fuel_type != target.fuel_type {
            return Err(CoreError::FuelTypeMismatch {
                source_tank_id: source.id,
                source_fuel: source.fuel_type,
                target_tank_id: target.id,
                target_fuel: target.fuel_type,
            }
            .into());
        }
        ctx.enlist(&mut *conn, &source.id).await?;
        ctx.enlist(&mut *conn, &target.id).await?;

        let planned = consume::plan(&mut *conn, ctx, source, self.quantity, self.allow_partial).await?;
        validate_capacity(&target, planned.deduction.deducted_volume)?;
        let withdrawal = consume::apply(&mut *conn, ctx, planned).await?;

        let now = ctx.now();
        let mut target_lots = Vec::with_capacity(withdrawal.per_lot.len());
        let mut links = Vec::with_capacity(withdrawal.per_lot.len());
        for detail in &withdrawal.per_lot {
            let source_lot = match withdrawal.lots.iter().find(|l| l.id == detail.lot_id) {
                Some(lot) => lot.clone(),
                None => load_lot(&mut *conn, &detail.lot_id).await?,
            };

            let (target_lot, _) = LotRepository::new(&mut *conn)
                .create_or_merge(
                    &NewLot {
                        id: ctx.next_id(),
                        tank_id: target.id.clone(),
                        declaration_ref: source_lot.declaration_ref.clone(),
                        mass: detail.mass_deducted,
                        volume: detail.volume_deducted,
                        density: source_lot.density,
                        received_at: source_lot.received_at,
                        source_intake_id: source_lot.source_intake_id.clone(),
                    },
                    now,
                )
                .await?;

            let link = LotTransfer {
                id: ctx.next_id(),
                correlation_id: ctx.correlation_id().to_string(),
                kind: ctx.kind(),
                source_tank_id: self.source_tank_id.clone(),
                source_lot_id: source_lot.id.clone(),
                source_declaration_ref: source_lot.declaration_ref.clone(),
                target_tank_id: target.id.clone(),
                target_lot_id: target_lot.id.clone(),
                target_declaration_ref: target_lot.declaration_ref.clone(),
                mass: detail.mass_deducted,
                volume: detail.volume_deducted,
                created_at: now,
            };
            TransferRepository::new(&mut *conn).insert(&link).await?;

            target_lots.push(target_lot);
            links.push(link);
        }

        TankRepository::new(&mut *conn)
            .apply_delta(&target.id, withdrawal.deducted_mass, withdrawal.deducted_volume, now)
            .await?;

        let declaration_ref = match withdrawal.per_lot.as_slice() {
            [only] => Some(only.declaration_ref.clone()),
            _ => None,
        };
        let movement = Movement {
            mass: withdrawal.deducted_mass,
            volume: withdrawal.deducted_volume,
            declaration_ref,
            counterpart_tank_id: None,
        };
        ctx.record(
            &self.source_tank_id,
            Movement {
                counterpart_tank_id: Some(target.id.clone()),
                ..movement.clone()
            },
        );
        ctx.record(
            &target.id,
            Movement {
                counterpart_tank_id: Some(self.source_tank_id.clone()),
                ..movement
            },
        );

        info!(
            correlation_id = %ctx.correlation_id(),
            source_tank_id = %self.source_tank_id,
            target_tank_id = %target.id,
            mass = %withdrawal.deducted_mass,
            volume = %withdrawal.deducted_volume,
            lots = links.len(),
            "Fuel transferred"
        );

        Ok(TransferResult {
            correlation_id: ctx.correlation_id().to_string(),
            source_tank_id: self.source_tank_id.clone(),
            target_tank_id: target.id,
            withdrawal,
            target_lots,
            links,
        })
    }
}
