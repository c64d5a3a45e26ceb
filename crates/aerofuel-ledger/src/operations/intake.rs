//! Intake: fuel entering a tank under a customs declaration.

use aerofuel_core::validation::{
    validate_capacity, validate_declaration_ref, validate_positive_mass, validate_positive_volume,
};
use aerofuel_core::{CoreError, Density, FuelLot, Mass, Volume};
use aerofuel_db::{LotRepository, NewLot, TankRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::load_tank;
use crate::coordinator::{FuelOperation, Movement, OperationContext};
use crate::error::LedgerResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intake {
    pub tank_id: String,
    pub declaration_ref: String,
    pub mass: Mass,
    pub volume: Volume,
    /// Measured at receipt. Out-of-band values are replaced by the default.
    pub density: Density,
    /// FIFO position. Defaults to the operation's clock reading.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_intake_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeResult {
    pub correlation_id: String,
    pub lot: FuelLot,
    /// Merged into an existing lot with the same declaration reference.
    pub merged: bool,
    /// The rejected density, when the default was recorded instead.
    pub rejected_density: Option<Density>,
}

impl FuelOperation for Intake {
    type Output = IntakeResult;

    async fn execute(&self, conn: &mut SqliteConnection, ctx: &mut OperationContext) -> LedgerResult<IntakeResult> {
        validate_declaration_ref(&self.declaration_ref)?;
        validate_positive_mass("mass", self.mass)?;
        validate_positive_volume("volume", self.volume)?;

        let tank = load_tank(&mut *conn, &self.tank_id).await?;
        validate_capacity(&tank, self.volume)?;
        ctx.enlist(&mut *conn, &tank.id).await?;

        let sanitized = ctx.density_band().sanitize(self.density);
        if let Some(rejected) = sanitized.rejected {
            let reported = CoreError::InvalidDensity {
                value: rejected,
                substituted: sanitized.density,
            };
            warn!(
                correlation_id = %ctx.correlation_id(),
                tank_id = %tank.id,
                declaration_ref = %self.declaration_ref,
                "{}", reported
            );
        }

        let now = ctx.now();
        let new_lot = NewLot {
            id: ctx.next_id(),
            tank_id: tank.id.clone(),
            declaration_ref: self.declaration_ref.clone(),
            mass: self.mass,
            volume: self.volume,
            density: sanitized.density,
            received_at: self.received_at.unwrap_or(now),
            source_intake_id: self.source_intake_id.clone(),
        };
        let (lot, merged) = LotRepository::new(&mut *conn).create_or_merge(&new_lot, now).await?;
        TankRepository::new(&mut *conn)
            .apply_delta(&tank.id, self.mass, self.volume, now)
            .await?;

        ctx.record(
            &tank.id,
            Movement {
                mass: self.mass,
                volume: self.volume,
                declaration_ref: Some(self.declaration_ref.clone()),
                counterpart_tank_id: None,
            },
        );

        info!(
            correlation_id = %ctx.correlation_id(),
            tank_id = %tank.id,
            lot_id = %lot.id,
            declaration_ref = %lot.declaration_ref,
            mass = %self.mass,
            volume = %self.volume,
            merged,
            "Fuel received"
        );

        Ok(IntakeResult {
            correlation_id: ctx.correlation_id().to_string(),
            lot,
            merged,
            rejected_density: sanitized.rejected,
        })
    }
}
