//! # Lot Repository (the Lot Ledger)
//!
//! Owns the lot lifecycle: create-or-merge on intake and substitution,
//! FIFO listings for consumption, and remaining-quantity updates.
//!
//! ## Create-or-Merge
//! ```text
//! create_or_merge(tank, "MRN-1", 800 kg, 1000 L, 0.8)
//!      │
//!      ├── lot (tank, "MRN-1") exists? ──yes──► original += , remaining +=
//!      │                                        (density, received_at kept)
//!      └── no ──► INSERT with remaining = original
//! ```
//!
//! ## FIFO Contract
//! Every listing is returned in `(received_at, created_at, id)` order,
//! oldest first. Sorting happens in Rust on parsed timestamps so the order
//! never depends on how timestamps were rendered as text.
//!
//! ## Lot State
//! ```text
//! active ──(mass reaches 0, volume left)──► stranded ──park_orphan──► parked
//!    │                                          │                       │
//!    └──────(nothing left)──► empty ◄───────────┴──── any write ────────┘
//!                                                  recomputes the state
//! ```
//! `lot_state` is derived from the quantities on every write so listings can
//! filter in SQL instead of loading every lot ever received. Parked lots
//! already had their orphan reported; FIFO walks skip them and only the
//! sweeper picks them up.

use aerofuel_core::{sort_fifo, Density, FuelLot, Mass, TankKind, Volume};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::{parse_density, parse_mass, parse_volume};
use crate::error::{DbError, DbResult};

const LOT_COLUMNS: &str = "l.id, l.tank_id, l.declaration_ref, l.original_mass, l.original_volume, \
                           l.remaining_mass, l.remaining_volume, l.density, l.received_at, \
                           l.source_intake_id, l.created_at, l.updated_at";

#[derive(Debug, sqlx::FromRow)]
struct LotRow {
    id: String,
    tank_id: String,
    declaration_ref: String,
    original_mass: String,
    original_volume: String,
    remaining_mass: String,
    remaining_volume: String,
    density: String,
    received_at: DateTime<Utc>,
    source_intake_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LotRow> for FuelLot {
    type Error = DbError;

    fn try_from(row: LotRow) -> DbResult<Self> {
        Ok(FuelLot {
            original_mass: parse_mass("fuel_lots.original_mass", &row.original_mass)?,
            original_volume: parse_volume("fuel_lots.original_volume", &row.original_volume)?,
            remaining_mass: parse_mass("fuel_lots.remaining_mass", &row.remaining_mass)?,
            remaining_volume: parse_volume("fuel_lots.remaining_volume", &row.remaining_volume)?,
            density: parse_density("fuel_lots.density", &row.density)?,
            id: row.id,
            tank_id: row.tank_id,
            declaration_ref: row.declaration_ref,
            received_at: row.received_at,
            source_intake_id: row.source_intake_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// State column value for a lot's current quantities.
fn lot_state(lot: &FuelLot) -> &'static str {
    if lot.is_active() {
        "active"
    } else if lot.has_stranded_volume() {
        "stranded"
    } else {
        "empty"
    }
}

fn into_fifo(rows: Vec<LotRow>) -> DbResult<Vec<FuelLot>> {
    let mut lots = rows
        .into_iter()
        .map(FuelLot::try_from)
        .collect::<DbResult<Vec<_>>>()?;
    sort_fifo(&mut lots);
    Ok(lots)
}

/// Input for [`LotRepository::create_or_merge`].
#[derive(Debug, Clone)]
pub struct NewLot {
    /// Id used only when a new row is inserted.
    pub id: String,
    pub tank_id: String,
    pub declaration_ref: String,
    pub mass: Mass,
    pub volume: Volume,
    pub density: Density,
    pub received_at: DateTime<Utc>,
    pub source_intake_id: Option<String>,
}

/// Repository for fuel lot operations.
#[derive(Debug)]
pub struct LotRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> LotRepository<'c> {
    /// Creates a new LotRepository on a borrowed connection.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        LotRepository { conn }
    }

    /// Inserts a lot row as-is.
    pub async fn insert(&mut self, lot: &FuelLot) -> DbResult<()> {
        debug!(lot_id = %lot.id, tank_id = %lot.tank_id, declaration_ref = %lot.declaration_ref, "Inserting lot");

        sqlx::query(
            r#"
            INSERT INTO fuel_lots (
                id, tank_id, declaration_ref,
                original_mass, original_volume, remaining_mass, remaining_volume,
                density, received_at, source_intake_id, created_at, updated_at, lot_state
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&lot.id)
        .bind(&lot.tank_id)
        .bind(&lot.declaration_ref)
        .bind(lot.original_mass.value().to_string())
        .bind(lot.original_volume.value().to_string())
        .bind(lot.remaining_mass.value().to_string())
        .bind(lot.remaining_volume.value().to_string())
        .bind(lot.density.value().to_string())
        .bind(lot.received_at)
        .bind(&lot.source_intake_id)
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .bind(lot_state(lot))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Gets a lot by id.
    pub async fn get(&mut self, id: &str) -> DbResult<Option<FuelLot>> {
        let sql = format!("SELECT {LOT_COLUMNS} FROM fuel_lots l WHERE l.id = ?1");
        let row = sqlx::query_as::<_, LotRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(FuelLot::try_from).transpose()
    }

    /// Gets a lot by id or fails with `NotFound`.
    pub async fn require(&mut self, id: &str) -> DbResult<FuelLot> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Lot", id))
    }

    /// Finds the lot for a declaration reference within one tank.
    pub async fn find_by_ref(
        &mut self,
        tank_id: &str,
        declaration_ref: &str,
    ) -> DbResult<Option<FuelLot>> {
        let sql = format!(
            "SELECT {LOT_COLUMNS} FROM fuel_lots l WHERE l.tank_id = ?1 AND l.declaration_ref = ?2"
        );
        let row = sqlx::query_as::<_, LotRow>(&sql)
            .bind(tank_id)
            .bind(declaration_ref)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(FuelLot::try_from).transpose()
    }

    /// Every lot of a tank, exhausted ones included, in FIFO order.
    pub async fn list_for_tank(&mut self, tank_id: &str) -> DbResult<Vec<FuelLot>> {
        let sql = format!(
            "SELECT {LOT_COLUMNS} FROM fuel_lots l WHERE l.tank_id = ?1 ORDER BY l.received_at, l.created_at, l.id"
        );
        let rows = sqlx::query_as::<_, LotRow>(&sql)
            .bind(tank_id)
            .fetch_all(&mut *self.conn)
            .await?;

        into_fifo(rows)
    }

    /// Lots of a tank in the given states, oldest first.
    async fn list_in_states(&mut self, tank_id: &str, states: &str) -> DbResult<Vec<FuelLot>> {
        let sql = format!(
            "SELECT {LOT_COLUMNS} FROM fuel_lots l WHERE l.tank_id = ?1 AND l.lot_state IN ({states})"
        );
        let rows = sqlx::query_as::<_, LotRow>(&sql)
            .bind(tank_id)
            .fetch_all(&mut *self.conn)
            .await?;

        into_fifo(rows)
    }

    /// Lots with `remaining_mass > 0`, oldest first.
    pub async fn list_active(&mut self, tank_id: &str) -> DbResult<Vec<FuelLot>> {
        let mut lots = self.list_in_states(tank_id, "'active'").await?;
        lots.retain(FuelLot::is_active);
        Ok(lots)
    }

    /// Lots the FIFO engine walks: active ones plus mass-exhausted lots whose
    /// stranded volume has not been reported yet. Parked lots are left out.
    pub async fn list_consumable(&mut self, tank_id: &str) -> DbResult<Vec<FuelLot>> {
        let mut lots = self.list_in_states(tank_id, "'active', 'stranded'").await?;
        lots.retain(|l| l.is_active() || l.has_stranded_volume());
        Ok(lots)
    }

    /// Active lots in fixed tanks of `fuel_type`, excluding one tank.
    ///
    /// Feeds reconciliation target selection.
    pub async fn list_reconciliation_candidates(
        &mut self,
        fuel_type: &str,
        exclude_tank_id: &str,
    ) -> DbResult<Vec<FuelLot>> {
        let sql = format!(
            "SELECT {LOT_COLUMNS} FROM fuel_lots l \
             JOIN tanks t ON t.id = l.tank_id \
             WHERE t.kind = ?1 AND t.fuel_type = ?2 AND t.id <> ?3 AND l.lot_state = 'active'"
        );
        let rows = sqlx::query_as::<_, LotRow>(&sql)
            .bind(TankKind::Fixed)
            .bind(fuel_type)
            .bind(exclude_tank_id)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut lots = into_fifo(rows)?;
        lots.retain(FuelLot::is_active);
        Ok(lots)
    }

    /// Stranded or parked lots in mobile tanks, oldest first.
    ///
    /// Pages by FIFO key: pass the last lot of the previous page as `after`
    /// to continue behind it.
    pub async fn list_stranded_in_mobile(
        &mut self,
        after: Option<&FuelLot>,
        limit: usize,
    ) -> DbResult<Vec<FuelLot>> {
        let sql = format!(
            "SELECT {LOT_COLUMNS} FROM fuel_lots l \
             JOIN tanks t ON t.id = l.tank_id \
             WHERE t.kind = ?1 AND l.lot_state IN ('stranded', 'parked')"
        );
        let rows = sqlx::query_as::<_, LotRow>(&sql)
            .bind(TankKind::Mobile)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut lots = into_fifo(rows)?;
        lots.retain(FuelLot::has_stranded_volume);
        if let Some(after) = after {
            lots.retain(|l| l.fifo_key() > after.fifo_key());
        }
        lots.truncate(limit);
        Ok(lots)
    }

    /// Marks a stranded lot's orphan as reported and left for the sweeper.
    ///
    /// Returns `false` when the lot was not stranded.
    pub async fn park_orphan(&mut self, lot_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        debug!(lot_id = %lot_id, "Parking stranded lot");

        let result = sqlx::query(
            "UPDATE fuel_lots SET lot_state = 'parked', updated_at = ?2 \
             WHERE id = ?1 AND lot_state = 'stranded'",
        )
        .bind(lot_id)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Writes a lot's remaining quantities.
    pub async fn update_remaining(&mut self, lot: &FuelLot) -> DbResult<()> {
        debug!(
            lot_id = %lot.id,
            remaining_mass = %lot.remaining_mass,
            remaining_volume = %lot.remaining_volume,
            "Updating lot remaining"
        );

        let result = sqlx::query(
            r#"
            UPDATE fuel_lots
            SET remaining_mass = ?2, remaining_volume = ?3, updated_at = ?4, lot_state = ?5
            WHERE id = ?1
            "#,
        )
        .bind(&lot.id)
        .bind(lot.remaining_mass.value().to_string())
        .bind(lot.remaining_volume.value().to_string())
        .bind(lot.updated_at)
        .bind(lot_state(lot))
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Lot", &lot.id));
        }

        Ok(())
    }

    /// Writes original and remaining quantities (after a merge).
    async fn update_all_quantities(&mut self, lot: &FuelLot) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE fuel_lots
            SET original_mass = ?2, original_volume = ?3,
                remaining_mass = ?4, remaining_volume = ?5, updated_at = ?6, lot_state = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&lot.id)
        .bind(lot.original_mass.value().to_string())
        .bind(lot.original_volume.value().to_string())
        .bind(lot.remaining_mass.value().to_string())
        .bind(lot.remaining_volume.value().to_string())
        .bind(lot.updated_at)
        .bind(lot_state(lot))
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Lot", &lot.id));
        }

        Ok(())
    }

    /// Adds fuel under a declaration reference, merging into an existing lot
    /// of the same tank when there is one.
    ///
    /// ## Returns
    /// The stored lot and whether it was merged (`true`) or inserted.
    pub async fn create_or_merge(
        &mut self,
        new: &NewLot,
        now: DateTime<Utc>,
    ) -> DbResult<(FuelLot, bool)> {
        if let Some(mut existing) = self.find_by_ref(&new.tank_id, &new.declaration_ref).await? {
            debug!(
                lot_id = %existing.id,
                declaration_ref = %new.declaration_ref,
                mass = %new.mass,
                volume = %new.volume,
                "Merging into existing lot"
            );
            existing.absorb(new.mass, new.volume, now);
            self.update_all_quantities(&existing).await?;
            return Ok((existing, true));
        }

        let lot = FuelLot {
            id: new.id.clone(),
            tank_id: new.tank_id.clone(),
            declaration_ref: new.declaration_ref.clone(),
            original_mass: new.mass,
            original_volume: new.volume,
            remaining_mass: new.mass,
            remaining_volume: new.volume,
            density: new.density,
            received_at: new.received_at,
            source_intake_id: new.source_intake_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.insert(&lot).await?;
        Ok((lot, false))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
