//! # Tank Repository
//!
//! Tank rows and their declared totals.
//!
//! Declared totals are only written by ledger operations, always in the same
//! transaction as the lot changes they summarize.

use aerofuel_core::{Mass, Tank, TankKind, Volume};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::{parse_mass, parse_volume};
use crate::error::{DbError, DbResult};

const TANK_COLUMNS: &str = "id, code, kind, fuel_type, capacity, declared_mass, declared_volume, \
                            created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TankRow {
    id: String,
    code: String,
    kind: TankKind,
    fuel_type: String,
    capacity: String,
    declared_mass: String,
    declared_volume: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TankRow> for Tank {
    type Error = DbError;

    fn try_from(row: TankRow) -> DbResult<Self> {
        Ok(Tank {
            capacity: parse_volume("tanks.capacity", &row.capacity)?,
            declared_mass: parse_mass("tanks.declared_mass", &row.declared_mass)?,
            declared_volume: parse_volume("tanks.declared_volume", &row.declared_volume)?,
            id: row.id,
            code: row.code,
            kind: row.kind,
            fuel_type: row.fuel_type,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for tank operations.
#[derive(Debug)]
pub struct TankRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TankRepository<'c> {
    /// Creates a new TankRepository on a borrowed connection.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TankRepository { conn }
    }

    /// Inserts a new tank.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - code already registered
    pub async fn insert(&mut self, tank: &Tank) -> DbResult<()> {
        debug!(tank_id = %tank.id, code = %tank.code, kind = %tank.kind, "Inserting tank");

        sqlx::query(
            r#"
            INSERT INTO tanks (
                id, code, kind, fuel_type, capacity,
                declared_mass, declared_volume, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&tank.id)
        .bind(&tank.code)
        .bind(tank.kind)
        .bind(&tank.fuel_type)
        .bind(tank.capacity.value().to_string())
        .bind(tank.declared_mass.value().to_string())
        .bind(tank.declared_volume.value().to_string())
        .bind(tank.created_at)
        .bind(tank.updated_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: tank.code.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    /// Gets a tank by id.
    pub async fn get(&mut self, id: &str) -> DbResult<Option<Tank>> {
        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks WHERE id = ?1");
        let row = sqlx::query_as::<_, TankRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(Tank::try_from).transpose()
    }

    /// Gets a tank by id or fails with `NotFound`.
    pub async fn require(&mut self, id: &str) -> DbResult<Tank> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Tank", id))
    }

    /// Gets a tank by its human-readable code.
    pub async fn get_by_code(&mut self, code: &str) -> DbResult<Option<Tank>> {
        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks WHERE code = ?1");
        let row = sqlx::query_as::<_, TankRow>(&sql)
            .bind(code)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(Tank::try_from).transpose()
    }

    /// Lists all tanks ordered by code.
    pub async fn list(&mut self) -> DbResult<Vec<Tank>> {
        let sql = format!("SELECT {TANK_COLUMNS} FROM tanks ORDER BY code");
        let rows = sqlx::query_as::<_, TankRow>(&sql)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Tank::try_from).collect()
    }

    /// Lists tanks of one kind, optionally restricted to a fuel type.
    pub async fn list_by_kind(
        &mut self,
        kind: TankKind,
        fuel_type: Option<&str>,
    ) -> DbResult<Vec<Tank>> {
        let sql = format!(
            "SELECT {TANK_COLUMNS} FROM tanks \
             WHERE kind = ?1 AND (?2 IS NULL OR fuel_type = ?2) ORDER BY code"
        );
        let rows = sqlx::query_as::<_, TankRow>(&sql)
            .bind(kind)
            .bind(fuel_type)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Tank::try_from).collect()
    }

    /// Overwrites the declared totals.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - tank doesn't exist
    pub async fn update_declared(
        &mut self,
        id: &str,
        mass: Mass,
        volume: Volume,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(tank_id = %id, declared_mass = %mass, declared_volume = %volume, "Updating declared totals");

        let result = sqlx::query(
            r#"
            UPDATE tanks
            SET declared_mass = ?2, declared_volume = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(mass.value().to_string())
        .bind(volume.value().to_string())
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Tank", id));
        }

        Ok(())
    }

    /// Moves the declared totals by a signed delta and returns the new tank.
    pub async fn apply_delta(
        &mut self,
        id: &str,
        mass: Mass,
        volume: Volume,
        now: DateTime<Utc>,
    ) -> DbResult<Tank> {
        let mut tank = self.require(id).await?;
        tank.declared_mass += mass;
        tank.declared_volume += volume;
        tank.updated_at = now;
        self.update_declared(id, tank.declared_mass, tank.declared_volume, now)
            .await?;
        Ok(tank)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
