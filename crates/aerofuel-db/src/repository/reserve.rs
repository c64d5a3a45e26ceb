//! # Reserve Repository
//!
//! Append-only store of volume severed from mass-exhausted lots.

use aerofuel_core::{ReserveFuelRecord, TankKind};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::parse_volume;
use crate::error::{DbError, DbResult};

const RESERVE_COLUMNS: &str = "id, correlation_id, tank_id, tank_kind, source_declaration_ref, \
                               source_lot_id, volume, is_excess, note, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ReserveRow {
    id: String,
    correlation_id: String,
    tank_id: String,
    tank_kind: TankKind,
    source_declaration_ref: String,
    source_lot_id: String,
    volume: String,
    is_excess: bool,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReserveRow> for ReserveFuelRecord {
    type Error = DbError;

    fn try_from(row: ReserveRow) -> DbResult<Self> {
        Ok(ReserveFuelRecord {
            volume: parse_volume("reserve_fuel_records.volume", &row.volume)?,
            id: row.id,
            correlation_id: row.correlation_id,
            tank_id: row.tank_id,
            tank_kind: row.tank_kind,
            source_declaration_ref: row.source_declaration_ref,
            source_lot_id: row.source_lot_id,
            is_excess: row.is_excess,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

/// Repository for reserve fuel records.
#[derive(Debug)]
pub struct ReserveRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ReserveRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ReserveRepository { conn }
    }

    /// Records severed volume. Rows are never updated afterwards.
    pub async fn insert(&mut self, record: &ReserveFuelRecord) -> DbResult<()> {
        debug!(
            tank_id = %record.tank_id,
            lot_id = %record.source_lot_id,
            volume = %record.volume,
            correlation_id = %record.correlation_id,
            "Recording reserve fuel"
        );

        sqlx::query(
            r#"
            INSERT INTO reserve_fuel_records (
                id, correlation_id, tank_id, tank_kind, source_declaration_ref,
                source_lot_id, volume, is_excess, note, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&record.id)
        .bind(&record.correlation_id)
        .bind(&record.tank_id)
        .bind(record.tank_kind)
        .bind(&record.source_declaration_ref)
        .bind(&record.source_lot_id)
        .bind(record.volume.value().to_string())
        .bind(record.is_excess)
        .bind(&record.note)
        .bind(record.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Records for one tank, newest first.
    pub async fn list_for_tank(&mut self, tank_id: &str) -> DbResult<Vec<ReserveFuelRecord>> {
        let sql = format!(
            "SELECT {RESERVE_COLUMNS} FROM reserve_fuel_records \
             WHERE tank_id = ?1 ORDER BY created_at DESC, rowid DESC"
        );
        let rows = sqlx::query_as::<_, ReserveRow>(&sql)
            .bind(tank_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(ReserveFuelRecord::try_from).collect()
    }

    /// Records severed from one lot.
    pub async fn list_for_lot(&mut self, lot_id: &str) -> DbResult<Vec<ReserveFuelRecord>> {
        let sql = format!(
            "SELECT {RESERVE_COLUMNS} FROM reserve_fuel_records \
             WHERE source_lot_id = ?1 ORDER BY created_at, rowid"
        );
        let rows = sqlx::query_as::<_, ReserveRow>(&sql)
            .bind(lot_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(ReserveFuelRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::lot::{LotRepository, NewLot};
    use crate::repository::test_support::{database, t0, tank};
    use aerofuel_core::{Density, Mass, Volume};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_insert_and_list() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let trk = tank(&mut conn, "TRK-1", TankKind::Mobile).await;
        let (lot, _) = LotRepository::new(&mut conn)
            .create_or_merge(
                &NewLot {
                    id: "lot-1".to_string(),
                    tank_id: trk.id.clone(),
                    declaration_ref: "MRN-1".to_string(),
                    mass: Mass::from_whole(80),
                    volume: Volume::from_whole(100),
                    density: Density::new(dec!(0.8)),
                    received_at: t0(),
                    source_intake_id: None,
                },
                t0(),
            )
            .await
            .unwrap();

        let record = ReserveFuelRecord {
            id: "r-1".to_string(),
            correlation_id: "c-1".to_string(),
            tank_id: trk.id.clone(),
            tank_kind: TankKind::Mobile,
            source_declaration_ref: lot.declaration_ref.clone(),
            source_lot_id: lot.id.clone(),
            volume: Volume::new(dec!(2.345)),
            is_excess: true,
            note: Some("orphaned after drift".to_string()),
            created_at: t0(),
        };

        let mut repo = ReserveRepository::new(&mut conn);
        repo.insert(&record).await.unwrap();

        assert_eq!(repo.list_for_tank(&trk.id).await.unwrap(), vec![record.clone()]);
        assert_eq!(repo.list_for_lot("lot-1").await.unwrap(), vec![record]);
        assert!(repo.list_for_tank("other").await.unwrap().is_empty());
    }
}
