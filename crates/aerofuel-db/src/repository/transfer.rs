//! # Transfer Repository
//!
//! Append-only links from a source lot to the lot that received its fuel.
//! Written by tank-to-tank transfers (one row per source lot) and by
//! reconciliation substitutions.

use aerofuel_core::{LotTransfer, OperationKind};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::{parse_mass, parse_volume};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: String,
    correlation_id: String,
    kind: OperationKind,
    source_tank_id: String,
    source_lot_id: String,
    source_declaration_ref: String,
    target_tank_id: String,
    target_lot_id: String,
    target_declaration_ref: String,
    mass: String,
    volume: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for LotTransfer {
    type Error = DbError;

    fn try_from(row: TransferRow) -> DbResult<Self> {
        Ok(LotTransfer {
            mass: parse_mass("lot_transfers.mass", &row.mass)?,
            volume: parse_volume("lot_transfers.volume", &row.volume)?,
            id: row.id,
            correlation_id: row.correlation_id,
            kind: row.kind,
            source_tank_id: row.source_tank_id,
            source_lot_id: row.source_lot_id,
            source_declaration_ref: row.source_declaration_ref,
            target_tank_id: row.target_tank_id,
            target_lot_id: row.target_lot_id,
            target_declaration_ref: row.target_declaration_ref,
            created_at: row.created_at,
        })
    }
}

/// Repository for lot transfer links.
#[derive(Debug)]
pub struct TransferRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TransferRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TransferRepository { conn }
    }

    pub async fn insert(&mut self, transfer: &LotTransfer) -> DbResult<()> {
        debug!(
            source_lot_id = %transfer.source_lot_id,
            target_lot_id = %transfer.target_lot_id,
            mass = %transfer.mass,
            volume = %transfer.volume,
            "Recording lot transfer"
        );

        sqlx::query(
            r#"
            INSERT INTO lot_transfers (
                id, correlation_id, kind,
                source_tank_id, source_lot_id, source_declaration_ref,
                target_tank_id, target_lot_id, target_declaration_ref,
                mass, volume, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.correlation_id)
        .bind(transfer.kind)
        .bind(&transfer.source_tank_id)
        .bind(&transfer.source_lot_id)
        .bind(&transfer.source_declaration_ref)
        .bind(&transfer.target_tank_id)
        .bind(&transfer.target_lot_id)
        .bind(&transfer.target_declaration_ref)
        .bind(transfer.mass.value().to_string())
        .bind(transfer.volume.value().to_string())
        .bind(transfer.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// All links written by one operation, in insertion order.
    pub async fn list_by_correlation(&mut self, correlation_id: &str) -> DbResult<Vec<LotTransfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, correlation_id, kind,
                   source_tank_id, source_lot_id, source_declaration_ref,
                   target_tank_id, target_lot_id, target_declaration_ref,
                   mass, volume, created_at
            FROM lot_transfers
            WHERE correlation_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(LotTransfer::try_from).collect()
    }
}
