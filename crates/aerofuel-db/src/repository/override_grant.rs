//! # Override Repository
//!
//! Persisted consistency overrides.
//!
//! ```text
//! grant(tank, kind, ttl) ──► row (expires_at = now + ttl)
//!                                │
//! pre-check fails ──► find_active(tank, kind, now) in the SAME transaction
//!                                │
//!                   found ──► proceed        none ──► ConsistencyViolation
//! ```
//!
//! Expiry is compared in Rust against the injected clock.

use aerofuel_core::{ConsistencyOverride, OperationKind};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    id: String,
    tank_id: String,
    kind: OperationKind,
    granted_by: String,
    reason: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<OverrideRow> for ConsistencyOverride {
    fn from(row: OverrideRow) -> Self {
        ConsistencyOverride {
            id: row.id,
            tank_id: row.tank_id,
            kind: row.kind,
            granted_by: row.granted_by,
            reason: row.reason,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

/// Repository for consistency overrides.
#[derive(Debug)]
pub struct OverrideRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> OverrideRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        OverrideRepository { conn }
    }

    pub async fn insert(&mut self, grant: &ConsistencyOverride) -> DbResult<()> {
        debug!(
            tank_id = %grant.tank_id,
            kind = %grant.kind,
            expires_at = %grant.expires_at,
            "Granting consistency override"
        );

        sqlx::query(
            r#"
            INSERT INTO consistency_overrides (
                id, tank_id, kind, granted_by, reason, expires_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&grant.id)
        .bind(&grant.tank_id)
        .bind(grant.kind)
        .bind(&grant.granted_by)
        .bind(&grant.reason)
        .bind(grant.expires_at)
        .bind(grant.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    async fn list_for_tank(&mut self, tank_id: &str) -> DbResult<Vec<ConsistencyOverride>> {
        let rows = sqlx::query_as::<_, OverrideRow>(
            r#"
            SELECT id, tank_id, kind, granted_by, reason, expires_at, created_at
            FROM consistency_overrides
            WHERE tank_id = ?1
            "#,
        )
        .bind(tank_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(ConsistencyOverride::from).collect())
    }

    /// The override that expires last among those active for `(tank, kind)`.
    pub async fn find_active(
        &mut self,
        tank_id: &str,
        kind: OperationKind,
        now: DateTime<Utc>,
    ) -> DbResult<Option<ConsistencyOverride>> {
        let grants = self.list_for_tank(tank_id).await?;
        Ok(grants
            .into_iter()
            .filter(|g| g.kind == kind && g.is_active(now))
            .max_by_key(|g| g.expires_at))
    }

    /// Expires every active override of a tank. Returns how many were active.
    pub async fn revoke_for_tank(&mut self, tank_id: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let active: Vec<_> = self
            .list_for_tank(tank_id)
            .await?
            .into_iter()
            .filter(|g| g.is_active(now))
            .collect();

        for grant in &active {
            sqlx::query("UPDATE consistency_overrides SET expires_at = ?2 WHERE id = ?1")
                .bind(&grant.id)
                .bind(now)
                .execute(&mut *self.conn)
                .await?;
        }

        debug!(tank_id = %tank_id, revoked = active.len(), "Revoked consistency overrides");
        Ok(active.len() as u64)
    }
}
