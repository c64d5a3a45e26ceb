//! # Audit Repository
//!
//! The append-only operation log.
//!
//! ## Row Shape
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ correlation_id │ kind │ tank_id │ mass │ volume │ before │ after │ ok │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ c-42           │ transfer │ FT-01 │ 800 │ 1000 │ {json} │ {json} │ 1 │
//! │ c-42           │ transfer │ TRK-7 │ 800 │ 1000 │ {json} │ {json} │ 1 │
//! └──────────────────────────────────────────────────────────────────────┘
//! one row per affected tank, shared correlation id
//! ```
//!
//! UPDATE and DELETE are rejected by triggers in the schema.

use aerofuel_core::{OperationKind, OperationLogEntry, TankSnapshot};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use super::{parse_mass, parse_volume};
use crate::error::{DbError, DbResult};

/// Rows returned when a filter sets no limit.
pub const DEFAULT_LOG_LIMIT: u32 = 100;

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    correlation_id: String,
    kind: OperationKind,
    tank_id: String,
    counterpart_tank_id: Option<String>,
    declaration_ref: Option<String>,
    mass: String,
    volume: String,
    before_snapshot: Option<String>,
    after_snapshot: Option<String>,
    actor: String,
    success: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

fn decode_snapshot(raw: Option<String>) -> DbResult<Option<TankSnapshot>> {
    raw.map(|json| serde_json::from_str(&json).map_err(DbError::from))
        .transpose()
}

fn encode_snapshot(snapshot: &Option<TankSnapshot>) -> DbResult<Option<String>> {
    snapshot
        .as_ref()
        .map(|s| serde_json::to_string(s).map_err(DbError::from))
        .transpose()
}

impl TryFrom<AuditRow> for OperationLogEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> DbResult<Self> {
        Ok(OperationLogEntry {
            mass: parse_mass("operation_log.mass", &row.mass)?,
            volume: parse_volume("operation_log.volume", &row.volume)?,
            before: decode_snapshot(row.before_snapshot)?,
            after: decode_snapshot(row.after_snapshot)?,
            id: row.id,
            correlation_id: row.correlation_id,
            kind: row.kind,
            tank_id: row.tank_id,
            counterpart_tank_id: row.counterpart_tank_id,
            declaration_ref: row.declaration_ref,
            actor: row.actor,
            success: row.success,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Filters for [`AuditRepository::list`]. Unset fields match everything.
///
/// ## Example
/// ```rust
/// use aerofuel_db::OperationLogFilter;
/// use aerofuel_core::OperationKind;
///
/// let filter = OperationLogFilter::default()
///     .tank("tank-1")
///     .kind(OperationKind::Transfer)
///     .failed_only()
///     .limit(20);
/// assert_eq!(filter.success, Some(false));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OperationLogFilter {
    pub tank_id: Option<String>,
    pub kind: Option<OperationKind>,
    pub correlation_id: Option<String>,
    pub actor: Option<String>,
    pub success: Option<bool>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Defaults to [`DEFAULT_LOG_LIMIT`].
    pub limit: Option<u32>,
}

impl OperationLogFilter {
    pub fn tank(mut self, tank_id: impl Into<String>) -> Self {
        self.tank_id = Some(tank_id.into());
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn failed_only(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn succeeded_only(mut self) -> Self {
        self.success = Some(true);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the operation log.
#[derive(Debug)]
pub struct AuditRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AuditRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        AuditRepository { conn }
    }

    /// Appends one entry.
    pub async fn insert(&mut self, entry: &OperationLogEntry) -> DbResult<()> {
        debug!(
            correlation_id = %entry.correlation_id,
            kind = %entry.kind,
            tank_id = %entry.tank_id,
            success = entry.success,
            "Appending operation log entry"
        );

        let before = encode_snapshot(&entry.before)?;
        let after = encode_snapshot(&entry.after)?;

        sqlx::query(
            r#"
            INSERT INTO operation_log (
                id, correlation_id, kind, tank_id, counterpart_tank_id, declaration_ref,
                mass, volume, before_snapshot, after_snapshot,
                actor, success, error_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.correlation_id)
        .bind(entry.kind)
        .bind(&entry.tank_id)
        .bind(&entry.counterpart_tank_id)
        .bind(&entry.declaration_ref)
        .bind(entry.mass.value().to_string())
        .bind(entry.volume.value().to_string())
        .bind(before)
        .bind(after)
        .bind(&entry.actor)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Lists entries matching `filter`, newest first.
    pub async fn list(&mut self, filter: &OperationLogFilter) -> DbResult<Vec<OperationLogEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, correlation_id, kind, tank_id, counterpart_tank_id, declaration_ref, \
             mass, volume, before_snapshot, after_snapshot, actor, success, error_message, \
             created_at FROM operation_log WHERE 1 = 1",
        );

        if let Some(tank_id) = &filter.tank_id {
            qb.push(" AND tank_id = ").push_bind(tank_id.clone());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind);
        }
        if let Some(correlation_id) = &filter.correlation_id {
            qb.push(" AND correlation_id = ").push_bind(correlation_id.clone());
        }
        if let Some(actor) = &filter.actor {
            qb.push(" AND actor = ").push_bind(actor.clone());
        }
        if let Some(success) = filter.success {
            qb.push(" AND success = ").push_bind(success);
        }
        if let Some(since) = filter.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND created_at < ").push_bind(until);
        }

        let limit = filter.limit.unwrap_or(DEFAULT_LOG_LIMIT);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<AuditRow>()
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(OperationLogEntry::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
