//! # Repository Module
//!
//! Database repository implementations for the fuel ledger.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Ledger operation (inside one transaction)                              │
//! │       │                                                                 │
//! │       │  LotRepository::new(&mut *tx).list_active(tank_id)              │
//! │       ▼                                                                 │
//! │  Repository<'c> ── borrows &'c mut SqliteConnection                     │
//! │  ├── rows ◄──► domain types (TEXT decimals ◄──► Mass/Volume/Density)    │
//! │  └── SQL is isolated here                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! │                                                                         │
//! │  Borrowing a connection (not the pool) lets every repository call of    │
//! │  one operation share the same transaction.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TankRepository`] - Tank registration and declared totals
//! - [`LotRepository`] - The Lot Ledger (create-or-merge, FIFO listings)
//! - [`ReserveRepository`] - Reserve fuel records
//! - [`TransferRepository`] - Lot-to-lot transfer links
//! - [`OverrideRepository`] - Consistency overrides
//! - [`AuditRepository`] - The operation log

pub mod audit;
pub mod lot;
pub mod override_grant;
pub mod reserve;
pub mod tank;
pub mod transfer;

pub use audit::{AuditRepository, OperationLogFilter};
pub use lot::{LotRepository, NewLot};
pub use override_grant::OverrideRepository;
pub use reserve::ReserveRepository;
pub use tank::TankRepository;
pub use transfer::TransferRepository;

use aerofuel_core::{Density, Mass, Volume};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{DbError, DbResult};

// =============================================================================
// Decimal Column Helpers
// =============================================================================

/// Parses a TEXT decimal column.
pub(crate) fn parse_decimal(column: &str, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| DbError::invalid(column, format!("{raw:?}: {e}")))
}

pub(crate) fn parse_mass(column: &str, raw: &str) -> DbResult<Mass> {
    parse_decimal(column, raw).map(Mass::new)
}

pub(crate) fn parse_volume(column: &str, raw: &str) -> DbResult<Volume> {
    parse_decimal(column, raw).map(Volume::new)
}

pub(crate) fn parse_density(column: &str, raw: &str) -> DbResult<Density> {
    parse_decimal(column, raw).map(Density::new)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the repository tests.

    use aerofuel_core::{Mass, Tank, TankKind, Volume};
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::SqliteConnection;

    use super::TankRepository;
    use crate::{Database, DbConfig};

    pub async fn database() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
    }

    pub async fn tank(conn: &mut SqliteConnection, code: &str, kind: TankKind) -> Tank {
        let tank = Tank {
            id: format!("tank-{}", code.to_lowercase()),
            code: code.to_string(),
            kind,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(50_000),
            declared_mass: Mass::zero(),
            declared_volume: Volume::zero(),
            created_at: t0(),
            updated_at: t0(),
        };
        TankRepository::new(conn).insert(&tank).await.unwrap();
        tank
    }
}
