//! # aerofuel-db: Database Layer for Aerofuel
//!
//! This crate provides persistence for the fuel-lot ledger.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Aerofuel Data Flow                               │
//! │                                                                         │
//! │  aerofuel-ledger (coordinator opens one transaction per attempt)        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     aerofuel-db (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐    │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │    │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │    │   │
//! │  │   │               │    │ TankRepo      │    │              │    │   │
//! │  │   │ SqlitePool    │    │ LotRepo       │    │ 001_initial  │    │   │
//! │  │   │ begin()       │◄───│ AuditRepo     │    │ _schema.sql  │    │   │
//! │  │   │ acquire()     │    │ Reserve/...   │    │              │    │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (WAL)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aerofuel_db::{Database, DbConfig, LotRepository};
//!
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let lots = LotRepository::new(&mut *tx).list_active("tank-id").await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::{
    AuditRepository, LotRepository, NewLot, OperationLogFilter, OverrideRepository,
    ReserveRepository, TankRepository, TransferRepository,
};
