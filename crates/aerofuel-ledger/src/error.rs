//! # Ledger Error Types
//!
//! One error type for every public operation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ledger Error Sources                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Fuel rules    │  │    Storage      │  │     Coordinator         │ │
//! │  │   (CoreError)   │  │    (DbError)    │  │                         │ │
//! │  │                 │  │                 │  │  Timeout                │ │
//! │  │  Insufficient   │  │  NotFound       │  │  RetriesExhausted       │ │
//! │  │  Consistency    │  │  Conflict ──────┼──┼─► retried internally    │ │
//! │  │  Reconciliation │  │  ...            │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │  Configuration  │  Config, ConfigLoad                               │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers that only need to branch on the category use [`LedgerError::kind`].

use std::time::Duration;

use aerofuel_core::{CoreError, ValidationError};
use aerofuel_db::DbError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    // =========================================================================
    // Coordinator Errors
    // =========================================================================
    /// An attempt ran longer than the statement timeout. Never retried.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Every attempt hit a write conflict.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid ledger configuration: {0}")]
    Config(String),

    #[error("Failed to load config: {0}")]
    ConfigLoad(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error categories for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientFuel,
    TankNotFound,
    LotNotFound,
    ConsistencyViolation,
    ReconciliationUnavailable,
    TransactionConflict,
    InvalidDensity,
    Timeout,
    Validation,
    Configuration,
    Storage,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Core(err) => match err {
                CoreError::InsufficientFuel { .. } => ErrorKind::InsufficientFuel,
                CoreError::TankNotFound(_) => ErrorKind::TankNotFound,
                CoreError::LotNotFound(_) => ErrorKind::LotNotFound,
                CoreError::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
                CoreError::ReconciliationUnavailable { .. } => ErrorKind::ReconciliationUnavailable,
                CoreError::InvalidDensity { .. } => ErrorKind::InvalidDensity,
                CoreError::CapacityExceeded { .. }
                | CoreError::WrongTankKind { .. }
                | CoreError::FuelTypeMismatch { .. }
                | CoreError::LotNotInTank { .. }
                | CoreError::InvalidAdjustment { .. }
                | CoreError::OrphanMismatch { .. }
                | CoreError::Validation(_) => ErrorKind::Validation,
            },
            LedgerError::Db(DbError::NotFound { entity, .. }) if entity == "Tank" => {
                ErrorKind::TankNotFound
            }
            LedgerError::Db(DbError::NotFound { entity, .. }) if entity == "Lot" => {
                ErrorKind::LotNotFound
            }
            LedgerError::Db(DbError::UniqueViolation { .. }) => ErrorKind::Validation,
            LedgerError::Db(err) if err.is_conflict() => ErrorKind::TransactionConflict,
            LedgerError::Db(_) => ErrorKind::Storage,
            LedgerError::Timeout(_) => ErrorKind::Timeout,
            LedgerError::RetriesExhausted { .. } => ErrorKind::TransactionConflict,
            LedgerError::Config(_) | LedgerError::ConfigLoad(_) => ErrorKind::Configuration,
            LedgerError::Internal(_) => ErrorKind::Storage,
        }
    }

    /// Whether the coordinator should run the operation again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Db(err) if err.is_conflict())
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Db(DbError::from(err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::ConfigLoad(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::ConfigLoad(err.to_string())
    }
}

impl From<toml::ser::Error> for LedgerError {
    fn from(err: toml::ser::Error) -> Self {
        LedgerError::ConfigLoad(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerofuel_core::Mass;

    #[test]
    fn test_kind_mapping() {
        let insufficient = LedgerError::from(CoreError::InsufficientFuel {
            tank_id: "t".into(),
            requested: Mass::from_whole(10),
            available: Mass::from_whole(5),
        });
        assert_eq!(insufficient.kind(), ErrorKind::InsufficientFuel);

        let missing = LedgerError::from(DbError::not_found("Tank", "t"));
        assert_eq!(missing.kind(), ErrorKind::TankNotFound);

        let conflict = LedgerError::from(DbError::Conflict("database is locked".into()));
        assert!(conflict.is_conflict());
        assert_eq!(conflict.kind(), ErrorKind::TransactionConflict);

        let timeout = LedgerError::Timeout(Duration::from_secs(30));
        assert!(!timeout.is_conflict());
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let validation = LedgerError::from(ValidationError::Required {
            field: "reason".into(),
        });
        assert_eq!(validation.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::ReconciliationUnavailable).unwrap();
        assert_eq!(json, r#""reconciliation_unavailable""#);
    }
}
