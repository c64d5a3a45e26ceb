//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization                │
//! │       │                                                                 │
//! │       ├── Conflict  (SQLITE_BUSY / SQLITE_LOCKED) → coordinator retries │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerError (aerofuel-ledger) ← What callers see                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// SQLite result codes that mean "another writer holds the lock".
///
/// 5 = BUSY, 6 = LOCKED, 261 = BUSY_RECOVERY, 262 = LOCKED_SHAREDCACHE,
/// 517 = BUSY_SNAPSHOT (a read transaction tried to upgrade to write after
/// another connection committed).
const LOCK_CONFLICT_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

/// What went wrong below the ledger.
///
/// Only [`DbError::Conflict`] and [`DbError::PoolExhausted`] are transient;
/// everything else aborts the operation as is.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the row (a second tank with the same code).
    /// `value` is filled in by the repository that knows it.
    #[error("Duplicate {field}: '{value}'")]
    UniqueViolation { field: String, value: String },

    /// Another transaction held the write lock past `lock_wait`.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// A stored decimal or snapshot no longer parses.
    #[error("Invalid stored {entity}: {reason}")]
    InvalidData { entity: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Any other SQLite or driver failure.
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid(entity: impl Into<String>, reason: impl ToString) -> Self {
        DbError::InvalidData {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_) | DbError::PoolExhausted)
    }
}

fn is_lock_conflict(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| LOCK_CONFLICT_CODES.contains(&c))
        || message.contains("database is locked")
        || message.contains("database table is locked")
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // Repositories use fetch_optional and name the entity themselves.
            sqlx::Error::RowNotFound => DbError::not_found("Row", "?"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                if is_lock_conflict(db_err.code().as_deref(), &message) {
                    DbError::Conflict(message)
                } else if let Some(field) = message.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::UniqueViolation {
                        field: field.to_string(),
                        value: String::new(),
                    }
                } else {
                    DbError::QueryFailed(message)
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid("snapshot", err)
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(DbError::Conflict("database is locked".into()).is_conflict());
        assert!(DbError::PoolExhausted.is_conflict());
        assert!(!DbError::not_found("Tank", "t1").is_conflict());
    }

    #[test]
    fn test_lock_detection() {
        assert!(is_lock_conflict(Some("5"), "whatever"));
        assert!(is_lock_conflict(Some("517"), ""));
        assert!(is_lock_conflict(None, "database is locked"));
        assert!(!is_lock_conflict(Some("19"), "UNIQUE constraint failed: tanks.code"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(DbError::not_found("Tank", "t1").to_string(), "Tank not found: t1");
        assert_eq!(
            DbError::invalid("fuel_lots.remaining_mass", "not a number").to_string(),
            "Invalid stored fuel_lots.remaining_mass: not a number"
        );
    }
}
