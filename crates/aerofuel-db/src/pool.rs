//! # Ledger Database
//!
//! Opens the SQLite file behind the ledger and hands out transactions.
//!
//! ```text
//!  DbConfig ──► Database::new ──► SqlitePool (WAL, FK on, busy_timeout)
//!                                     │
//!            migrations (embedded) ◄──┤
//!                                     │
//!  coordinator attempt ──► begin() ───┘  one write transaction at a time;
//!                                        a writer stuck past lock_wait
//!                                        gets DbError::Conflict
//! ```
//!
//! Readers never block the writer under WAL, so audit and lot queries run on
//! plain pooled connections while a fuel operation is in flight.

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;

// =============================================================================
// Configuration
// =============================================================================

/// Where the ledger lives and how long writers wait on each other.
///
/// ```rust
/// use aerofuel_db::DbConfig;
/// use std::time::Duration;
///
/// let config = DbConfig::new("/var/lib/aerofuel/ledger.db")
///     .max_connections(5)
///     .lock_wait(Duration::from_secs(10));
/// assert_eq!(config.max_connections, 5);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Pool size. One writer at a time regardless; extra connections serve
    /// audit reads and the sweeper. Default: 5
    pub max_connections: u32,

    /// Default: 1
    pub min_connections: u32,

    /// How long a caller waits for a free pooled connection.
    /// Default: 30 seconds
    pub acquire_timeout: Duration,

    /// How long a writer waits on a locked database (SQLite busy_timeout).
    /// Default: 10 seconds
    pub lock_wait: Duration,
}

impl DbConfig {
    /// Ledger file at `path`, created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            lock_wait: Duration::from_secs(10),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets how many connections stay open while idle.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Private in-memory ledger for tests.
    ///
    /// Pinned to one connection: every connection to `:memory:` would
    /// otherwise see its own empty database. Callers must not acquire a
    /// second connection while a transaction is open.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            lock_wait: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle on the ledger file. Cheap to clone.
///
/// Repositories borrow a connection instead of owning the pool, so the same
/// repository code runs on a plain connection (reads) or inside a
/// transaction (every mutation):
///
/// ```rust,ignore
/// let mut tx = db.begin().await?;
/// let tank = TankRepository::new(&mut *tx).get("tank-id").await?;
/// LotRepository::new(&mut *tx).update_remaining(&lot).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the ledger file and brings its schema up to date.
    ///
    /// Synchronous mode is NORMAL: under WAL a power loss can drop the last
    /// committed transactions but never tears one.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening ledger database");

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // off by default in SQLite; lots and reserve records rely on it
            .foreign_keys(true)
            .busy_timeout(config.lock_wait)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(
            max_connections = config.max_connections,
            lock_wait_ms = config.lock_wait.as_millis() as u64,
            "Ledger pool ready"
        );

        migrations::run_migrations(&pool).await?;
        Ok(Database { pool })
    }

    /// Raw pool, for migrations and ad-hoc test queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction.
    ///
    /// SQLite transactions are serializable: a second writer either waits
    /// for the lock or fails with a conflict.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Borrows a pooled connection for read-only work.
    pub async fn acquire(&self) -> DbResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
