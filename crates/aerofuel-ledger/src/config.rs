//! # Ledger Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Defaults (compiled in)                                              │
//! │  2. aerofuel.toml (platform config dir, or an explicit path)            │
//! │  3. AEROFUEL_* environment variables                                    │
//! │  4. validate()                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! later sources override earlier ones
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # aerofuel.toml
//! [database]
//! path = "/var/lib/aerofuel/ledger.db"
//! max_connections = 5
//! lock_wait_ms = 10000
//!
//! [coordinator]
//! max_retries = 3
//! base_backoff_ms = 100
//! statement_timeout_secs = 30
//!
//! [reconciliation]
//! inline = true
//! sweep_interval_secs = 10800   # every 3 hours
//!
//! [density]
//! min = "0.700"
//! max = "0.900"
//! default = "0.800"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use aerofuel_core::DensityBand;
use aerofuel_db::DbConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `ledger.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long a writer waits for a locked database before the attempt
    /// counts as a conflict.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_lock_wait() -> u64 {
    10_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            lock_wait_ms: default_lock_wait(),
        }
    }
}

impl DatabaseSettings {
    /// Resolves the database file, falling back to the platform data dir.
    pub fn resolved_path(&self) -> LedgerResult<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        directories::ProjectDirs::from("com", "aerofuel", "ledger")
            .map(|dirs| dirs.data_dir().join("ledger.db"))
            .ok_or_else(|| LedgerError::Config("No database path and no home directory".into()))
    }

    pub fn db_config(&self) -> LedgerResult<DbConfig> {
        let path = self.resolved_path()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(DbConfig::new(path)
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .lock_wait(Duration::from_millis(self.lock_wait_ms)))
    }
}

// =============================================================================
// Coordinator Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Conflict retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles with every attempt.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Upper bound on one attempt. Exceeding it fails the operation.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_statement_timeout() -> u64 {
    30
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            statement_timeout_secs: default_statement_timeout(),
        }
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Reconcile orphans from mobile tanks inside the consuming transaction.
    /// When off, orphans stay on their lot for the sweeper.
    #[serde(default = "default_true")]
    pub inline: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Stranded lots handled per sweep pass.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    3 * 60 * 60
}

fn default_sweep_batch_size() -> usize {
    100
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            inline: true,
            sweep_interval_secs: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    #[serde(default)]
    pub density: DensityBand,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (aerofuel.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LedgerResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> LedgerResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> LedgerResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| LedgerError::ConfigLoad("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let db = &self.database;
        if db.max_connections == 0 {
            return Err(LedgerError::Config("max_connections must be greater than 0".into()));
        }
        if db.min_connections > db.max_connections {
            return Err(LedgerError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                db.min_connections, db.max_connections
            )));
        }
        if db.lock_wait_ms == 0 {
            return Err(LedgerError::Config("lock_wait_ms must be greater than 0".into()));
        }

        let coordinator = &self.coordinator;
        if coordinator.statement_timeout_secs == 0 {
            return Err(LedgerError::Config(
                "statement_timeout_secs must be greater than 0".into(),
            ));
        }
        if coordinator.base_backoff_ms == 0 || coordinator.max_backoff_ms < coordinator.base_backoff_ms {
            return Err(LedgerError::Config(format!(
                "backoff must satisfy 0 < base ({} ms) <= max ({} ms)",
                coordinator.base_backoff_ms, coordinator.max_backoff_ms
            )));
        }

        let reconciliation = &self.reconciliation;
        if reconciliation.sweep_interval_secs == 0 || reconciliation.sweep_batch_size == 0 {
            return Err(LedgerError::Config(
                "sweep_interval_secs and sweep_batch_size must be greater than 0".into(),
            ));
        }

        let band = &self.density;
        if band.min.value() <= rust_decimal::Decimal::ZERO || band.min >= band.max {
            return Err(LedgerError::Config(format!(
                "density band must satisfy 0 < min ({}) < max ({})",
                band.min, band.max
            )));
        }
        if !band.contains(band.default) {
            return Err(LedgerError::Config(format!(
                "default density {} lies outside [{}, {}]",
                band.default, band.min, band.max
            )));
        }

        Ok(())
    }

    /// Applies `AEROFUEL_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are ignored
    /// with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("AEROFUEL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("AEROFUEL_MAX_RETRIES") {
            match raw.parse::<u32>() {
                Ok(n) => self.coordinator.max_retries = n,
                Err(_) => warn!(value = %raw, "Ignoring AEROFUEL_MAX_RETRIES"),
            }
        }

        if let Some(raw) = lookup("AEROFUEL_LOCK_WAIT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.database.lock_wait_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring AEROFUEL_LOCK_WAIT_MS"),
            }
        }

        if let Some(raw) = lookup("AEROFUEL_STATEMENT_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => self.coordinator.statement_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring AEROFUEL_STATEMENT_TIMEOUT_SECS"),
            }
        }

        if let Some(raw) = lookup("AEROFUEL_INLINE_RECONCILIATION") {
            match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.reconciliation.inline = true,
                "0" | "false" | "no" | "off" => self.reconciliation.inline = false,
                _ => warn!(value = %raw, "Ignoring AEROFUEL_INLINE_RECONCILIATION"),
            }
        }

        if let Some(raw) = lookup("AEROFUEL_SWEEP_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => self.reconciliation.sweep_interval_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring AEROFUEL_SWEEP_INTERVAL_SECS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "aerofuel", "ledger")
            .map(|dirs| dirs.config_dir().join("aerofuel.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator.statement_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.sweep_interval_secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
