//! Ledger configuration.

use std::time::Duration;

use paycore_common::{constants, LedgerError, Result};

/// Account lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Maximum time to wait for all locks of one operation.
    pub acquisition_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout: constants::lock_acquisition_timeout(),
        }
    }
}

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Database URL for the SQLite store.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// Lock configuration.
    pub lock_config: LockConfig,
    /// Maximum time to stage one unit of work. The commit is not bounded.
    pub unit_timeout: Duration,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON.
    pub log_json: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            lock_config: LockConfig::default(),
            unit_timeout: constants::unit_of_work_timeout(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LEDGER_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            config.database_url = url;
        }

        if let Ok(max) = std::env::var("LEDGER_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.max_connections = max;
            }
        }

        if let Some(timeout) = env_millis("LEDGER_LOCK_TIMEOUT_MS") {
            config.lock_config.acquisition_timeout = timeout;
        }

        if let Some(timeout) = env_millis("LEDGER_UNIT_TIMEOUT_MS") {
            config.unit_timeout = timeout;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }

        config
    }

    /// Whether the database URL names an in-memory SQLite database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(LedgerError::Configuration(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(LedgerError::Configuration(
                "Max connections cannot be 0".to_string(),
            ));
        }

        // Every pooled connection to an in-memory URL opens its own database.
        if self.max_connections > 1 && self.is_in_memory() {
            return Err(LedgerError::Configuration(format!(
                "In-memory database {} supports a single connection, got {}",
                self.database_url, self.max_connections
            )));
        }

        if self.lock_config.acquisition_timeout.is_zero() {
            return Err(LedgerError::Configuration(
                "Lock acquisition timeout cannot be 0".to_string(),
            ));
        }

        if self.unit_timeout.is_zero() {
            return Err(LedgerError::Configuration(
                "Unit of work timeout cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
