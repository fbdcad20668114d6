//! Configuration for the ride core

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ride core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ride lifecycle timing and fees
    pub ride: RideConfig,

    /// Ledger configuration
    pub ledger: LedgerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ride-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ride: RideConfig::default(),
            ledger: LedgerConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Ride lifecycle timing and fees
///
/// Copied into every machine so a snapshot carries the rules it ran under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RideConfig {
    /// Seconds a driver has to accept an offer
    pub offer_countdown_secs: u32,

    /// Seconds at pickup before the waiting fee applies
    pub waiting_fee_threshold_secs: u32,

    /// Waiting fee in MZN
    pub waiting_fee: Decimal,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            offer_countdown_secs: 30,
            waiting_fee_threshold_secs: 300, // 5 minutes
            waiting_fee: Decimal::new(5000, 2), // 50.00 MZN
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account credited with commission
    pub platform_account: String,

    /// Settlement currency
    pub currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            platform_account: "PLATFORM".to_string(),
            currency: crate::money::CURRENCY_CODE.to_string(),
        }
    }
}

/// Which store backs the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, for tests and demos
    Memory,
    /// RocksDB on disk
    RocksDb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub backend: StorageBackend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data/ride-ledger"),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick period (milliseconds)
    pub tick_interval_ms: u64,

    /// Per-driver mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            mailbox_capacity: 256,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("RIDE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("RIDE_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(account) = std::env::var("RIDE_PLATFORM_ACCOUNT") {
            config.ledger.platform_account = account;
        }

        if let Ok(secs) = std::env::var("RIDE_OFFER_COUNTDOWN_SECS") {
            config.ride.offer_countdown_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid RIDE_OFFER_COUNTDOWN_SECS: {}", e))
            })?;
        }

        if let Ok(fee) = std::env::var("RIDE_WAITING_FEE") {
            config.ride.waiting_fee = crate::money::parse_amount(&fee)
                .map_err(|e| crate::Error::Config(format!("Invalid RIDE_WAITING_FEE: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the lifecycle cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ride.offer_countdown_secs == 0 {
            return Err(crate::Error::Config(
                "offer_countdown_secs must be > 0".to_string(),
            ));
        }

        if crate::money::ensure_postable(self.ride.waiting_fee).is_err() {
            return Err(crate::Error::Config(format!(
                "waiting_fee {} must be non-negative with at most 2 decimals",
                self.ride.waiting_fee
            )));
        }

        if self.ledger.platform_account.trim().is_empty() {
            return Err(crate::Error::Config(
                "platform_account must not be empty".to_string(),
            ));
        }

        // Amounts are fixed at two subunits; only the metical fits
        if self.ledger.currency != crate::money::CURRENCY_CODE {
            return Err(crate::Error::Config(format!(
                "currency {} is not supported, expected {}",
                self.ledger.currency,
                crate::money::CURRENCY_CODE
            )));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(crate::Error::Config(
                "tick_interval_ms must be > 0".to_string(),
            ));
        }

        if self.scheduler.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
