//! Error types for the ride core

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ride core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ride core errors
///
/// Invalid state transitions are not errors: the lifecycle machine ignores
/// them and hands back the unchanged snapshot.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied a value outside its domain (negative fare, rating out of range)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Monetary amount is negative or carries more than two decimal places
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Commission + payout does not add up to the fare
    #[error("Fare mismatch: fare {fare}, commission {commission} + payout {payout}")]
    FareMismatch {
        /// Rounded fare
        fare: Decimal,
        /// Commission amount
        commission: Decimal,
        /// Driver payout amount
        payout: Decimal,
    },

    /// A debit would drive the balance negative
    #[error("Insufficient balance for {subject}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// Ledger subject
        subject: String,
        /// Balance at the time of the request
        balance: Decimal,
        /// Debit amount requested
        requested: Decimal,
    },

    /// Stored balance moved between read and write
    #[error("Balance conflict: {0}")]
    Conflict(String),

    /// No actor or metrics for the driver
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidAmount(_) => "INVALID_AMOUNT",
            Error::FareMismatch { .. } => "FARE_MISMATCH",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::Conflict(_) => "BALANCE_CONFLICT",
            Error::DriverNotFound(_) => "DRIVER_NOT_FOUND",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Concurrency(_) => "CONCURRENCY_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry (smaller amount, fresh balance read)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InsufficientBalance { .. } | Error::Conflict(_))
    }

    /// Data-integrity bug that should page someone
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Error::FareMismatch { .. })
    }

    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::InvalidAmount(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
