//! Error types for the capture/replay pipeline.
//!
//! Transient network trouble never surfaces here: the recorder retries
//! internally and reports through its health snapshot. These enums cover
//! storage I/O and the contract violations that stop a backtest outright.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Event store failures. Disk errors propagate to the caller; malformed
/// stored records are skipped during iteration instead of raising.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Backtest orchestration failures: programming-contract violations plus
/// whatever the store propagates.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Limit order for {symbol} has no price")]
    LimitWithoutPrice { symbol: String },

    #[error("Backtest cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Report error: {0}")]
    Report(#[from] std::io::Error),

    #[error("Report CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Exchange info fetch failed: {0}")]
    Filters(#[from] reqwest::Error),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
