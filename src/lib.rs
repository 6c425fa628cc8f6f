//! TickVault - market data capture, replay and backtesting
//!
//! This library records exchange feed events into a partitioned on-disk
//! store, replays them as a deterministic globally ordered event sequence,
//! and runs strategies against a simulated execution venue.

pub mod config;
pub mod error;
pub mod events;
pub mod recorder;
pub mod replay;
pub mod runner;
pub mod sim;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{BacktestError, ConfigError, StoreError};
pub use events::{EventPayload, ReplayEvent, StreamKind};
pub use recorder::MarketRecorder;
pub use replay::{MarketState, ReplayEngine};
pub use runner::{BacktestRunner, BacktestSummary};
pub use sim::{ExecutionSimulator, MomentumReplayStrategy, SimOrder, Strategy};
pub use store::{DataBudget, EventStore};

#[cfg(test)]
mod config_tests;
