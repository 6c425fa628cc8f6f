use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::events::StreamKind;

#[derive(Clone, Debug, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_max_streams")]
    pub max_streams_per_connection: usize,
    #[serde(default = "default_depth_speed")]
    pub depth_speed: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// A connection that stayed open at least this long resets the backoff.
    #[serde(default = "default_healthy_secs")]
    pub healthy_connection_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            max_streams_per_connection: default_max_streams(),
            depth_speed: default_depth_speed(),
            ping_interval_secs: default_ping_interval_secs(),
            healthy_connection_secs: default_healthy_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_max_gb")]
    pub max_gb: f64,
    /// Budget enforcement cooldown; the on-disk size is not re-scanned more
    /// often than this.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_gb: default_max_gb(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BacktestConfig {
    /// ISO dates; when absent the runner falls back to `lookback_days`.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default)]
    pub slippage_bps: f64,
    #[serde(default = "default_warmup_minutes")]
    pub warmup_minutes: u64,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            lookback_days: default_lookback_days(),
            initial_balance: default_initial_balance(),
            fee_rate: default_fee_rate(),
            slippage_bps: 0.0,
            warmup_minutes: default_warmup_minutes(),
            report_dir: default_report_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self { rest_base_url: default_rest_base_url() }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// "record" or "backtest".
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub symbols: Vec<String>,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamKind>,

    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.yaml")
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        // Strip BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

fn default_mode() -> String {
    "record".to_string()
}

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_streams() -> Vec<StreamKind> {
    StreamKind::ALL.to_vec()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443/stream".to_string()
}

fn default_max_streams() -> usize {
    200
}

fn default_depth_speed() -> String {
    "100ms".to_string()
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_healthy_secs() -> u64 {
    600
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_max_gb() -> f64 {
    100.0
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_lookback_days() -> i64 {
    30
}

fn default_initial_balance() -> f64 {
    1000.0
}

fn default_fee_rate() -> f64 {
    0.001
}

fn default_warmup_minutes() -> u64 {
    10
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}
