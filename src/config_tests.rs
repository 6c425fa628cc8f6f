//! Unit tests for configuration loading and defaults.

use std::io::Write;
use tempfile::NamedTempFile;

use crate::config::AppConfig;
use crate::events::StreamKind;

fn load_yaml(content: &str) -> AppConfig {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    AppConfig::load_from(file.path().to_str().unwrap()).unwrap()
}

#[test]
fn test_minimal_config_uses_defaults() {
    let cfg = load_yaml("symbols:\n  - BTCUSDT\n");
    assert_eq!(cfg.mode, "record");
    assert_eq!(cfg.exchange, "binance");
    assert_eq!(cfg.symbols, vec!["BTCUSDT"]);
    assert_eq!(cfg.streams, StreamKind::ALL.to_vec());
    assert_eq!(cfg.recorder.max_streams_per_connection, 200);
    assert_eq!(cfg.recorder.ws_url, "wss://stream.binance.com:9443/stream");
    assert_eq!(cfg.storage.max_gb, 100.0);
    assert_eq!(cfg.backtest.lookback_days, 30);
    assert_eq!(cfg.backtest.fee_rate, 0.001);
    assert_eq!(cfg.filters.rest_base_url, "https://api.binance.com");
}

#[test]
fn test_full_config_overrides() {
    let cfg = load_yaml(
        "mode: backtest\n\
         exchange: binance\n\
         data_dir: /tmp/ticks\n\
         symbols:\n  - BTCUSDT\n  - ETHUSDT\n\
         streams:\n  - aggTrade\n  - bookTicker\n\
         recorder:\n  max_streams_per_connection: 50\n  depth_speed: 1000ms\n\
         storage:\n  max_gb: 5.5\n\
         backtest:\n  start_date: \"2024-05-01\"\n  end_date: \"2024-05-03\"\n  initial_balance: 5000\n  slippage_bps: 2\n\
         filters:\n  rest_base_url: https://testnet.binance.vision\n",
    );
    assert_eq!(cfg.mode, "backtest");
    assert_eq!(cfg.symbols.len(), 2);
    assert_eq!(cfg.streams, vec![StreamKind::AggTrade, StreamKind::BookTicker]);
    assert_eq!(cfg.recorder.max_streams_per_connection, 50);
    assert_eq!(cfg.recorder.depth_speed, "1000ms");
    assert_eq!(cfg.storage.max_gb, 5.5);
    assert_eq!(cfg.backtest.start_date.as_deref(), Some("2024-05-01"));
    assert_eq!(cfg.backtest.initial_balance, 5000.0);
    assert_eq!(cfg.backtest.slippage_bps, 2.0);
    assert_eq!(cfg.filters.rest_base_url, "https://testnet.binance.vision");
}

#[test]
fn test_bom_is_stripped() {
    let cfg = load_yaml("\u{feff}symbols:\n  - BTCUSDT\n");
    assert_eq!(cfg.symbols, vec!["BTCUSDT"]);
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(AppConfig::load_from("/nonexistent/config.yaml").is_err());
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"symbols: [unclosed").unwrap();
    assert!(AppConfig::load_from(file.path().to_str().unwrap()).is_err());
}
