//! Unit tests for the partitioned event store.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

use crate::events::StreamKind;
use crate::store::{DataBudget, EventStore};

// 2024-05-01T00:00:00Z
const DAY1_MS: i64 = 1_714_521_600_000;
const DAY_MS: i64 = 86_400_000;

fn test_store(dir: &TempDir) -> EventStore {
    let budget = DataBudget::new(dir.path(), 100.0, Duration::from_secs(60));
    EventStore::new(dir.path(), "binance", budget)
}

fn trade_payload(ts_ms: i64, price: &str) -> serde_json::Value {
    json!({
        "e": "aggTrade",
        "E": ts_ms,
        "s": "BTCUSDT",
        "p": price,
        "q": "1.0",
        "T": ts_ms,
    })
}

#[test]
fn test_write_and_read_back() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    for i in 0..5 {
        let ts = DAY1_MS + i * 1_000;
        store
            .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(ts, "100.5"), ts)
            .unwrap();
    }

    let events: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + 10_000)
        .collect();
    assert_eq!(events.len(), 5);
    assert_eq!(events[0]["p"], "100.5");
}

#[test]
fn test_same_day_appends_to_one_partition() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    for i in 0..3 {
        let ts = DAY1_MS + i;
        store
            .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(ts, "1"), ts)
            .unwrap();
    }

    let day_dir = dir.path().join("binance/BTCUSDT/2024-05-01");
    let files: Vec<_> = std::fs::read_dir(&day_dir).unwrap().flatten().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name().to_str().unwrap(), "aggTrade.jsonl.gz");
}

#[test]
fn test_closed_range_filter_across_days() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    // One event per hour across two days.
    let mut all_ts = Vec::new();
    for hour in 0..48 {
        let ts = DAY1_MS + hour * 3_600_000;
        all_ts.push(ts);
        store
            .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(ts, "1"), ts)
            .unwrap();
    }

    // Request a window straddling the day boundary; bounds are inclusive.
    let start = DAY1_MS + 22 * 3_600_000;
    let end = DAY1_MS + 26 * 3_600_000;
    let events: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, start, end)
        .collect();
    assert_eq!(events.len(), 5);
    for event in &events {
        let ts = event["T"].as_i64().unwrap();
        assert!(ts >= start && ts <= end);
    }
}

#[test]
fn test_streams_partition_separately() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(DAY1_MS, "1"), DAY1_MS)
        .unwrap();
    let quote = json!({"s": "BTCUSDT", "b": "99", "a": "101", "E": DAY1_MS});
    store
        .write_event("BTCUSDT", StreamKind::BookTicker, &quote, DAY1_MS)
        .unwrap();

    let trades: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS)
        .collect();
    let quotes: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::BookTicker, DAY1_MS, DAY1_MS)
        .collect();
    assert_eq!(trades.len(), 1);
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0]["b"], "99");
}

#[test]
fn test_malformed_record_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(DAY1_MS, "1"), DAY1_MS)
        .unwrap();

    // Append a garbage gzip member by hand, then a good event after it.
    {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let path = dir.path().join("binance/BTCUSDT/2024-05-01/aggTrade.jsonl.gz");
        let file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"not json at all\n").unwrap();
        encoder.finish().unwrap();
    }
    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(DAY1_MS + 1_000, "2"), DAY1_MS)
        .unwrap();

    let events: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + 10_000)
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["p"], "2");
}

#[test]
fn test_event_without_timestamp_is_dropped() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let no_ts = json!({"s": "BTCUSDT", "p": "1", "q": "1"});
    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &no_ts, DAY1_MS)
        .unwrap();

    let events: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + DAY_MS)
        .collect();
    assert!(events.is_empty());
}

#[test]
fn test_missing_partition_yields_no_events() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let events: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + DAY_MS)
        .collect();
    assert!(events.is_empty());
}

#[test]
fn test_available_dates_and_coverage() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    // Days 1 and 3 present, day 2 missing.
    for day_offset in [0, 2] {
        let ts = DAY1_MS + day_offset * DAY_MS;
        store
            .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(ts, "1"), ts)
            .unwrap();
    }

    let dates = store.available_dates("BTCUSDT");
    assert_eq!(dates.len(), 2);
    assert_eq!(dates[0].to_string(), "2024-05-01");
    assert_eq!(dates[1].to_string(), "2024-05-03");

    let day1 = chrono::DateTime::from_timestamp_millis(DAY1_MS).unwrap();
    let day2 = chrono::DateTime::from_timestamp_millis(DAY1_MS + DAY_MS).unwrap();
    let day3 = chrono::DateTime::from_timestamp_millis(DAY1_MS + 2 * DAY_MS).unwrap();

    assert!(store.has_coverage("BTCUSDT", day1, day1));
    assert!(!store.has_coverage("BTCUSDT", day1, day3)); // gap on day 2
    assert!(store.has_coverage("BTCUSDT", day3, day3));
    assert!(!store.has_coverage("BTCUSDT", day3, day1)); // inverted range
    assert!(!store.has_coverage("ETHUSDT", day1, day1));

    let (start, end) = store.available_range("BTCUSDT").unwrap();
    assert_eq!(start.date_naive(), day1.date_naive());
    assert_eq!(end.date_naive(), day3.date_naive());
    assert!(store.available_range("ETHUSDT").is_none());
}

#[test]
fn test_reader_sees_flushed_writes_while_appending() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(DAY1_MS, "1"), DAY1_MS)
        .unwrap();

    // Open a reader, then append behind it; the first pass sees one event and
    // a fresh iterator sees both (restartable, frame-based compression).
    let first: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + 10_000)
        .collect();
    store
        .write_event("BTCUSDT", StreamKind::AggTrade, &trade_payload(DAY1_MS + 1, "2"), DAY1_MS)
        .unwrap();
    let second: Vec<_> = store
        .iter_events("BTCUSDT", StreamKind::AggTrade, DAY1_MS, DAY1_MS + 10_000)
        .collect();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);
}
