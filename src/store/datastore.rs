//! Partitioned, compressed, append-only event store.
//!
//! Layout: `<data_dir>/<exchange>/<SYMBOL>/<YYYY-MM-DD>/<stream>.jsonl.gz`.
//! Each write appends one line-delimited JSON event as its own gzip member,
//! so a reader can decompress a partially written file that the writer has
//! already flushed — replay may run while recording continues on a later day.
//! Partition files are never rewritten in place; the only deletion path is
//! whole-day budget eviction.

use chrono::{DateTime, Days, NaiveDate, Utc};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::events::{event_timestamp_us, StreamKind};
use crate::store::budget::DataBudget;

pub struct EventStore {
    base_dir: PathBuf,
    exchange: String,
    budget: DataBudget,
    write_lock: Mutex<()>,
}

impl EventStore {
    pub fn new(base_dir: impl Into<PathBuf>, exchange: impl Into<String>, budget: DataBudget) -> Self {
        Self {
            base_dir: base_dir.into(),
            exchange: exchange.into(),
            budget,
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.base_dir.join(&self.exchange).join(symbol.to_uppercase())
    }

    fn partition_path(&self, symbol: &str, stream: StreamKind, day: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol)
            .join(day.format("%Y-%m-%d").to_string())
            .join(stream.file_name())
    }

    /// Append one event to the day-partition for `(symbol, stream)`.
    ///
    /// Safe to call concurrently from multiple recorder workers; the append
    /// itself is serialized internally. Runs the budget check afterwards
    /// (rate-limited inside [`DataBudget`]).
    pub fn write_event(
        &self,
        symbol: &str,
        stream: StreamKind,
        payload: &Value,
        event_ts_ms: i64,
    ) -> Result<(), StoreError> {
        let day = DateTime::from_timestamp_millis(event_ts_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();
        let path = self.partition_path(symbol, stream, day);
        let line = serde_json::to_string(payload)?;
        {
            let _guard = self.write_lock.lock().unwrap();
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            let mut encoder = GzEncoder::new(file, Compression::new(3));
            encoder
                .write_all(line.as_bytes())
                .and_then(|_| encoder.write_all(b"\n"))
                .map_err(|source| StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            encoder.finish().map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        self.budget.enforce()
    }

    /// Lazy iterator over stored events whose timestamp falls within the
    /// closed `[start_ms, end_ms]` range, in append order per partition.
    ///
    /// Missing partitions yield no events; malformed lines are skipped.
    pub fn iter_events(
        &self,
        symbol: &str,
        stream: StreamKind,
        start_ms: i64,
        end_ms: i64,
    ) -> EventIter {
        let mut files = VecDeque::new();
        if start_ms <= end_ms {
            let start_day = DateTime::from_timestamp_millis(start_ms)
                .unwrap_or_else(Utc::now)
                .date_naive();
            let end_day = DateTime::from_timestamp_millis(end_ms)
                .unwrap_or_else(Utc::now)
                .date_naive();
            for day in days_inclusive(start_day, end_day) {
                files.push_back(self.partition_path(symbol, stream, day));
            }
        }
        EventIter {
            files,
            lines: None,
            start_ms,
            end_ms,
        }
    }

    /// Sorted list of UTC days with an on-disk partition for `symbol`.
    pub fn available_dates(&self, symbol: &str) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let Ok(entries) = fs::read_dir(self.symbol_dir(symbol)) else {
            return dates;
        };
        for entry in entries.flatten().filter(|e| e.path().is_dir()) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(day) = NaiveDate::parse_from_str(name, "%Y-%m-%d") {
                dates.push(day);
            }
        }
        dates.sort();
        dates
    }

    /// First and last covered instants for `symbol`, if any data exists.
    pub fn available_range(&self, symbol: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let dates = self.available_dates(symbol);
        let first = dates.first()?;
        let last = dates.last()?;
        let start = first.and_hms_opt(0, 0, 0)?.and_utc();
        let end = last.and_hms_opt(23, 59, 59)?.and_utc();
        Some((start, end))
    }

    /// True iff every UTC calendar day in `[start, end]` has a partition
    /// directory on disk. Presence only; says nothing about completeness.
    pub fn has_coverage(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start > end {
            return false;
        }
        let on_disk = self.available_dates(symbol);
        if on_disk.is_empty() {
            return false;
        }
        days_inclusive(start.date_naive(), end.date_naive())
            .iter()
            .all(|day| on_disk.binary_search(day).is_ok())
    }
}

/// Shared handle used by recorder workers and the replay engine.
pub type SharedEventStore = Arc<EventStore>;

pub(crate) fn days_inclusive(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}

type GzLines = Lines<BufReader<MultiGzDecoder<File>>>;

/// Restartable, read-only iteration over day-partition files.
pub struct EventIter {
    files: VecDeque<PathBuf>,
    lines: Option<GzLines>,
    start_ms: i64,
    end_ms: i64,
}

impl EventIter {
    fn in_range(start_ms: i64, end_ms: i64, payload: &Value) -> bool {
        match event_timestamp_us(payload) {
            Some(ts_us) => {
                let ts_ms = ts_us / 1_000;
                ts_ms >= start_ms && ts_ms <= end_ms
            }
            // Best-effort telemetry: an event without a usable timestamp
            // cannot be ordered, so it is dropped here.
            None => false,
        }
    }
}

impl Iterator for EventIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let (start_ms, end_ms) = (self.start_ms, self.end_ms);
        loop {
            if let Some(lines) = self.lines.as_mut() {
                loop {
                    match lines.next() {
                        Some(Ok(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let payload: Value = match serde_json::from_str(line) {
                                Ok(value) => value,
                                Err(err) => {
                                    debug!(error = %err, "skipping malformed event record");
                                    continue;
                                }
                            };
                            if Self::in_range(start_ms, end_ms, &payload) {
                                return Some(payload);
                            }
                        }
                        Some(Err(err)) => {
                            // A writer may still be mid-append on the newest
                            // partition; a truncated tail ends this day.
                            debug!(error = %err, "partition tail unreadable, moving to next day");
                            break;
                        }
                        None => break,
                    }
                }
                self.lines = None;
            }

            let path = self.files.pop_front()?;
            match File::open(&path) {
                Ok(file) => {
                    self.lines = Some(BufReader::new(MultiGzDecoder::new(file)).lines());
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to open partition");
                    continue;
                }
            }
        }
    }
}
