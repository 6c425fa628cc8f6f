//! Storage budget enforcement for the event data directory.
//!
//! The recorder writes indefinitely, so the data directory is kept under a
//! configured byte budget by deleting the oldest whole day-partitions across
//! all exchanges and symbols. Scanning the tree is not free; enforcement runs
//! at most once per cooldown interval and is serialized behind a lock so
//! concurrent writers do not race each other through the sweep.

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::StoreError;

pub struct DataBudget {
    data_dir: PathBuf,
    max_bytes: u64,
    check_interval: Duration,
    last_check: Mutex<Option<Instant>>,
}

impl DataBudget {
    pub fn new(data_dir: impl Into<PathBuf>, max_gb: f64, check_interval: Duration) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_bytes: (max_gb * 1024.0 * 1024.0 * 1024.0) as u64,
            check_interval,
            last_check: Mutex::new(None),
        }
    }

    /// Evict oldest day-partitions until the data directory fits the budget.
    ///
    /// Rate-limited: returns immediately if a check ran within the cooldown.
    /// Eviction deletes whole day directories, oldest calendar day first,
    /// regardless of which symbol wrote them.
    pub fn enforce(&self) -> Result<(), StoreError> {
        let mut last_check = self.last_check.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = *last_check {
            if now.duration_since(last) < self.check_interval {
                return Ok(());
            }
        }
        *last_check = Some(now);
        self.enforce_locked()
    }

    fn enforce_locked(&self) -> Result<(), StoreError> {
        let mut total = dir_size(&self.data_dir);
        if total <= self.max_bytes {
            return Ok(());
        }
        debug!(
            total_bytes = total,
            max_bytes = self.max_bytes,
            "data directory over budget, evicting oldest partitions"
        );
        let mut day_dirs = collect_day_dirs(&self.data_dir);
        day_dirs.sort_by_key(|(day, _)| *day);
        for (day, path) in day_dirs {
            if total <= self.max_bytes {
                break;
            }
            let size = dir_size(&path);
            fs::remove_dir_all(&path).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            info!(day = %day, bytes = size, path = %path.display(), "evicted day partition");
            total = total.saturating_sub(size);
        }
        Ok(())
    }
}

/// Total size of all files under `path`. Files that vanish or fail to stat
/// mid-walk are skipped.
pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

/// Every `<data_dir>/<exchange>/<symbol>/<YYYY-MM-DD>` directory, unsorted.
fn collect_day_dirs(data_dir: &Path) -> Vec<(NaiveDate, PathBuf)> {
    let mut day_dirs = Vec::new();
    let Ok(exchanges) = fs::read_dir(data_dir) else {
        return day_dirs;
    };
    for exchange in exchanges.flatten().filter(|e| e.path().is_dir()) {
        let Ok(symbols) = fs::read_dir(exchange.path()) else { continue };
        for symbol in symbols.flatten().filter(|e| e.path().is_dir()) {
            let Ok(days) = fs::read_dir(symbol.path()) else { continue };
            for day_entry in days.flatten().filter(|e| e.path().is_dir()) {
                let name = day_entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Ok(day) = NaiveDate::parse_from_str(name, "%Y-%m-%d") {
                    day_dirs.push((day, day_entry.path()));
                }
            }
        }
    }
    day_dirs
}
