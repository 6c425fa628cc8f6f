//! Capture-health counters shared across recorder workers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MetricsInner {
    event_times: HashMap<String, VecDeque<Instant>>,
    last_event: HashMap<String, Instant>,
    open_connections: usize,
    reconnects: u64,
    last_ping_latency_ms: Option<f64>,
}

/// Shared counters the recorder updates and health reporting reads. Event
/// rates are computed over a short sliding window per stream name.
#[derive(Default)]
pub struct StreamMetrics {
    inner: Mutex<MetricsInner>,
}

/// Point-in-time view of capture health, serializable for logs or reports.
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub ws_connected: bool,
    pub open_connections: usize,
    pub reconnects: u64,
    pub last_ping_latency_ms: Option<f64>,
    pub event_rate_per_s: HashMap<String, f64>,
    pub last_event_age_ms: HashMap<String, u64>,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, stream_name: &str) {
        let now = Instant::now();
        let mut inner = self.lock();
        let times = inner.event_times.entry(stream_name.to_string()).or_default();
        times.push_back(now);
        while times.front().is_some_and(|t| now.duration_since(*t) > RATE_WINDOW) {
            times.pop_front();
        }
        inner.last_event.insert(stream_name.to_string(), now);
    }

    pub fn connection_opened(&self) {
        self.lock().open_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut inner = self.lock();
        inner.open_connections = inner.open_connections.saturating_sub(1);
    }

    pub fn record_reconnect(&self) {
        self.lock().reconnects += 1;
    }

    pub fn record_ping_latency(&self, latency: Duration) {
        self.lock().last_ping_latency_ms = Some(latency.as_secs_f64() * 1_000.0);
    }

    pub fn snapshot(&self, stream_names: &[String]) -> HealthSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut event_rate_per_s = HashMap::new();
        let mut last_event_age_ms = HashMap::new();
        for name in stream_names {
            let rate = match inner.event_times.get_mut(name) {
                Some(times) => {
                    while times.front().is_some_and(|t| now.duration_since(*t) > RATE_WINDOW) {
                        times.pop_front();
                    }
                    times.len() as f64 / RATE_WINDOW.as_secs_f64()
                }
                None => 0.0,
            };
            event_rate_per_s.insert(name.clone(), rate);
            if let Some(last) = inner.last_event.get(name) {
                last_event_age_ms.insert(name.clone(), now.duration_since(*last).as_millis() as u64);
            }
        }
        HealthSnapshot {
            taken_at: Utc::now(),
            ws_connected: inner.open_connections > 0,
            open_connections: inner.open_connections,
            reconnects: inner.reconnects,
            last_ping_latency_ms: inner.last_ping_latency_ms,
            event_rate_per_s,
            last_event_age_ms,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        // Counter updates cannot panic while holding the lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_rate_counts_recent_events() {
        let metrics = StreamMetrics::new();
        for _ in 0..10 {
            metrics.record_event("btcusdt@aggTrade");
        }
        let snapshot = metrics.snapshot(&["btcusdt@aggTrade".to_string()]);
        assert_eq!(snapshot.event_rate_per_s["btcusdt@aggTrade"], 2.0);
        assert!(snapshot.last_event_age_ms.contains_key("btcusdt@aggTrade"));
    }

    #[test]
    fn test_unseen_stream_reports_zero_rate() {
        let metrics = StreamMetrics::new();
        let snapshot = metrics.snapshot(&["ethusdt@depth".to_string()]);
        assert_eq!(snapshot.event_rate_per_s["ethusdt@depth"], 0.0);
        assert!(!snapshot.last_event_age_ms.contains_key("ethusdt@depth"));
    }

    #[test]
    fn test_connection_counters() {
        let metrics = StreamMetrics::new();
        assert!(!metrics.snapshot(&[]).ws_connected);

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.record_reconnect();
        metrics.connection_closed();

        let snapshot = metrics.snapshot(&[]);
        assert!(snapshot.ws_connected);
        assert_eq!(snapshot.open_connections, 1);
        assert_eq!(snapshot.reconnects, 1);

        metrics.connection_closed();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot(&[]).open_connections, 0);
    }

    #[test]
    fn test_ping_latency_is_reported() {
        let metrics = StreamMetrics::new();
        metrics.record_ping_latency(Duration::from_millis(42));
        let snapshot = metrics.snapshot(&[]);
        assert_eq!(snapshot.last_ping_latency_ms, Some(42.0));
    }
}
