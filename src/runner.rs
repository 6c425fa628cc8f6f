//! Backtest orchestration: coverage check, warm-up capture, replay run,
//! summary and report artifacts.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::BacktestError;
use crate::recorder::MarketRecorder;
use crate::replay::engine::ReplayEngine;
use crate::sim::filters::ExchangeFilters;
use crate::sim::simulator::{ExecutionSimulator, RejectReason, RunStats};
use crate::sim::strategy::{MomentumReplayStrategy, Strategy};
use crate::store::datastore::SharedEventStore;

#[derive(Clone, Debug, Serialize)]
pub struct SymbolDiagnostics {
    pub events: u64,
    pub trades: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BacktestSummary {
    pub run_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_return: f64,
    pub num_trades: u64,
    pub max_drawdown: f64,
    pub rejections: HashMap<RejectReason, u64>,
    pub symbols: HashMap<String, SymbolDiagnostics>,
    pub report_dir: PathBuf,
}

pub struct BacktestRunner {
    store: SharedEventStore,
    cfg: AppConfig,
    stop: Arc<AtomicBool>,
}

impl BacktestRunner {
    pub fn new(store: SharedEventStore, cfg: AppConfig) -> Self {
        Self {
            store,
            cfg,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation flag checked per replayed event and during
    /// warm-up capture.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Resolve the replay window from explicit dates or the lookback default.
    pub fn resolve_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), BacktestError> {
        let bt = &self.cfg.backtest;
        let parse = |raw: &str| -> Option<DateTime<Utc>> {
            let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
            Some(day.and_hms_opt(0, 0, 0)?.and_utc())
        };
        let (start, end) = match (&bt.start_date, &bt.end_date) {
            (Some(s), Some(e)) => {
                let start = parse(s);
                let end = parse(e).map(|d| d + ChronoDuration::seconds(86_399));
                match (start, end) {
                    (Some(start), Some(end)) => (start, end),
                    _ => {
                        let now = Utc::now();
                        return Err(BacktestError::InvalidRange { start: now, end: now });
                    }
                }
            }
            _ => {
                let end = Utc::now();
                (end - ChronoDuration::days(bt.lookback_days), end)
            }
        };
        if start > end {
            return Err(BacktestError::InvalidRange { start, end });
        }
        Ok((start, end))
    }

    /// Capture live data for symbols that have no stored coverage in the
    /// replay window, bounded by the configured warm-up period.
    pub async fn warm_up_missing(&self, recorder: &MarketRecorder) -> Result<(), BacktestError> {
        let (start, end) = self.resolve_range()?;
        let missing: Vec<String> = self
            .cfg
            .symbols
            .iter()
            .filter(|symbol| !self.store.has_coverage(symbol, start, end))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let warmup = Duration::from_secs(self.cfg.backtest.warmup_minutes * 60);
        info!(symbols = ?missing, warmup_secs = warmup.as_secs(), "warming up capture for uncovered symbols");
        recorder.start(&missing, &self.cfg.streams);
        let deadline = std::time::Instant::now() + warmup;
        while std::time::Instant::now() < deadline {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
        recorder.stop(Duration::from_secs(5)).await;
        Ok(())
    }

    /// Full run: fetch filters, replay, write report artifacts.
    pub async fn run(&self) -> Result<BacktestSummary, BacktestError> {
        let client = reqwest::Client::new();
        let filters = match ExchangeFilters::fetch(&client, &self.cfg.filters.rest_base_url).await {
            Ok(filters) => filters,
            Err(e) => {
                // A backtest against stored data should not die on a REST
                // hiccup; unfiltered quantities pass through unchanged.
                warn!(error = %e, "exchange filters unavailable, running unfiltered");
                ExchangeFilters::empty()
            }
        };
        self.run_with_filters(filters)
    }

    pub fn run_with_filters(
        &self,
        filters: ExchangeFilters,
    ) -> Result<BacktestSummary, BacktestError> {
        let (start, end) = self.resolve_range()?;
        let bt = &self.cfg.backtest;
        let symbols: Vec<String> = self.cfg.symbols.iter().map(|s| s.to_uppercase()).collect();
        let per_symbol_cash = bt.initial_balance / symbols.len().max(1) as f64;
        let initial_cash: HashMap<String, f64> = symbols
            .iter()
            .map(|s| (s.clone(), per_symbol_cash))
            .collect();

        let mut engine = ReplayEngine::new(
            Arc::clone(&self.store),
            &symbols,
            &self.cfg.streams,
            start,
            end,
            true,
        );
        let mut simulator = ExecutionSimulator::new(
            initial_cash,
            bt.fee_rate,
            bt.slippage_bps,
            filters,
        );
        // Leave headroom for fees so the first entry is never cash-rejected.
        let mut strategy = MomentumReplayStrategy::new(per_symbol_cash * 0.95);

        info!(%start, %end, symbols = symbols.len(), "replay starting");
        let stats = simulator.run_strategy(&mut engine, &mut strategy as &mut dyn Strategy, &self.stop)?;
        let report = simulator.build_report();

        let final_balance: f64 = report.cash_by_symbol.values().sum();
        let num_trades = report.fills.len() as u64;
        let max_drawdown = max_drawdown(report.equity_curve.iter().map(|p| p.equity));

        let mut diagnostics = HashMap::new();
        for symbol in &symbols {
            let events = stats.events_by_symbol.get(symbol).copied().unwrap_or(0);
            let trades = stats.fills_by_symbol.get(symbol).copied().unwrap_or(0);
            diagnostics.insert(
                symbol.clone(),
                SymbolDiagnostics {
                    events,
                    trades,
                    skip_reason: skip_reason(events, trades, &report.rejections),
                },
            );
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let report_dir = bt.report_dir.join(&run_id);
        let summary = BacktestSummary {
            run_id,
            start,
            end,
            initial_balance: bt.initial_balance,
            final_balance,
            total_return: (final_balance - bt.initial_balance) / bt.initial_balance,
            num_trades,
            max_drawdown,
            rejections: report.rejections.clone(),
            symbols: diagnostics,
            report_dir: report_dir.clone(),
        };

        self.persist(&summary, &report, &report_dir)?;
        info!(
            run_id = %summary.run_id,
            final_balance = summary.final_balance,
            trades = summary.num_trades,
            max_drawdown = summary.max_drawdown,
            "replay finished"
        );
        log_run_stats(&stats);
        Ok(summary)
    }

    fn persist(
        &self,
        summary: &BacktestSummary,
        report: &crate::sim::simulator::ExecutionReport,
        dir: &PathBuf,
    ) -> Result<(), BacktestError> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join("summary.json"),
            serde_json::to_string_pretty(summary).map_err(crate::error::StoreError::from)?,
        )?;

        let mut equity = csv::Writer::from_path(dir.join("equity.csv"))?;
        for point in &report.equity_curve {
            equity.serialize(point)?;
        }
        equity.flush()?;

        let mut trades = csv::Writer::from_path(dir.join("trades.csv"))?;
        for fill in &report.fills {
            trades.serialize(fill)?;
        }
        trades.flush()?;
        Ok(())
    }
}

fn skip_reason(
    events: u64,
    trades: u64,
    rejections: &HashMap<RejectReason, u64>,
) -> Option<String> {
    if events == 0 {
        return Some("no_data".to_string());
    }
    if trades == 0 {
        let filtered = rejections.get(&RejectReason::QuantityFiltered).copied().unwrap_or(0)
            + rejections.get(&RejectReason::BelowMinNotional).copied().unwrap_or(0);
        if filtered > 0 {
            return Some("filters_blocked".to_string());
        }
    }
    None
}

/// Largest peak-to-trough equity decline, as a fraction of the peak.
pub fn max_drawdown(equity: impl Iterator<Item = f64>) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

fn log_run_stats(stats: &RunStats) {
    for (symbol, events) in &stats.events_by_symbol {
        let fills = stats.fills_by_symbol.get(symbol).copied().unwrap_or(0);
        info!(%symbol, events, fills, "symbol replay stats");
    }
}
