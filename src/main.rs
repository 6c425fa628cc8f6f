mod config;
mod error;
mod events;
mod recorder;
mod replay;
mod runner;
mod sim;
mod store;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use recorder::MarketRecorder;
use runner::BacktestRunner;
use store::{DataBudget, EventStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Setup Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting TickVault...");

    // Load Configuration
    let config = AppConfig::load()?;
    info!(mode = %config.mode, symbols = ?config.symbols, "Loaded configuration");

    let budget = DataBudget::new(
        &config.data_dir,
        config.storage.max_gb,
        Duration::from_secs(config.storage.check_interval_secs),
    );
    let store = Arc::new(EventStore::new(&config.data_dir, &config.exchange, budget));

    match config.mode.as_str() {
        "record" => {
            let recorder = MarketRecorder::new(Arc::clone(&store), config.recorder.clone());
            recorder.start(&config.symbols, &config.streams);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            let snapshot = recorder.metrics().snapshot(&[]);
            info!(reconnects = snapshot.reconnects, "Capture session ending");
            recorder.stop(Duration::from_secs(10)).await;
        }
        "backtest" => {
            let recorder = MarketRecorder::new(Arc::clone(&store), config.recorder.clone());
            let runner = BacktestRunner::new(Arc::clone(&store), config);

            let stop = runner.stop_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received, cancelling backtest");
                    stop.store(true, Ordering::Relaxed);
                }
            });

            runner.warm_up_missing(&recorder).await?;
            let summary = runner.run().await?;
            info!(
                run_id = %summary.run_id,
                initial_balance = summary.initial_balance,
                final_balance = summary.final_balance,
                total_return = summary.total_return,
                trades = summary.num_trades,
                max_drawdown = summary.max_drawdown,
                report_dir = %summary.report_dir.display(),
                "Backtest complete"
            );
        }
        other => {
            error!(mode = %other, "Unknown mode, expected 'record' or 'backtest'");
            std::process::exit(2);
        }
    }

    Ok(())
}
