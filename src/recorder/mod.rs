//! Live capture: combined-stream WebSocket workers appending raw events to
//! the store.
//!
//! Subscriptions are chunked across connections to respect the feed's
//! per-connection stream limit. Each worker reconnects forever with capped
//! backoff; the backoff resets once a connection has stayed healthy long
//! enough. Payloads are persisted verbatim, except that a receive-time event
//! timestamp is stamped into payloads that arrive without one (bookTicker),
//! so every stored record is replayable.

pub mod backoff;
pub mod metrics;

pub use metrics::{HealthSnapshot, StreamMetrics};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use tracing::{debug, error, info, warn};

use crate::config::RecorderConfig;
use crate::events::{event_timestamp_us, infer_stream};
use crate::recorder::backoff::Backoff;
use crate::store::datastore::SharedEventStore;

pub struct MarketRecorder {
    store: SharedEventStore,
    cfg: RecorderConfig,
    metrics: Arc<StreamMetrics>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl MarketRecorder {
    pub fn new(store: SharedEventStore, cfg: RecorderConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            cfg,
            metrics: Arc::new(StreamMetrics::new()),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Combined-stream names for a symbol/stream matrix, in subscription form.
    pub fn subscriptions(
        &self,
        symbols: &[String],
        streams: &[crate::events::StreamKind],
    ) -> Vec<String> {
        let mut names = Vec::with_capacity(symbols.len() * streams.len());
        for symbol in symbols {
            for stream in streams {
                names.push(stream.subscription(symbol, &self.cfg.depth_speed));
            }
        }
        names
    }

    /// Spawn one capture worker per connection-sized chunk of subscriptions.
    pub fn start(&self, symbols: &[String], streams: &[crate::events::StreamKind]) {
        let names = self.subscriptions(symbols, streams);
        if names.is_empty() {
            warn!("recorder started with no subscriptions");
            return;
        }
        let chunk_size = self.cfg.max_streams_per_connection.max(1);
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for chunk in names.chunks(chunk_size) {
            let worker = ConnectionWorker {
                store: Arc::clone(&self.store),
                cfg: self.cfg.clone(),
                metrics: Arc::clone(&self.metrics),
                subscriptions: chunk.to_vec(),
                shutdown: self.shutdown_tx.subscribe(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        info!(
            subscriptions = names.len(),
            connections = workers.len(),
            "recorder started"
        );
    }

    /// Signal every worker to stop and wait for them to drain, bounded by
    /// `grace`. Safe to call more than once.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            workers.drain(..).collect()
        };
        for handle in handles {
            if timeout(grace, handle).await.is_err() {
                warn!("recorder worker did not stop within grace period");
            }
        }
        info!("recorder stopped");
    }
}

struct ConnectionWorker {
    store: SharedEventStore,
    cfg: RecorderConfig,
    metrics: Arc<StreamMetrics>,
    subscriptions: Vec<String>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let url = format!(
            "{}?streams={}&timeUnit=MICROSECOND",
            self.cfg.ws_url,
            self.subscriptions.join("/")
        );
        if Url::parse(&url).is_err() {
            error!(%url, "invalid stream url, worker not starting");
            return;
        }
        let mut backoff = Backoff::new(Duration::from_secs(self.cfg.max_backoff_secs));

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match connect_async(&url).await {
                Ok((ws, _)) => {
                    info!(streams = self.subscriptions.len(), "feed connected");
                    self.metrics.connection_opened();
                    let connected_at = Instant::now();
                    self.pump(ws).await;
                    self.metrics.connection_closed();
                    if connected_at.elapsed() >= Duration::from_secs(self.cfg.healthy_connection_secs)
                    {
                        backoff.reset();
                    }
                }
                Err(e) => {
                    error!(error = %e, "feed connect failed");
                }
            }
            if *self.shutdown.borrow() {
                break;
            }
            self.metrics.record_reconnect();
            let delay = backoff.next_delay();
            warn!(delay_ms = delay.as_millis() as u64, "reconnecting feed");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        debug!("capture worker exiting");
    }

    /// Read frames until the connection drops or shutdown is signalled.
    async fn pump(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut write, mut read) = ws.split();
        let mut shutdown = self.shutdown.clone();
        let mut ping_timer = interval(Duration::from_secs(self.cfg.ping_interval_secs.max(1)));
        // First tick fires immediately; skip it.
        ping_timer.tick().await;
        let mut last_ping_sent: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ = ping_timer.tick() => {
                    last_ping_sent = Some(Instant::now());
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            if let Some(sent) = last_ping_sent.take() {
                                self.metrics.record_ping_latency(sent.elapsed());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "feed closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "feed read error");
                            break;
                        }
                        None => {
                            warn!("feed stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Persist one combined-stream envelope: `{"stream": name, "data": {..}}`.
    fn handle_message(&self, text: &str) {
        let Ok(envelope) = serde_json::from_str::<Value>(text) else {
            debug!("unparseable feed message");
            return;
        };
        let Some(stream_name) = envelope.get("stream").and_then(|s| s.as_str()) else {
            // Subscription acks and errors arrive without an envelope.
            debug!(message = %text, "non-data feed message");
            return;
        };
        let Some(kind) = infer_stream(stream_name) else {
            debug!(stream = %stream_name, "unknown stream kind");
            return;
        };
        let Some(mut data) = envelope.get("data").cloned() else {
            return;
        };
        let Some(symbol) = data.get("s").and_then(|s| s.as_str()).map(str::to_owned) else {
            debug!(stream = %stream_name, "payload without symbol");
            return;
        };

        let timestamp_us = match event_timestamp_us(&data) {
            Some(ts) => ts,
            None => {
                // bookTicker carries no exchange timestamp; stamp receive time
                // so the record stays replayable.
                let now_us = Utc::now().timestamp_micros();
                if let Some(obj) = data.as_object_mut() {
                    obj.insert("E".to_string(), Value::from(now_us));
                }
                now_us
            }
        };

        self.metrics.record_event(stream_name);
        if let Err(e) = self
            .store
            .write_event(&symbol, kind, &data, timestamp_us / 1_000)
        {
            error!(error = %e, %symbol, stream = %stream_name, "failed to persist event");
        }
    }
}
