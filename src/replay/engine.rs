//! Deterministic replay of stored events and market-state reconstruction.
//!
//! The engine opens one store iterator per `(symbol, stream)` pair and merges
//! them into a single globally timestamp-ordered sequence. Replaying the same
//! stored range always produces the same sequence: per-stream iterators are
//! append-ordered and the merge tie-break is stable insertion order.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::events::{event_timestamp_us, EventPayload, ReplayEvent, StreamKind};
use crate::replay::book::OrderBook;
use crate::replay::merge::OrderedMerge;
use crate::store::datastore::SharedEventStore;

/// Live, per-symbol reconstruction of the market. Mutated only by the
/// component driving it (this engine offline, the recorder-fed tracker
/// online); the simulator and strategies read it.
#[derive(Clone, Debug)]
pub struct MarketState {
    pub symbol: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub last_trade_price: Option<f64>,
    pub last_timestamp_us: Option<i64>,
    pub order_book: Option<OrderBook>,
}

impl MarketState {
    pub fn new(symbol: impl Into<String>, with_book: bool) -> Self {
        Self {
            symbol: symbol.into(),
            best_bid: None,
            best_ask: None,
            last_trade_price: None,
            last_timestamp_us: None,
            order_book: with_book.then(OrderBook::new),
        }
    }

    /// Mark price for valuation: mid of a two-sided quote, else last trade.
    pub fn mark_price(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => self.last_trade_price,
        }
    }
}

type StreamSource = Box<dyn Iterator<Item = ReplayEvent> + Send>;

fn event_key(event: &ReplayEvent) -> i64 {
    event.timestamp_us
}

/// The merged, ordered event sequence for one replay run. Owns its store
/// handle, so the engine stays mutably borrowable for `update_state` while
/// iterating.
pub type ReplayIter = OrderedMerge<StreamSource, i64, fn(&ReplayEvent) -> i64>;

pub struct ReplayEngine {
    store: SharedEventStore,
    symbols: Vec<String>,
    streams: Vec<StreamKind>,
    start_us: i64,
    end_us: i64,
    state_by_symbol: HashMap<String, MarketState>,
    use_depth_book: bool,
}

impl ReplayEngine {
    pub fn new(
        store: SharedEventStore,
        symbols: &[String],
        streams: &[StreamKind],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_depth_book: bool,
    ) -> Self {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        let state_by_symbol = symbols
            .iter()
            .map(|symbol| (symbol.clone(), MarketState::new(symbol.clone(), use_depth_book)))
            .collect();
        Self {
            store,
            symbols,
            streams: streams.to_vec(),
            start_us: start.timestamp_micros(),
            end_us: end.timestamp_micros(),
            state_by_symbol,
            use_depth_book,
        }
    }

    pub fn states(&self) -> &HashMap<String, MarketState> {
        &self.state_by_symbol
    }

    pub fn start_timestamp_us(&self) -> i64 {
        self.start_us
    }

    pub fn end_timestamp_us(&self) -> i64 {
        self.end_us
    }

    pub fn state(&self, symbol: &str) -> Option<&MarketState> {
        self.state_by_symbol.get(symbol)
    }

    /// Globally timestamp-ordered event sequence for the configured range.
    ///
    /// Raw payloads are decoded here, once; undecodable or timestamp-less
    /// records are skipped. The microsecond range filter mirrors the
    /// recorder's normalization rule, independent of partition boundaries.
    pub fn events(&self) -> ReplayIter {
        let start_ms = self.start_us / 1_000;
        let end_ms = self.end_us / 1_000;
        let mut sources: Vec<StreamSource> = Vec::new();
        for symbol in &self.symbols {
            for stream in &self.streams {
                let stream = *stream;
                let symbol = symbol.clone();
                let (start_us, end_us) = (self.start_us, self.end_us);
                let raw = self.store.iter_events(&symbol, stream, start_ms, end_ms);
                sources.push(Box::new(raw.filter_map(move |payload| {
                    let timestamp_us = event_timestamp_us(&payload)?;
                    if timestamp_us < start_us || timestamp_us > end_us {
                        return None;
                    }
                    let payload = EventPayload::decode(stream, &payload)?;
                    Some(ReplayEvent {
                        symbol: symbol.clone(),
                        stream,
                        timestamp_us,
                        payload,
                    })
                })));
            }
        }
        OrderedMerge::new(sources, event_key)
    }

    /// Apply one event to the owning symbol's state and return it.
    ///
    /// The same state instance is mutated in place; callers must not assume
    /// immutability between events.
    pub fn update_state(&mut self, event: &ReplayEvent) -> &MarketState {
        let with_book = self.use_depth_book;
        let state = self
            .state_by_symbol
            .entry(event.symbol.clone())
            .or_insert_with(|| MarketState::new(event.symbol.clone(), with_book));
        state.last_timestamp_us = Some(event.timestamp_us);

        match &event.payload {
            EventPayload::Trade { price, .. } => {
                state.last_trade_price = Some(*price);
            }
            EventPayload::Quote { bid, ask, .. } => {
                state.best_bid = Some(*bid);
                state.best_ask = Some(*ask);
            }
            EventPayload::Depth { bids, asks } => {
                if let Some(book) = state.order_book.as_mut() {
                    book.apply_depth(bids, asks);
                    // The book is authoritative once depth flows.
                    state.best_bid = book.best_bid().or(state.best_bid);
                    state.best_ask = book.best_ask().or(state.best_ask);
                }
            }
        }

        // Backfill a one-sided view from the book if quotes never arrived.
        if state.best_bid.is_none() || state.best_ask.is_none() {
            if let Some(book) = state.order_book.as_ref() {
                state.best_bid = state.best_bid.or_else(|| book.best_bid());
                state.best_ask = state.best_ask.or_else(|| book.best_ask());
            }
        }

        state
    }
}
