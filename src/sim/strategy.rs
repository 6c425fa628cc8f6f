//! Strategy trait for replay runs plus a simple momentum reference strategy.

use std::collections::HashMap;
use tracing::debug;

use crate::events::{EventPayload, ReplayEvent};
use crate::replay::engine::MarketState;
use crate::sim::simulator::{Side, SimFill, SimOrder};

/// Decision layer driven by the replay loop. `on_event` sees the state
/// already updated with the current event; fills from this event's orders
/// arrive via `on_fill` before the next event.
pub trait Strategy {
    fn on_event(&mut self, event: &ReplayEvent, state: &MarketState) -> Vec<SimOrder>;

    fn on_fill(&mut self, fill: &SimFill);
}

/// Trade-to-trade momentum: buy a fixed notional when price jumps by the
/// entry threshold, flatten when it drops by the exit threshold. Tracks its
/// own positions from fills; never pyramids.
pub struct MomentumReplayStrategy {
    trade_notional: f64,
    entry_bps: f64,
    exit_bps: f64,
    last_price: HashMap<String, f64>,
    positions: HashMap<String, f64>,
}

impl MomentumReplayStrategy {
    pub fn new(trade_notional: f64) -> Self {
        Self {
            trade_notional,
            entry_bps: 5.0,
            exit_bps: 5.0,
            last_price: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn with_thresholds(trade_notional: f64, entry_bps: f64, exit_bps: f64) -> Self {
        Self {
            entry_bps,
            exit_bps,
            ..Self::new(trade_notional)
        }
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }
}

impl Strategy for MomentumReplayStrategy {
    fn on_event(&mut self, event: &ReplayEvent, _state: &MarketState) -> Vec<SimOrder> {
        let EventPayload::Trade { price, .. } = event.payload else {
            return Vec::new();
        };
        let Some(prev) = self.last_price.insert(event.symbol.clone(), price) else {
            return Vec::new();
        };

        let position = self.position(&event.symbol);
        if position <= 0.0 && price > prev * (1.0 + self.entry_bps / 10_000.0) {
            let quantity = self.trade_notional / price;
            debug!(symbol = %event.symbol, price, quantity, "momentum entry");
            return vec![SimOrder::market(event.symbol.clone(), Side::Buy, quantity)];
        }
        if position > 0.0 && price < prev * (1.0 - self.exit_bps / 10_000.0) {
            debug!(symbol = %event.symbol, price, quantity = position, "momentum exit");
            return vec![SimOrder::market(event.symbol.clone(), Side::Sell, position)];
        }
        Vec::new()
    }

    fn on_fill(&mut self, fill: &SimFill) {
        let position = self.positions.entry(fill.symbol.clone()).or_insert(0.0);
        match fill.side {
            Side::Buy => *position += fill.quantity,
            Side::Sell => *position -= fill.quantity,
        }
    }
}
