//! Per-symbol order book reconstructed from depth deltas.
//!
//! Prices are `Decimal` keys so levels compare exactly; a delta with qty <= 0
//! removes the level (standard exchange delta semantics).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, f64>,
    asks: BTreeMap<Decimal, f64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one depth delta: `(price, qty)` pairs per side.
    pub fn apply_depth(&mut self, bids: &[(Decimal, f64)], asks: &[(Decimal, f64)]) {
        for (price, qty) in bids {
            Self::apply_level(&mut self.bids, *price, *qty);
        }
        for (price, qty) in asks {
            Self::apply_level(&mut self.asks, *price, *qty);
        }
    }

    fn apply_level(levels: &mut BTreeMap<Decimal, f64>, price: Decimal, qty: f64) {
        if qty <= 0.0 {
            levels.remove(&price);
        } else {
            levels.insert(price, qty);
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().and_then(|p| p.to_f64())
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().and_then(|p| p.to_f64())
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
