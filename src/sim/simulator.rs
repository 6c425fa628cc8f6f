//! Order-matching simulator driven by replayed market state.
//!
//! Matching is intentionally simple: one order yields zero or one fill, no
//! partial fills, no queue modeling. Business rejections (filters, balances,
//! no quote) are silent by design — a backtest runs through thousands of
//! infeasible orders — and are tallied per reason for diagnostics. Only
//! programming-contract violations surface as errors.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::error::BacktestError;
use crate::replay::engine::{MarketState, ReplayEngine};
use crate::sim::filters::ExchangeFilters;
use crate::sim::strategy::Strategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Cancel,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// An order as emitted by a strategy. Quantity and price are pre-filter
/// values; the simulator applies lot-size and notional rules before matching.
#[derive(Clone, Debug)]
pub struct SimOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub order_id: String,
    pub created_at_us: i64,
}

impl SimOrder {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            order_id: Uuid::new_v4().simple().to_string(),
            created_at_us: 0,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: f64, price: f64) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Cancel request targeting an open limit order by id.
    pub fn cancel(symbol: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Buy,
            order_type: OrderType::Cancel,
            quantity: 0.0,
            price: None,
            order_id: order_id.into(),
            created_at_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SimFill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub timestamp_us: i64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct EquityPoint {
    pub timestamp_us: i64,
    pub equity: f64,
}

/// Why an order produced no fill. Expected, high-frequency behavior; counted,
/// never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoMarketPrice,
    QuantityFiltered,
    BelowMinNotional,
    InsufficientCash,
    InsufficientPosition,
}

/// Everything a finished run hands to the orchestrator.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub fills: Vec<SimFill>,
    pub equity_curve: Vec<EquityPoint>,
    pub cash_by_symbol: HashMap<String, f64>,
    pub positions: HashMap<String, f64>,
    pub open_orders: Vec<SimOrder>,
    pub rejections: HashMap<RejectReason, u64>,
}

/// Per-run replay/fill counters used for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub events_total: u64,
    pub events_by_symbol: HashMap<String, u64>,
    pub fills_by_symbol: HashMap<String, u64>,
}

pub struct ExecutionSimulator {
    cash_by_symbol: HashMap<String, f64>,
    positions: HashMap<String, f64>,
    fee_rate: f64,
    /// Fraction, not bps; always adverse to the taker.
    slippage: f64,
    filters: ExchangeFilters,
    fills: Vec<SimFill>,
    equity_curve: Vec<EquityPoint>,
    open_orders: Vec<SimOrder>,
    rejections: HashMap<RejectReason, u64>,
}

impl ExecutionSimulator {
    pub fn new(
        initial_cash_by_symbol: HashMap<String, f64>,
        fee_rate: f64,
        slippage_bps: f64,
        filters: ExchangeFilters,
    ) -> Self {
        let positions = initial_cash_by_symbol.keys().map(|s| (s.clone(), 0.0)).collect();
        Self {
            cash_by_symbol: initial_cash_by_symbol,
            positions,
            fee_rate,
            slippage: slippage_bps / 10_000.0,
            filters,
            fills: Vec::new(),
            equity_curve: Vec::new(),
            open_orders: Vec::new(),
            rejections: HashMap::new(),
        }
    }

    pub fn cash(&self, symbol: &str) -> f64 {
        self.cash_by_symbol.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn open_orders(&self) -> &[SimOrder] {
        &self.open_orders
    }

    pub fn rejection_count(&self, reason: RejectReason) -> u64 {
        self.rejections.get(&reason).copied().unwrap_or(0)
    }

    /// Submit one order against the current state.
    ///
    /// Market orders execute immediately against the best opposing quote
    /// (falling back to last trade). Limit orders rest on the open-order list
    /// and additionally execute now when they already cross. Cancels remove
    /// the matching open order by id (no-op when absent).
    pub fn submit_order(
        &mut self,
        mut order: SimOrder,
        state: &MarketState,
    ) -> Result<Vec<SimFill>, BacktestError> {
        if order.created_at_us == 0 {
            order.created_at_us = state.last_timestamp_us.unwrap_or(0);
        }
        match order.order_type {
            OrderType::Cancel => {
                self.open_orders.retain(|open| open.order_id != order.order_id);
                Ok(Vec::new())
            }
            OrderType::Market => Ok(self.try_execute(&order, state, None).into_iter().collect()),
            OrderType::Limit => {
                if order.price.is_none() {
                    return Err(BacktestError::LimitWithoutPrice { symbol: order.symbol });
                }
                self.open_orders.push(order.clone());
                let mut fills = Vec::new();
                if let Some(fill) = self.maybe_fill_limit(&order, state) {
                    self.remove_open_order(&fill.order_id);
                    fills.push(fill);
                }
                Ok(fills)
            }
        }
    }

    /// Re-evaluate resting limit orders for this state's symbol; fills any
    /// that now cross the market. This is how resting orders eventually
    /// execute as the market moves.
    pub fn on_event(&mut self, state: &MarketState) -> Vec<SimFill> {
        let candidates: Vec<SimOrder> = self
            .open_orders
            .iter()
            .filter(|order| order.symbol == state.symbol)
            .cloned()
            .collect();
        let mut fills = Vec::new();
        for order in candidates {
            if let Some(fill) = self.maybe_fill_limit(&order, state) {
                self.remove_open_order(&order.order_id);
                fills.push(fill);
            }
        }
        fills
    }

    /// Append one equity point: total cash plus every position marked at mid
    /// (or last trade when no two-sided quote exists), across all symbols.
    pub fn record_equity(&mut self, timestamp_us: i64, states: &HashMap<String, MarketState>) {
        let mut equity = 0.0;
        for (symbol, cash) in &self.cash_by_symbol {
            equity += cash;
            let Some(state) = states.get(symbol) else { continue };
            let Some(price) = state.mark_price() else { continue };
            equity += self.positions.get(symbol).copied().unwrap_or(0.0) * price;
        }
        self.equity_curve.push(EquityPoint { timestamp_us, equity });
    }

    /// Force-close every positive position with a market SELL so final equity
    /// reflects fully realized value.
    pub fn liquidate(&mut self, states: &HashMap<String, MarketState>) {
        let held: Vec<(String, f64)> = self
            .positions
            .iter()
            .filter(|(_, qty)| **qty > 0.0)
            .map(|(symbol, qty)| (symbol.clone(), *qty))
            .collect();
        for (symbol, quantity) in held {
            let Some(state) = states.get(&symbol) else { continue };
            let order = SimOrder::market(symbol, Side::Sell, quantity);
            // Market orders never hit the contract-error path.
            let _ = self.submit_order(order, state);
        }
    }

    pub fn build_report(&self) -> ExecutionReport {
        ExecutionReport {
            fills: self.fills.clone(),
            equity_curve: self.equity_curve.clone(),
            cash_by_symbol: self.cash_by_symbol.clone(),
            positions: self.positions.clone(),
            open_orders: self.open_orders.clone(),
            rejections: self.rejections.clone(),
        }
    }

    /// The single loop where replay, matching, and strategy interleave.
    ///
    /// Per replayed event, in order: cooperative stop check, state update,
    /// `strategy.on_event` with the just-updated state, order submission,
    /// resting-order re-check, `strategy.on_fill` per fill (before the next
    /// event), equity recording. Ends with liquidation and a final equity
    /// point at the range end.
    pub fn run_strategy(
        &mut self,
        engine: &mut ReplayEngine,
        strategy: &mut dyn Strategy,
        stop: &AtomicBool,
    ) -> Result<RunStats, BacktestError> {
        let mut stats = RunStats::default();
        let events = engine.events();
        for event in events {
            if stop.load(Ordering::Relaxed) {
                return Err(BacktestError::Cancelled);
            }
            let state = engine.update_state(&event);
            stats.events_total += 1;
            *stats.events_by_symbol.entry(event.symbol.clone()).or_insert(0) += 1;

            let orders = strategy.on_event(&event, state);
            let mut fills = Vec::new();
            for order in orders {
                fills.extend(self.submit_order(order, state)?);
            }
            fills.extend(self.on_event(state));
            for fill in &fills {
                *stats.fills_by_symbol.entry(fill.symbol.clone()).or_insert(0) += 1;
                strategy.on_fill(fill);
            }
            self.record_equity(event.timestamp_us, engine.states());
        }
        self.liquidate(engine.states());
        self.record_equity(engine.end_timestamp_us(), engine.states());
        Ok(stats)
    }

    fn remove_open_order(&mut self, order_id: &str) {
        self.open_orders.retain(|order| order.order_id != order_id);
    }

    /// Crossing rule shared by immediate and resting limit evaluation: a BUY
    /// crosses when its price >= best ask, a SELL when its price <= best bid;
    /// execution happens at the marketable side of the pair.
    fn maybe_fill_limit(&mut self, order: &SimOrder, state: &MarketState) -> Option<SimFill> {
        let limit_price = order.price?;
        let exec_price = match order.side {
            Side::Buy => {
                let ask = state.best_ask?;
                if limit_price < ask {
                    return None;
                }
                limit_price.min(ask)
            }
            Side::Sell => {
                let bid = state.best_bid?;
                if limit_price > bid {
                    return None;
                }
                limit_price.max(bid)
            }
        };
        self.try_execute(order, state, Some(exec_price))
    }

    fn try_execute(
        &mut self,
        order: &SimOrder,
        state: &MarketState,
        price_override: Option<f64>,
    ) -> Option<SimFill> {
        match self.execute(order, state, price_override) {
            Ok(fill) => Some(fill),
            Err(reason) => {
                *self.rejections.entry(reason).or_insert(0) += 1;
                debug!(symbol = %order.symbol, side = %order.side, ?reason, "order rejected");
                None
            }
        }
    }

    fn execute(
        &mut self,
        order: &SimOrder,
        state: &MarketState,
        price_override: Option<f64>,
    ) -> Result<SimFill, RejectReason> {
        let price = price_override
            .or_else(|| taker_price(state, order.side))
            .ok_or(RejectReason::NoMarketPrice)?;
        let price = self.apply_slippage(price, order.side);

        let default_filters = crate::sim::filters::SymbolFilters::default();
        let filters = self.filters.get(&order.symbol).unwrap_or(&default_filters);
        let quantity = filters
            .adjust_qty(order.quantity)
            .ok_or(RejectReason::QuantityFiltered)?;
        if !filters.validate_notional(price, quantity) {
            return Err(RejectReason::BelowMinNotional);
        }

        let notional = price * quantity;
        let fee = notional * self.fee_rate;
        let cash = self.cash(&order.symbol);
        let position = self.position(&order.symbol);

        match order.side {
            Side::Buy => {
                if cash < notional + fee {
                    return Err(RejectReason::InsufficientCash);
                }
                self.cash_by_symbol.insert(order.symbol.clone(), cash - notional - fee);
                self.positions.insert(order.symbol.clone(), position + quantity);
            }
            Side::Sell => {
                if position < quantity {
                    return Err(RejectReason::InsufficientPosition);
                }
                self.positions.insert(order.symbol.clone(), position - quantity);
                self.cash_by_symbol.insert(order.symbol.clone(), cash + notional - fee);
            }
        }

        let timestamp_us = state
            .last_timestamp_us
            .unwrap_or_else(|| Utc::now().timestamp_micros());
        let fill = SimFill {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            price,
            quantity,
            fee,
            timestamp_us,
        };
        self.fills.push(fill.clone());
        Ok(fill)
    }

    fn apply_slippage(&self, price: f64, side: Side) -> f64 {
        if self.slippage <= 0.0 {
            return price;
        }
        match side {
            Side::Buy => price * (1.0 + self.slippage),
            Side::Sell => price * (1.0 - self.slippage),
        }
    }
}

fn taker_price(state: &MarketState, side: Side) -> Option<f64> {
    match side {
        Side::Buy => state.best_ask.or(state.last_trade_price),
        Side::Sell => state.best_bid.or(state.last_trade_price),
    }
}
