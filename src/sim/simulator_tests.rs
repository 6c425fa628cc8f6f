//! Unit tests for the execution simulator: matching, filters, balances.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::replay::engine::MarketState;
use crate::sim::filters::{ExchangeFilters, SymbolFilters};
use crate::sim::simulator::{ExecutionSimulator, RejectReason, Side, SimOrder};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn state(symbol: &str, bid: Option<f64>, ask: Option<f64>, last: Option<f64>) -> MarketState {
    let mut state = MarketState::new(symbol, false);
    state.best_bid = bid;
    state.best_ask = ask;
    state.last_trade_price = last;
    state.last_timestamp_us = Some(1_714_521_600_000_000);
    state
}

fn sim(initial_cash: f64) -> ExecutionSimulator {
    let cash = HashMap::from([("BTCUSDT".to_string(), initial_cash)]);
    ExecutionSimulator::new(cash, 0.001, 0.0, ExchangeFilters::empty())
}

#[test]
fn test_market_buy_fills_at_ask() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(99.0), Some(100.0), Some(99.5));

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &state)
        .unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, 100.0);
    assert_eq!(fills[0].quantity, 1.0);
    assert_eq!(fills[0].fee, 0.1);
    assert_eq!(sim.position("BTCUSDT"), 1.0);
}

#[test]
fn test_market_sell_fills_at_bid() {
    let mut sim = sim(1_000.0);
    let quote = state("BTCUSDT", Some(99.0), Some(100.0), None);
    sim.submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &quote)
        .unwrap();

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Sell, 1.0), &quote)
        .unwrap();
    assert_eq!(fills[0].price, 99.0);
    assert_eq!(sim.position("BTCUSDT"), 0.0);
}

#[test]
fn test_falls_back_to_last_trade_price() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", None, None, Some(50.0));

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &state)
        .unwrap();
    assert_eq!(fills[0].price, 50.0);
}

#[test]
fn test_no_market_price_rejects() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", None, None, None);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &state)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.rejection_count(RejectReason::NoMarketPrice), 1);
    assert_eq!(sim.cash("BTCUSDT"), 1_000.0);
}

#[test]
fn test_slippage_is_adverse_on_both_sides() {
    let cash = HashMap::from([("BTCUSDT".to_string(), 10_000.0)]);
    let mut sim = ExecutionSimulator::new(cash, 0.0, 10.0, ExchangeFilters::empty());
    let state = state("BTCUSDT", Some(100.0), Some(100.0), None);

    let buy = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &state)
        .unwrap();
    assert!((buy[0].price - 100.1).abs() < 1e-9);

    let sell = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Sell, 1.0), &state)
        .unwrap();
    assert!((sell[0].price - 99.9).abs() < 1e-9);
}

#[test]
fn test_lot_size_floors_fill_quantity() {
    let mut filters = ExchangeFilters::empty();
    filters.insert(
        "BTCUSDT",
        SymbolFilters {
            min_qty: Some(d("0.01")),
            max_qty: Some(d("100")),
            step_size: Some(d("0.001")),
            min_notional: None,
        },
    );
    let cash = HashMap::from([("BTCUSDT".to_string(), 1_000.0)]);
    let mut sim = ExecutionSimulator::new(cash, 0.0, 0.0, filters);
    let state = state("BTCUSDT", None, Some(100.0), None);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 0.0126), &state)
        .unwrap();
    assert_eq!(fills[0].quantity, 0.012);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 0.002), &state)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.rejection_count(RejectReason::QuantityFiltered), 1);
}

#[test]
fn test_min_notional_reject_leaves_balances_untouched() {
    let mut filters = ExchangeFilters::empty();
    filters.insert(
        "BTCUSDT",
        SymbolFilters {
            min_notional: Some(d("1.0")),
            ..SymbolFilters::default()
        },
    );
    let cash = HashMap::from([("BTCUSDT".to_string(), 1_000.0)]);
    let mut sim = ExecutionSimulator::new(cash, 0.001, 0.0, filters);
    let state = state("BTCUSDT", None, Some(10.0), None);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 0.001), &state)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.rejection_count(RejectReason::BelowMinNotional), 1);
    assert_eq!(sim.cash("BTCUSDT"), 1_000.0);
    assert_eq!(sim.position("BTCUSDT"), 0.0);
}

#[test]
fn test_balance_conservation_through_round_trip() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(100.0), Some(100.0), None);

    sim.submit_order(SimOrder::market("BTCUSDT", Side::Buy, 2.0), &state)
        .unwrap();
    // 1000 - 200 - 0.2 fee
    assert!((sim.cash("BTCUSDT") - 799.8).abs() < 1e-9);
    assert_eq!(sim.position("BTCUSDT"), 2.0);

    sim.submit_order(SimOrder::market("BTCUSDT", Side::Sell, 2.0), &state)
        .unwrap();
    // 799.8 + 200 - 0.2 fee
    assert!((sim.cash("BTCUSDT") - 999.6).abs() < 1e-9);
    assert_eq!(sim.position("BTCUSDT"), 0.0);
}

#[test]
fn test_insufficient_cash_rejects() {
    let mut sim = sim(50.0);
    let state = state("BTCUSDT", None, Some(100.0), None);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &state)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.rejection_count(RejectReason::InsufficientCash), 1);
    assert_eq!(sim.cash("BTCUSDT"), 50.0);
}

#[test]
fn test_insufficient_position_rejects() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(100.0), None, None);

    let fills = sim
        .submit_order(SimOrder::market("BTCUSDT", Side::Sell, 1.0), &state)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.rejection_count(RejectReason::InsufficientPosition), 1);
}

#[test]
fn test_limit_without_price_is_an_error() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(99.0), Some(100.0), None);
    let mut order = SimOrder::market("BTCUSDT", Side::Buy, 1.0);
    order.order_type = crate::sim::simulator::OrderType::Limit;

    assert!(sim.submit_order(order, &state).is_err());
}

#[test]
fn test_crossing_limit_buy_fills_immediately() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(99.0), Some(100.0), None);

    let fills = sim
        .submit_order(SimOrder::limit("BTCUSDT", Side::Buy, 1.0, 101.0), &state)
        .unwrap();
    assert_eq!(fills.len(), 1);
    // Marketable limit executes at the ask, not the limit.
    assert_eq!(fills[0].price, 100.0);
    assert!(sim.open_orders().is_empty());
}

#[test]
fn test_resting_limit_fills_when_market_moves() {
    let mut sim = sim(1_000.0);
    let away = state("BTCUSDT", Some(99.0), Some(100.0), None);

    let fills = sim
        .submit_order(SimOrder::limit("BTCUSDT", Side::Buy, 1.0, 98.0), &away)
        .unwrap();
    assert!(fills.is_empty());
    assert_eq!(sim.open_orders().len(), 1);

    let crossed = state("BTCUSDT", Some(97.0), Some(97.5), None);
    let fills = sim.on_event(&crossed);
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, 97.5);
    assert!(sim.open_orders().is_empty());
}

#[test]
fn test_cancel_removes_open_order() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(99.0), Some(100.0), None);

    let order = SimOrder::limit("BTCUSDT", Side::Buy, 1.0, 90.0);
    let order_id = order.order_id.clone();
    sim.submit_order(order, &state).unwrap();
    assert_eq!(sim.open_orders().len(), 1);

    sim.submit_order(SimOrder::cancel("BTCUSDT", order_id), &state)
        .unwrap();
    assert!(sim.open_orders().is_empty());
}

#[test]
fn test_cancel_unknown_order_is_noop() {
    let mut sim = sim(1_000.0);
    let state = state("BTCUSDT", Some(99.0), Some(100.0), None);
    let fills = sim
        .submit_order(SimOrder::cancel("BTCUSDT", "missing"), &state)
        .unwrap();
    assert!(fills.is_empty());
}

#[test]
fn test_liquidate_flattens_positions() {
    let mut sim = sim(1_000.0);
    let quote = state("BTCUSDT", Some(100.0), Some(100.0), None);
    sim.submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &quote)
        .unwrap();
    assert_eq!(sim.position("BTCUSDT"), 1.0);

    let states = HashMap::from([("BTCUSDT".to_string(), quote)]);
    sim.liquidate(&states);
    assert_eq!(sim.position("BTCUSDT"), 0.0);

    sim.record_equity(1, &states);
    let report = sim.build_report();
    let last = report.equity_curve.last().unwrap();
    assert!((last.equity - sim.cash("BTCUSDT")).abs() < 1e-9);
}

#[test]
fn test_equity_marks_positions_at_mid() {
    let mut sim = sim(1_000.0);
    let quote = state("BTCUSDT", Some(99.0), Some(101.0), None);
    sim.submit_order(SimOrder::market("BTCUSDT", Side::Buy, 1.0), &quote)
        .unwrap();

    let states = HashMap::from([("BTCUSDT".to_string(), quote)]);
    sim.record_equity(42, &states);
    let report = sim.build_report();
    let point = report.equity_curve.last().unwrap();
    assert_eq!(point.timestamp_us, 42);
    // cash after buy at ask 101 + fee, plus 1.0 marked at mid 100.
    let expected = (1_000.0 - 101.0 - 0.101) + 100.0;
    assert!((point.equity - expected).abs() < 1e-9);
}
