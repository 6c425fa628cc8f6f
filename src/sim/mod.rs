pub mod filters;
pub mod simulator;
pub mod strategy;

pub use filters::{ExchangeFilters, SymbolFilters};
pub use simulator::{
    EquityPoint, ExecutionReport, ExecutionSimulator, OrderType, RejectReason, RunStats, Side,
    SimFill, SimOrder,
};
pub use strategy::{MomentumReplayStrategy, Strategy};

#[cfg(test)]
mod simulator_tests;
