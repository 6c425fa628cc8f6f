pub mod book;
pub mod engine;
pub mod merge;

pub use book::OrderBook;
pub use engine::{MarketState, ReplayEngine};
pub use merge::OrderedMerge;

#[cfg(test)]
mod merge_tests;
