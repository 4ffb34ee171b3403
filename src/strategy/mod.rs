//! Strategy implementations

pub mod arbitrage;
pub mod evaluate;

pub use arbitrage::ArbitrageEngine;
pub use evaluate::{ArbDirection, Opportunity, PROFIT_EPSILON};
