//! The backtest engine: a deterministic, synchronous replay of a playbook
//! over historical bars with spread, slippage, and commission modeling.
//!
//! Grounded on `examples/trustdan-trendlab-tui.1/trendlab-core/src/engine/loop_runner.rs`
//! for the phased bar-loop structure, and on
//! `original_source/agent/backtest/engine.py` for the playbook-specific
//! ordering (SL/TP check before transitions, spread/slippage application,
//! ratcheted trailing stops) and the pip-value table.

mod error;
mod replay;

pub use error::{BacktestError, Result};
pub use replay::run_backtest;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Timeframe;
use crate::playbook::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub spread_pips: f64,
    pub slippage_pips: f64,
    pub commission_per_lot: f64,
    pub starting_balance: f64,
    /// Overrides the computed warmup window when set; mostly useful for
    /// tests that want deterministic, short bar sequences.
    #[serde(default)]
    pub warmup_override: Option<usize>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            spread_pips: 1.0,
            slippage_pips: 0.5,
            commission_per_lot: 7.0,
            starting_balance: 10_000.0,
            warmup_override: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Sl,
    Tp,
    Transition,
    Timeout,
    EndOfData,
}

/// A single realized fraction of a position closed early by a `partial_close`
/// position-management rule. The Python original parses this rule but never
/// implements the size reduction; this specification requires it to work
/// (see SPEC_FULL §4.5), so each partial close is tracked here and its P&L
/// folded into the owning trade's total realized P&L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialClose {
    pub bar_idx: usize,
    pub percent: f64,
    pub price: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub direction: Direction,
    pub open_idx: usize,
    pub close_idx: usize,
    /// The price before spread/slippage was applied.
    pub requested_price: f64,
    /// The price after spread/slippage — what P&L is actually computed from.
    pub fill_price: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub lot: f64,
    pub pnl: f64,
    pub pnl_pips: f64,
    pub commission: f64,
    pub rr_achieved: Option<f64>,
    pub outcome: TradeOutcome,
    pub exit_reason: ExitReason,
    pub phase_at_entry: String,
    pub variables_at_entry: HashMap<String, f64>,
    pub indicators_at_entry: HashMap<String, HashMap<String, f64>>,
    pub partial_closes: Vec<PartialClose>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub config: BacktestConfig,
    pub metrics: crate::metrics::PerformanceMetrics,
    pub equity_curve: Vec<f64>,
    pub drawdown_curve: Vec<f64>,
    pub trades: Vec<BacktestTrade>,
    /// Structured diagnostics the caller may inspect — the crate has no
    /// logging framework, so anything the Python original would have logged
    /// ends up here instead (§7).
    pub data_quality_warnings: Vec<String>,
}

/// Pip size for a symbol: the smallest meaningful price increment, used to
/// convert a price distance into pips. Tabulated exactly rather than derived
/// (SPEC_FULL §9's resolved open question), grounded on
/// `original_source/agent/backtest/engine.py`'s `_pip_value`.
pub fn pip_value(symbol: &str) -> f64 {
    let symbol = symbol.to_ascii_uppercase();
    if symbol.contains("JPY") {
        0.01
    } else if symbol.contains("XAU") {
        0.1
    } else if symbol.contains("XAG") {
        0.01
    } else if symbol.contains("BTC") || symbol.contains("ETH") {
        1.0
    } else {
        0.0001
    }
}

/// Dollar value of one pip for one lot of `symbol`, grounded on
/// `original_source/agent/backtest/engine.py`'s `_pip_dollar_value`.
pub fn pip_dollar_value(symbol: &str, lot: f64) -> f64 {
    let upper = symbol.to_ascii_uppercase();
    if upper.contains("XAU") {
        lot * 100.0 * 0.1
    } else if upper.contains("XAG") {
        lot * 5000.0 * 0.01
    } else if upper.contains("JPY") {
        lot * 100_000.0 * 0.01 / 100.0
    } else if upper.contains("BTC") || upper.contains("ETH") {
        lot * 1.0
    } else {
        lot * 100_000.0 * 0.0001
    }
}

/// P&L in account currency for moving from `open_price` to `close_price` in
/// `direction`, at `lot` size.
pub fn calc_pnl(symbol: &str, direction: Direction, open_price: f64, close_price: f64, lot: f64) -> f64 {
    let pip = pip_value(symbol);
    let pips = match direction {
        Direction::Buy => (close_price - open_price) / pip,
        Direction::Sell => (open_price - close_price) / pip,
    };
    pips * pip_dollar_value(symbol, lot)
}

pub fn calc_pips(symbol: &str, direction: Direction, open_price: f64, close_price: f64) -> f64 {
    let pip = pip_value(symbol);
    match direction {
        Direction::Buy => (close_price - open_price) / pip,
        Direction::Sell => (open_price - close_price) / pip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_forex_pip_is_one_tenth_of_a_cent() {
        assert!((pip_value("EURUSD") - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn jpy_pairs_use_larger_pip() {
        assert!((pip_value("USDJPY") - 0.01).abs() < 1e-12);
    }

    #[test]
    fn gold_pip_dollar_value_is_ten_per_lot() {
        assert!((pip_dollar_value("XAUUSD", 1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn buy_profits_from_rising_price() {
        let pnl = calc_pnl("EURUSD", Direction::Buy, 1.1000, 1.1050, 1.0);
        assert!(pnl > 0.0);
    }

    #[test]
    fn sell_profits_from_falling_price() {
        let pnl = calc_pnl("EURUSD", Direction::Sell, 1.1000, 1.0950, 1.0);
        assert!(pnl > 0.0);
    }
}
