//! Performance metrics — pure functions that turn a trade ledger and an
//! equity curve into the statistics a playbook author judges a backtest by.
//!
//! Every metric is a pure function: equity curve and/or trade list in,
//! scalar out, mirroring the teacher's `trendlab-runner/src/metrics.rs`.
//! The metric set itself is grounded on
//! `original_source/agent/backtest/metrics.py`'s `compute_metrics`, which
//! covers considerably more ground than the teacher's runner metrics
//! (ulcer index, skew/kurtosis, monthly returns, per-direction win rates),
//! so this module is the teacher's shape carrying the original's content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestTrade, TradeOutcome};

/// Aggregate performance statistics for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percentage of trades won, in `[0, 100]` (not a `0..1` fraction).
    pub win_rate: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub profit_factor: f64,
    pub recovery_factor: f64,
    pub avg_rr: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub consecutive_wins: usize,
    pub consecutive_losses: usize,
    pub avg_duration_bars: f64,
    pub cagr: f64,
    pub calmar_ratio: f64,
    pub ulcer_index: f64,
    pub expectancy: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub best_trade_streak_pnl: f64,
    pub worst_trade_streak_pnl: f64,
    /// `"YYYY-MM" -> % return of the starting balance earned that month`.
    /// A `BTreeMap` keeps iteration (and JSON key) order chronological.
    pub monthly_returns: BTreeMap<String, f64>,
    pub win_rate_long: f64,
    pub win_rate_short: f64,
    pub avg_bars_winners: f64,
    pub avg_bars_losers: f64,
}

/// Computes every metric from a finished run's trades and equity curve. An
/// empty trade list still returns a complete, all-zero `PerformanceMetrics`
/// rather than an error — a backtest that opens nothing is a valid outcome.
pub fn compute_metrics(trades: &[BacktestTrade], equity_curve: &[f64], starting_balance: f64) -> PerformanceMetrics {
    let drawdown_curve = compute_drawdown_curve(equity_curve);
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();

    let total_trades = trades.len();
    let wins = trades.iter().filter(|t| t.outcome == TradeOutcome::Win).count();
    let losses = trades.iter().filter(|t| t.outcome == TradeOutcome::Loss).count();
    let win_rate = if total_trades > 0 {
        wins as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };
    let total_pnl: f64 = pnls.iter().sum();

    // Negative (or zero) percent drawdown; `.abs()` it at every use site, and
    // before storing it on the struct, since the spec keeps drawdown % in
    // [0, 100].
    let max_drawdown_pct = drawdown_curve.iter().cloned().fold(0.0_f64, f64::min);
    let max_drawdown = if equity_curve.is_empty() {
        0.0
    } else {
        max_drawdown_pct.abs() / 100.0 * peak_equity(equity_curve)
    };

    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    let profit_factor = if gross_loss < 1e-10 {
        if gross_profit > 0.0 {
            999.0
        } else {
            0.0
        }
    } else {
        gross_profit / gross_loss
    };

    let avg_win = if wins > 0 { gross_profit / wins as f64 } else { 0.0 };
    let avg_loss = if losses > 0 { gross_loss / losses as f64 } else { 0.0 };
    let largest_win = pnls.iter().cloned().fold(0.0_f64, f64::max);
    let largest_loss = pnls.iter().cloned().fold(0.0_f64, f64::min);

    let consecutive_wins = max_consecutive(trades, TradeOutcome::Win);
    let consecutive_losses = max_consecutive(trades, TradeOutcome::Loss);

    let avg_duration_bars = if total_trades > 0 {
        trades
            .iter()
            .map(|t| (t.close_idx.saturating_sub(t.open_idx)) as f64)
            .sum::<f64>()
            / total_trades as f64
    } else {
        0.0
    };

    let rr_values: Vec<f64> = trades.iter().filter_map(|t| t.rr_achieved).collect();
    let avg_rr = mean_f64(&rr_values);

    let cagr = compute_cagr(trades, equity_curve, starting_balance);
    let calmar_ratio = if max_drawdown_pct.abs() > 1e-9 {
        (cagr.abs() * 100.0) / max_drawdown_pct.abs()
    } else {
        0.0
    };
    let recovery_factor = if max_drawdown > 1e-9 { total_pnl / max_drawdown } else { 0.0 };

    let expectancy = if total_trades > 0 { total_pnl / total_trades as f64 } else { 0.0 };

    let (best_streak, worst_streak) = compute_streak_pnl(trades);

    let long_trades: Vec<&BacktestTrade> = trades
        .iter()
        .filter(|t| t.direction == crate::playbook::Direction::Buy)
        .collect();
    let short_trades: Vec<&BacktestTrade> = trades
        .iter()
        .filter(|t| t.direction == crate::playbook::Direction::Sell)
        .collect();
    let win_rate_long = win_rate_of(&long_trades);
    let win_rate_short = win_rate_of(&short_trades);

    let winner_bars: Vec<f64> = trades
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Win)
        .map(|t| (t.close_idx.saturating_sub(t.open_idx)) as f64)
        .collect();
    let loser_bars: Vec<f64> = trades
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Loss)
        .map(|t| (t.close_idx.saturating_sub(t.open_idx)) as f64)
        .collect();

    PerformanceMetrics {
        total_trades,
        wins,
        losses,
        win_rate: round2(win_rate),
        total_pnl: round2(total_pnl),
        max_drawdown: round2(max_drawdown),
        max_drawdown_pct: round2(max_drawdown_pct.abs()),
        sharpe_ratio: round2(sharpe_ratio(&pnls)),
        sortino_ratio: round2(compute_sortino(&pnls)),
        profit_factor: round2(profit_factor),
        recovery_factor: round2(recovery_factor),
        avg_rr: round2(avg_rr),
        avg_win: round2(avg_win),
        avg_loss: round2(avg_loss),
        largest_win: round2(largest_win),
        largest_loss: round2(largest_loss),
        consecutive_wins,
        consecutive_losses,
        avg_duration_bars: round2(avg_duration_bars),
        cagr: round2(cagr),
        calmar_ratio: round2(calmar_ratio),
        ulcer_index: round2(compute_ulcer_index(&drawdown_curve)),
        expectancy: round2(expectancy),
        skewness: round2(compute_skewness(&pnls)),
        kurtosis: round2(compute_kurtosis(&pnls)),
        best_trade_streak_pnl: round2(best_streak),
        worst_trade_streak_pnl: round2(worst_streak),
        monthly_returns: compute_monthly_returns(trades, starting_balance),
        win_rate_long: round2(win_rate_long),
        win_rate_short: round2(win_rate_short),
        avg_bars_winners: round2(mean_f64(&winner_bars)),
        avg_bars_losers: round2(mean_f64(&loser_bars)),
    }
}

/// Percentage drawdown from the running peak at every point on the equity
/// curve — zero wherever the curve is at or above its prior high.
pub fn compute_drawdown_curve(equity_curve: &[f64]) -> Vec<f64> {
    let mut peak = equity_curve.first().copied().unwrap_or(0.0);
    let mut curve = Vec::with_capacity(equity_curve.len());
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        let dd_pct = if peak > 0.0 { (eq - peak) / peak * 100.0 } else { 0.0 };
        curve.push(dd_pct);
    }
    curve
}

fn peak_equity(equity_curve: &[f64]) -> f64 {
    equity_curve.iter().cloned().fold(f64::MIN, f64::max).max(0.0)
}

/// Annualized Sharpe ratio of per-trade P&L (not per-bar equity returns —
/// the spec and the original `compute_metrics` both sample `[t.pnl for t in
/// trades]`, scaled by the same √252 factor regardless of trade cadence).
fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(returns);
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * (252.0_f64).sqrt()
}

/// Downside-deviation Sortino ratio over per-trade P&L, annualized over the
/// full trade count rather than just the losing trades. Returns a 999
/// sentinel (rather than an unbounded value) when there is no downside at
/// all but the mean return is positive — an undefined ratio that should
/// read as "excellent", not zero.
fn compute_sortino(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean_ret = mean_f64(returns);
    let downside_sq: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).collect();
    if downside_sq.is_empty() {
        return if mean_ret > 0.0 { 999.0 } else { 0.0 };
    }
    let downside_var = downside_sq.iter().sum::<f64>() / returns.len() as f64;
    let downside_std = downside_var.sqrt();
    if downside_std <= 1e-15 {
        return if mean_ret > 0.0 { 999.0 } else { 0.0 };
    }
    (mean_ret / downside_std) * (252.0_f64).sqrt()
}

/// Root-mean-square of the percentage drawdown curve — penalizes time spent
/// underwater, not just the single deepest dip.
fn compute_ulcer_index(drawdown_curve: &[f64]) -> f64 {
    if drawdown_curve.is_empty() {
        return 0.0;
    }
    let sq_sum: f64 = drawdown_curve.iter().map(|d| d * d).sum();
    (sq_sum / drawdown_curve.len() as f64).sqrt()
}

/// Fisher sample skewness of the trade P&L distribution.
fn compute_skewness(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let std = std_dev(values);
    if std <= 1e-15 {
        return 0.0;
    }
    let n_f = n as f64;
    let sum_cubed: f64 = values.iter().map(|v| ((v - mean) / std).powi(3)).sum();
    (n_f / ((n_f - 1.0) * (n_f - 2.0))) * sum_cubed
}

/// Fisher sample excess kurtosis of the trade P&L distribution.
fn compute_kurtosis(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let std = std_dev(values);
    if std <= 1e-15 {
        return 0.0;
    }
    let n_f = n as f64;
    let sum_fourth: f64 = values.iter().map(|v| ((v - mean) / std).powi(4)).sum();
    let term1 = (n_f * (n_f + 1.0)) / ((n_f - 1.0) * (n_f - 2.0) * (n_f - 3.0));
    let term2 = 3.0 * (n_f - 1.0).powi(2) / ((n_f - 2.0) * (n_f - 3.0));
    term1 * sum_fourth - term2
}

/// The best and worst running total of a streak of same-signed trade P&Ls —
/// e.g. three wins in a row summed is one streak's contribution.
fn compute_streak_pnl(trades: &[BacktestTrade]) -> (f64, f64) {
    if trades.is_empty() {
        return (0.0, 0.0);
    }
    let mut best = f64::MIN;
    let mut worst = f64::MAX;
    let mut running = 0.0;
    let mut running_positive: Option<bool> = None;

    for trade in trades {
        let positive = trade.pnl >= 0.0;
        match running_positive {
            Some(p) if p == positive => running += trade.pnl,
            _ => {
                running = trade.pnl;
                running_positive = Some(positive);
            }
        }
        best = best.max(running);
        worst = worst.min(running);
    }
    (best, worst)
}

/// Total P&L earned in each calendar month a trade closed in, expressed as a
/// percentage of the starting balance.
fn compute_monthly_returns(trades: &[BacktestTrade], starting_balance: f64) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for trade in trades {
        let key = trade.close_time.format("%Y-%m").to_string();
        *sums.entry(key).or_insert(0.0) += trade.pnl;
    }
    if starting_balance > 0.0 {
        for value in sums.values_mut() {
            *value = round2(*value / starting_balance * 100.0);
        }
    }
    sums
}

/// Compound annual growth rate from the first trade's open to the last
/// trade's close, applied to the starting-to-final equity ratio.
fn compute_cagr(trades: &[BacktestTrade], equity_curve: &[f64], starting_balance: f64) -> f64 {
    if trades.is_empty() || equity_curve.is_empty() || starting_balance <= 0.0 {
        return 0.0;
    }
    let final_equity = *equity_curve.last().expect("checked non-empty above");
    if final_equity <= 0.0 {
        return 0.0;
    }
    let first_open = trades.first().expect("checked non-empty above").open_time;
    let last_close = trades.last().expect("checked non-empty above").close_time;
    let days = (last_close - first_open).num_days().max(1) as f64;
    let years = days / 365.25;
    if years <= 0.0 {
        return 0.0;
    }
    (final_equity / starting_balance).powf(1.0 / years) - 1.0
}

fn max_consecutive(trades: &[BacktestTrade], outcome: TradeOutcome) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.outcome == outcome {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

fn win_rate_of(trades: &[&BacktestTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.outcome == TradeOutcome::Win).count();
    wins as f64 / trades.len() as f64 * 100.0
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn round2(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{ExitReason, PartialClose};
    use crate::playbook::Direction;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn trade(pnl: f64, outcome: TradeOutcome, open_day: u32, close_day: u32) -> BacktestTrade {
        BacktestTrade {
            direction: Direction::Buy,
            open_idx: 0,
            close_idx: 5,
            requested_price: 1.1,
            fill_price: 1.1,
            open_price: 1.1,
            close_price: 1.1 + pnl / 100_000.0,
            open_time: Utc.with_ymd_and_hms(2024, 1, open_day, 0, 0, 0).unwrap(),
            close_time: Utc.with_ymd_and_hms(2024, 1, close_day, 0, 0, 0).unwrap(),
            sl: Some(1.09),
            tp: Some(1.12),
            lot: 1.0,
            pnl,
            pnl_pips: pnl / 10.0,
            commission: 0.0,
            rr_achieved: Some(1.5),
            outcome,
            exit_reason: if pnl >= 0.0 { ExitReason::Tp } else { ExitReason::Sl },
            phase_at_entry: "idle".into(),
            variables_at_entry: HashMap::new(),
            indicators_at_entry: HashMap::new(),
            partial_closes: Vec::<PartialClose>::new(),
        }
    }

    #[test]
    fn no_trades_gives_an_all_zero_but_valid_result() {
        let metrics = compute_metrics(&[], &[10_000.0; 5], 10_000.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.sharpe_ratio.is_finite());
    }

    #[test]
    fn win_rate_and_pnl_aggregate_correctly() {
        let trades = vec![
            trade(500.0, TradeOutcome::Win, 1, 2),
            trade(-200.0, TradeOutcome::Loss, 2, 3),
            trade(300.0, TradeOutcome::Win, 3, 4),
        ];
        let equity = vec![10_000.0, 10_500.0, 10_300.0, 10_600.0];
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.wins, 2);
        assert_eq!(metrics.losses, 1);
        assert!((metrics.win_rate - 200.0 / 3.0).abs() < 1e-2);
        assert!((metrics.total_pnl - 600.0).abs() < 1e-9);
        assert!((metrics.expectancy - 200.0).abs() < 1e-9);
    }

    #[test]
    fn expectancy_is_total_pnl_over_trade_count_even_with_breakevens() {
        // A breakeven trade (pnl == 0) counts toward total_trades but is
        // neither a win nor a loss; expectancy must still equal
        // total_pnl / total_trades, not a win_rate-weighted formula that
        // would silently fold it into the loss term.
        let trades = vec![
            trade(300.0, TradeOutcome::Win, 1, 2),
            trade(0.0, TradeOutcome::Breakeven, 2, 3),
            trade(-100.0, TradeOutcome::Loss, 3, 4),
        ];
        let equity = vec![10_000.0, 10_300.0, 10_300.0, 10_200.0];
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert!((metrics.expectancy - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn max_drawdown_pct_is_reported_as_a_positive_percentage() {
        let trades = vec![
            trade(500.0, TradeOutcome::Win, 1, 2),
            trade(-800.0, TradeOutcome::Loss, 2, 3),
        ];
        let equity = vec![10_000.0, 10_500.0, 9_700.0];
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert!(metrics.max_drawdown_pct >= 0.0);
        assert!(metrics.max_drawdown_pct <= 100.0);
        assert!(metrics.max_drawdown_pct > 0.0);
    }

    #[test]
    fn sharpe_and_sortino_use_per_trade_pnl_not_bar_returns() {
        // Many bars elapse between trades (the equity curve barely moves
        // most of the time), but only three trades actually close. If
        // Sharpe/Sortino were computed over bar-to-bar equity deltas the
        // long flat stretches would crush the ratio toward zero; computed
        // over per-trade P&L it should reflect the trades' actual
        // consistency instead.
        let trades = vec![
            trade(100.0, TradeOutcome::Win, 1, 2),
            trade(150.0, TradeOutcome::Win, 2, 3),
            trade(80.0, TradeOutcome::Win, 3, 4),
        ];
        let mut equity = vec![10_000.0; 500];
        equity.extend(vec![10_100.0; 200]);
        equity.extend(vec![10_200.0; 200]);
        equity.extend(vec![10_300.0; 100]);
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert!(metrics.sharpe_ratio > 0.0);
    }

    #[test]
    fn profit_factor_sentinel_when_no_losses() {
        let trades = vec![trade(500.0, TradeOutcome::Win, 1, 2), trade(300.0, TradeOutcome::Win, 2, 3)];
        let equity = vec![10_000.0, 10_500.0, 10_800.0];
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert_eq!(metrics.profit_factor, 999.0);
    }

    #[test]
    fn drawdown_curve_is_zero_on_a_monotonic_rise() {
        let curve = compute_drawdown_curve(&[100.0, 110.0, 120.0]);
        assert!(curve.iter().all(|d| *d == 0.0));
    }

    #[test]
    fn drawdown_curve_reflects_a_dip_below_peak() {
        let curve = compute_drawdown_curve(&[100.0, 110.0, 99.0]);
        assert!(curve[2] < 0.0);
    }

    #[test]
    fn monthly_returns_key_by_calendar_month() {
        let trades = vec![
            trade(500.0, TradeOutcome::Win, 5, 10),
            trade(-100.0, TradeOutcome::Loss, 20, 25),
        ];
        let returns = compute_monthly_returns(&trades, 10_000.0);
        assert_eq!(returns.len(), 1);
        assert!((returns["2024-01"] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn consecutive_streaks_count_correctly() {
        let trades = vec![
            trade(100.0, TradeOutcome::Win, 1, 2),
            trade(100.0, TradeOutcome::Win, 2, 3),
            trade(-50.0, TradeOutcome::Loss, 3, 4),
            trade(100.0, TradeOutcome::Win, 4, 5),
        ];
        let equity = vec![10_000.0, 10_100.0, 10_200.0, 10_150.0, 10_250.0];
        let metrics = compute_metrics(&trades, &equity, 10_000.0);
        assert_eq!(metrics.consecutive_wins, 2);
        assert_eq!(metrics.consecutive_losses, 1);
    }
}
