//! The bar-by-bar replay loop.
//!
//! Grounded on `original_source/agent/backtest/engine.py`'s `BacktestEngine.run`
//! for ordering (SL/TP first, then timeout, then transitions, then position
//! management, then mark-to-market) and on the teacher's
//! `trendlab-core/src/engine/loop_runner.rs` for the phased-loop shape: a
//! warmup-skipping `for` loop over bar indices rather than a callback-driven
//! event stream, since a backtest replay is fully synchronous and
//! deterministic.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::align::MultiTfEngine;
use crate::domain::Bar;
use crate::expr::{evaluate, evaluate_condition, AstCache, EvalContext};
use crate::indicators::{IndicatorOutput, IndicatorRegistry};
use crate::playbook::{Direction, IndicatorConfig, Phase, PmAction, Playbook, RiskConfig, Transition};

use super::{
    calc_pips, calc_pnl, pip_value, BacktestConfig, BacktestError, BacktestTrade, ExitReason,
    PartialClose, Result, RunResult, TradeOutcome,
};

/// One indicator's full precomputed series plus the timeframe it was run on,
/// so later lookups know whether to index it directly by bar index (primary
/// timeframe) or through [`MultiTfEngine::aligned_index`] (secondary).
struct PrecomputedIndicator {
    timeframe: crate::domain::Timeframe,
    series: Vec<Option<IndicatorOutput>>,
}

/// A currently open position, tracked independently of [`BacktestTrade`]
/// until it closes — a position can accumulate partial closes and SL/TP
/// ratchets across many bars before it becomes a single finished trade.
struct OpenPosition {
    direction: Direction,
    open_idx: usize,
    open_time: DateTime<Utc>,
    requested_price: f64,
    fill_price: f64,
    sl: Option<f64>,
    tp: Option<f64>,
    lot: f64,
    phase_at_entry: String,
    variables_at_entry: HashMap<String, f64>,
    indicators_at_entry: HashMap<String, HashMap<String, f64>>,
    partial_closes: Vec<PartialClose>,
    realized_partial_pnl: f64,
}

/// Runs a playbook over historical bars and returns the full trade ledger,
/// equity curve, and performance metrics. `multi_tf` must already have every
/// timeframe the playbook's indicators reference registered via
/// [`MultiTfEngine::add_timeframe`]; its primary timeframe must match
/// `config.timeframe`.
pub fn run_backtest(
    playbook: &Playbook,
    registry: &IndicatorRegistry,
    multi_tf: &MultiTfEngine,
    config: &BacktestConfig,
) -> Result<RunResult> {
    let primary = multi_tf.primary_bars();
    if primary.is_empty() {
        return Err(BacktestError::EmptyBars);
    }

    let precomputed = precompute_indicators(playbook, registry, multi_tf, config)?;

    let warmup = match config.warmup_override {
        Some(w) => w,
        None => compute_warmup(playbook, registry, multi_tf, config)?,
    };
    if warmup >= primary.len() {
        return Err(BacktestError::NotEnoughBars {
            available: primary.len(),
            required: warmup + 1,
        });
    }

    let ast_cache = AstCache::new();
    let mut current_phase = playbook.initial_phase.clone();
    let mut variables: HashMap<String, f64> = playbook
        .variables
        .iter()
        .filter_map(|(k, v)| v.default.as_f64().map(|f| (k.clone(), f)))
        .collect();
    let mut timeframe_counters: HashMap<crate::domain::Timeframe, u64> = HashMap::new();
    let mut fired_once: HashSet<String> = HashSet::new();

    let mut position: Option<OpenPosition> = None;
    let mut trades: Vec<BacktestTrade> = Vec::new();
    let mut equity = config.starting_balance;
    let mut equity_curve = vec![equity];
    let mut prev_indicators: HashMap<String, HashMap<String, f64>> = HashMap::new();
    let mut warnings: Vec<String> = Vec::new();

    for bar_idx in warmup..primary.len() {
        let bar = &primary[bar_idx];
        let indicators = indicators_at(&precomputed, multi_tf, config, bar_idx);

        *timeframe_counters.entry(config.timeframe).or_insert(0) += 1;

        // Step 1: SL/TP, checked strictly before any transition can fire.
        if let Some(pos) = &position {
            if let Some((exit_reason, level)) = check_sl_tp(bar, pos) {
                let pos = position.take().expect("checked Some above");
                let trade = finish_trade(config, &pos, bar_idx, level, bar.time, exit_reason);
                equity += trade.pnl;
                trades.push(trade);

                if let Some(target) = playbook
                    .phases
                    .get(&current_phase)
                    .and_then(|p| p.on_trade_closed.clone())
                {
                    current_phase = target;
                    timeframe_counters.clear();
                    fired_once.clear();
                }
            }
        }

        // Step 2: phase timeout.
        if let Some(phase) = playbook.phases.get(&current_phase) {
            if let Some(timeout) = &phase.timeout {
                let count = timeframe_counters.get(&timeout.timeframe).copied().unwrap_or(0);
                if timeout.timeframe == config.timeframe && count >= timeout.bars {
                    current_phase = timeout.to.clone();
                    timeframe_counters.clear();
                    fired_once.clear();
                }
            }
        }

        let ctx = build_context(
            bar.close,
            &variables,
            &indicators,
            &prev_indicators,
            position.as_ref(),
            &playbook.risk,
        );

        // Step 3: priority-sorted transitions.
        let mut transitioned = false;
        if let Some(phase) = playbook.phases.get(&current_phase) {
            let mut sorted: Vec<&Transition> = phase.transitions.iter().collect();
            sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

            'transitions: for transition in sorted {
                if !evaluate_condition(&ast_cache, &transition.conditions, &ctx) {
                    continue;
                }

                for action in &transition.actions {
                    if let (Some(name), Some(expr)) = (&action.set_var, &action.expr) {
                        if let Ok(value) = evaluate(&ast_cache, expr, &ctx) {
                            variables.insert(name.clone(), value);
                        }
                    }

                    if let Some(trade_action) = &action.open_trade {
                        if position.is_none() {
                            let lot = trade_action
                                .lot
                                .as_ref()
                                .and_then(|e| evaluate(&ast_cache, &e.expr, &ctx).ok())
                                .unwrap_or(playbook.risk.max_lot);
                            let sl = trade_action
                                .sl
                                .as_ref()
                                .and_then(|e| evaluate(&ast_cache, &e.expr, &ctx).ok());
                            let tp = trade_action
                                .tp
                                .as_ref()
                                .and_then(|e| evaluate(&ast_cache, &e.expr, &ctx).ok());
                            let (requested_price, fill_price) =
                                entry_friction(config, trade_action.direction, bar.close);

                            position = Some(OpenPosition {
                                direction: trade_action.direction,
                                open_idx: bar_idx,
                                open_time: bar.time,
                                requested_price,
                                fill_price,
                                sl,
                                tp,
                                lot,
                                phase_at_entry: current_phase.clone(),
                                variables_at_entry: variables.clone(),
                                indicators_at_entry: indicators.clone(),
                                partial_closes: Vec::new(),
                                realized_partial_pnl: 0.0,
                            });
                        }
                    }

                    if action.close_trade {
                        if let Some(pos) = position.take() {
                            let exit_price = exit_friction(config, pos.direction, bar.close);
                            let trade =
                                finish_trade(config, &pos, bar_idx, exit_price, bar.time, ExitReason::Transition);
                            equity += trade.pnl;
                            trades.push(trade);
                        }
                    }

                    if let Some(msg) = &action.log {
                        warnings.push(format!("[{current_phase}] {msg}"));
                    }
                }

                current_phase = transition.to.clone();
                timeframe_counters.clear();
                fired_once.clear();
                transitioned = true;
                break 'transitions;
            }
        }

        // Step 4: position management, only when the phase didn't just change.
        if !transitioned {
            if let Some(phase) = playbook.phases.get(&current_phase) {
                apply_position_management(
                    &ast_cache,
                    phase,
                    &ctx,
                    bar,
                    bar_idx,
                    config,
                    &mut position,
                    &mut fired_once,
                    &mut equity,
                );
            }
        }

        // Step 5: mark to market.
        let unrealized = position
            .as_ref()
            .map(|p| calc_pnl(&config.symbol, p.direction, p.fill_price, bar.close, p.lot))
            .unwrap_or(0.0);
        equity_curve.push(equity + unrealized);

        prev_indicators = indicators;
    }

    // Force-close anything still open at the end of the data.
    if let Some(pos) = position.take() {
        let last = primary.last().expect("primary is non-empty");
        let exit_price = exit_friction(config, pos.direction, last.close);
        let trade = finish_trade(
            config,
            &pos,
            primary.len() - 1,
            exit_price,
            last.time,
            ExitReason::EndOfData,
        );
        equity += trade.pnl;
        trades.push(trade);
        if let Some(last_point) = equity_curve.last_mut() {
            *last_point = equity;
        }
    }

    let metrics = crate::metrics::compute_metrics(&trades, &equity_curve, config.starting_balance);
    let drawdown_curve = crate::metrics::compute_drawdown_curve(&equity_curve);

    Ok(RunResult {
        config: config.clone(),
        metrics,
        equity_curve,
        drawdown_curve,
        trades,
        data_quality_warnings: warnings,
    })
}

fn precompute_indicators(
    playbook: &Playbook,
    registry: &IndicatorRegistry,
    multi_tf: &MultiTfEngine,
    config: &BacktestConfig,
) -> Result<HashMap<String, PrecomputedIndicator>> {
    let precompute_one = |ind_cfg: &IndicatorConfig| -> Result<(String, PrecomputedIndicator)> {
        let indicator = registry
            .get(&ind_cfg.name)
            .map_err(|e| BacktestError::Indicator(ind_cfg.name.clone(), e))?;
        let bars = if ind_cfg.timeframe == config.timeframe {
            multi_tf.primary_bars()
        } else {
            multi_tf
                .secondary_bars(ind_cfg.timeframe)
                .ok_or_else(|| BacktestError::MissingTimeframe(ind_cfg.id.clone(), ind_cfg.timeframe.to_string()))?
        };
        let series = indicator.compute_series(bars);
        Ok((
            ind_cfg.id.clone(),
            PrecomputedIndicator {
                timeframe: ind_cfg.timeframe,
                series,
            },
        ))
    };

    // Each indicator's full series is independent of every other's, so these
    // run concurrently — the one place in the engine where §5 calls for
    // rayon rather than a sequential loop.
    playbook
        .indicators
        .par_iter()
        .map(precompute_one)
        .collect::<Result<Vec<_>>>()
        .map(|v| v.into_iter().collect())
}

/// The playbook-wide warmup window, in primary-timeframe bars: the point past
/// which every configured indicator has produced at least one real output.
/// Built from [`crate::indicators::Indicator::warmup`] rather than
/// re-deriving the Python original's period-key-sniffing heuristic, since the
/// indicator trait already exposes a principled per-indicator warmup.
fn compute_warmup(
    playbook: &Playbook,
    registry: &IndicatorRegistry,
    multi_tf: &MultiTfEngine,
    config: &BacktestConfig,
) -> Result<usize> {
    let mut warmup = 0usize;
    for ind_cfg in &playbook.indicators {
        let indicator = registry
            .get(&ind_cfg.name)
            .map_err(|e| BacktestError::Indicator(ind_cfg.name.clone(), e))?;

        if ind_cfg.timeframe == config.timeframe {
            warmup = warmup.max(indicator.warmup(multi_tf.primary_bars().len()));
            continue;
        }

        let secondary_bars = multi_tf
            .secondary_bars(ind_cfg.timeframe)
            .ok_or_else(|| BacktestError::MissingTimeframe(ind_cfg.id.clone(), ind_cfg.timeframe.to_string()))?;
        let secondary_warmup = indicator.warmup(secondary_bars.len());

        let mut primary_threshold = multi_tf.primary_bars().len();
        for i in 0..multi_tf.primary_bars().len() {
            if let Some(aligned) = multi_tf.aligned_index(ind_cfg.timeframe, i) {
                if aligned >= secondary_warmup {
                    primary_threshold = i;
                    break;
                }
            }
        }
        warmup = warmup.max(primary_threshold);
    }
    Ok(warmup)
}

/// Every configured indicator's output at `bar_idx`, resolved through the
/// alignment table for secondary timeframes so a phase evaluating on M15 can
/// still read an H4 indicator's last-closed value.
fn indicators_at(
    precomputed: &HashMap<String, PrecomputedIndicator>,
    multi_tf: &MultiTfEngine,
    config: &BacktestConfig,
    bar_idx: usize,
) -> HashMap<String, HashMap<String, f64>> {
    let mut out = HashMap::new();
    for (id, pre) in precomputed {
        let idx = if pre.timeframe == config.timeframe {
            Some(bar_idx)
        } else {
            multi_tf.aligned_index(pre.timeframe, bar_idx)
        };
        if let Some(idx) = idx {
            if let Some(Some(output)) = pre.series.get(idx) {
                out.insert(id.clone(), output.iter().map(|(k, v)| (k.clone(), *v)).collect());
            }
        }
    }
    out
}

fn build_context(
    price: f64,
    variables: &HashMap<String, f64>,
    indicators: &HashMap<String, HashMap<String, f64>>,
    prev_indicators: &HashMap<String, HashMap<String, f64>>,
    position: Option<&OpenPosition>,
    risk: &RiskConfig,
) -> EvalContext {
    let mut ctx = EvalContext::new(price);
    ctx.vars = variables.clone();
    ctx.indicators = indicators.clone();
    ctx.prev_indicators = prev_indicators.clone();
    ctx.trade = position.map(|p| {
        let pnl = (price - p.fill_price) * p.direction.sign();
        HashMap::from([
            ("open_price".to_string(), p.fill_price),
            ("sl".to_string(), p.sl.unwrap_or(0.0)),
            ("tp".to_string(), p.tp.unwrap_or(0.0)),
            ("lot".to_string(), p.lot),
            ("pnl".to_string(), pnl),
        ])
    });
    ctx.risk = HashMap::from([
        ("max_lot".to_string(), risk.max_lot),
        ("max_daily_trades".to_string(), risk.max_daily_trades as f64),
        ("max_drawdown_pct".to_string(), risk.max_drawdown_pct),
        ("max_open_positions".to_string(), risk.max_open_positions as f64),
    ]);
    ctx
}

/// Entry fill, friction applied adversely: a buy pays the spread and slips up,
/// a sell pays the spread and slips down. Returns `(requested, fill)` per
/// SPEC_FULL §9 — both are kept on the trade so a caller can separate
/// execution cost from the signal's own quality.
fn entry_friction(config: &BacktestConfig, direction: Direction, close: f64) -> (f64, f64) {
    let pip = pip_value(&config.symbol);
    let half_spread = config.spread_pips * pip;
    let slippage = config.slippage_pips * pip;
    let fill = match direction {
        Direction::Buy => close + half_spread + slippage,
        Direction::Sell => close - half_spread - slippage,
    };
    (close, fill)
}

/// Exit fill for a discretionary close (transition/timeout/end-of-data).
/// SL/TP exits fill at the stop or target level itself, with no further
/// friction — the level already represents where the order rests.
fn exit_friction(config: &BacktestConfig, direction: Direction, close: f64) -> f64 {
    let pip = pip_value(&config.symbol);
    let half_spread = config.spread_pips * pip;
    let slippage = config.slippage_pips * pip;
    match direction {
        Direction::Buy => close - half_spread - slippage,
        Direction::Sell => close + half_spread + slippage,
    }
}

/// Conservative same-bar tie-break: if a bar's range touches both the stop
/// and the target, the stop is assumed to have been hit first.
fn check_sl_tp(bar: &Bar, pos: &OpenPosition) -> Option<(ExitReason, f64)> {
    let sl_hit = pos
        .sl
        .map(|sl| match pos.direction {
            Direction::Buy => bar.low <= sl,
            Direction::Sell => bar.high >= sl,
        })
        .unwrap_or(false);
    if sl_hit {
        return Some((ExitReason::Sl, pos.sl.expect("sl_hit implies sl is Some")));
    }

    let tp_hit = pos
        .tp
        .map(|tp| match pos.direction {
            Direction::Buy => bar.high >= tp,
            Direction::Sell => bar.low <= tp,
        })
        .unwrap_or(false);
    if tp_hit {
        return Some((ExitReason::Tp, pos.tp.expect("tp_hit implies tp is Some")));
    }

    None
}

fn finish_trade(
    config: &BacktestConfig,
    pos: &OpenPosition,
    close_idx: usize,
    close_price: f64,
    close_time: DateTime<Utc>,
    exit_reason: ExitReason,
) -> BacktestTrade {
    let commission = config.commission_per_lot * pos.lot;
    let pnl = calc_pnl(&config.symbol, pos.direction, pos.fill_price, close_price, pos.lot)
        + pos.realized_partial_pnl
        - commission;
    let pnl_pips = calc_pips(&config.symbol, pos.direction, pos.fill_price, close_price);

    let rr_achieved = pos.sl.and_then(|sl| {
        let risk_distance = (pos.fill_price - sl).abs();
        if risk_distance <= f64::EPSILON {
            return None;
        }
        let reward_distance = match pos.direction {
            Direction::Buy => close_price - pos.fill_price,
            Direction::Sell => pos.fill_price - close_price,
        };
        Some(reward_distance / risk_distance)
    });

    let outcome = if pnl > 0.0 {
        TradeOutcome::Win
    } else if pnl < 0.0 {
        TradeOutcome::Loss
    } else {
        TradeOutcome::Breakeven
    };

    BacktestTrade {
        direction: pos.direction,
        open_idx: pos.open_idx,
        close_idx,
        requested_price: pos.requested_price,
        fill_price: pos.fill_price,
        open_price: pos.fill_price,
        close_price,
        open_time: pos.open_time,
        close_time,
        sl: pos.sl,
        tp: pos.tp,
        lot: pos.lot,
        pnl,
        pnl_pips,
        commission,
        rr_achieved,
        outcome,
        exit_reason,
        phase_at_entry: pos.phase_at_entry.clone(),
        variables_at_entry: pos.variables_at_entry.clone(),
        indicators_at_entry: pos.indicators_at_entry.clone(),
        partial_closes: pos.partial_closes.clone(),
    }
}

/// Ratchets a stop so it never moves adverse to the open direction. Mirrors
/// `playbook::engine`'s private helper of the same name — duplicated rather
/// than shared because the replay loop has its own `OpenPosition`
/// representation distinct from `playbook::engine::OpenTradeSnapshot`.
fn ratchet_sl(current: Option<f64>, proposed: f64, direction: Direction) -> f64 {
    match current {
        None => proposed,
        Some(current) => match direction {
            Direction::Buy => proposed.max(current),
            Direction::Sell => proposed.min(current),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_position_management(
    ast_cache: &AstCache,
    phase: &Phase,
    ctx: &EvalContext,
    bar: &Bar,
    bar_idx: usize,
    config: &BacktestConfig,
    position: &mut Option<OpenPosition>,
    fired_once: &mut HashSet<String>,
    equity: &mut f64,
) {
    let Some(pos) = position.as_mut() else {
        return;
    };

    for rule in &phase.position_management {
        if rule.once && fired_once.contains(&rule.name) {
            continue;
        }
        if !evaluate_condition(ast_cache, &rule.when, ctx) {
            continue;
        }

        match &rule.action {
            PmAction::ModifySl(expr) => {
                if let Ok(new_sl) = evaluate(ast_cache, &expr.expr, ctx) {
                    pos.sl = Some(ratchet_sl(pos.sl, new_sl, pos.direction));
                }
            }
            PmAction::ModifyTp(expr) => {
                if let Ok(new_tp) = evaluate(ast_cache, &expr.expr, ctx) {
                    pos.tp = Some(new_tp);
                }
            }
            PmAction::TrailSl { distance } => {
                if let Ok(distance) = evaluate(ast_cache, &distance.expr, ctx) {
                    let raw = match pos.direction {
                        Direction::Buy => bar.close - distance,
                        Direction::Sell => bar.close + distance,
                    };
                    pos.sl = Some(ratchet_sl(pos.sl, raw, pos.direction));
                }
            }
            PmAction::PartialClose { percent } => {
                let fraction = (percent / 100.0).clamp(0.0, 1.0);
                if fraction > 0.0 && pos.lot > 0.0 {
                    let closed_lot = pos.lot * fraction;
                    let fill_exit = exit_friction(config, pos.direction, bar.close);
                    let pnl = calc_pnl(&config.symbol, pos.direction, pos.fill_price, fill_exit, closed_lot);
                    pos.lot -= closed_lot;
                    pos.realized_partial_pnl += pnl;
                    pos.partial_closes.push(PartialClose {
                        bar_idx,
                        percent: fraction * 100.0,
                        price: fill_exit,
                        pnl,
                    });
                    *equity += pnl;
                }
            }
        }

        if rule.once {
            fired_once.insert(rule.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use crate::expr::{CmpOp, Condition, Rule};
    use crate::playbook::{Autonomy, PhaseTimeout, TradeAction, TransitionAction};
    use chrono::TimeZone;
    use std::collections::HashMap as Map;

    fn bar(minute: i64, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            time: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: close,
            high: close + 0.0005,
            low: close - 0.0005,
            close,
            volume: 10,
        }
    }

    fn long_only_playbook() -> Playbook {
        let mut phases = Map::new();
        phases.insert(
            "idle".to_string(),
            Phase {
                evaluate_on: vec![Timeframe::M15],
                transitions: vec![Transition {
                    to: "in_pos".into(),
                    conditions: Condition::All(vec![Condition::Rule(Rule {
                        left: "_price".into(),
                        op: CmpOp::Gt,
                        right: "1.0".into(),
                    })]),
                    actions: vec![TransitionAction {
                        open_trade: Some(TradeAction {
                            direction: Direction::Buy,
                            lot: None,
                            sl: Some(crate::playbook::DynExpr::new("_price - 0.01")),
                            tp: Some(crate::playbook::DynExpr::new("_price + 0.05")),
                        }),
                        ..Default::default()
                    }],
                    priority: 1,
                }],
                timeout: None,
                position_management: vec![],
                on_trade_closed: Some("idle".into()),
            },
        );
        phases.insert(
            "in_pos".to_string(),
            Phase {
                evaluate_on: vec![Timeframe::M15],
                transitions: vec![],
                timeout: None,
                position_management: vec![],
                on_trade_closed: Some("idle".into()),
            },
        );

        Playbook {
            schema_version: 1,
            id: "pb1".into(),
            name: "test".into(),
            description: String::new(),
            symbols: vec!["EURUSD".into()],
            autonomy: Autonomy::FullAuto,
            indicators: vec![],
            variables: Map::new(),
            phases,
            initial_phase: "idle".into(),
            risk: RiskConfig::default(),
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        (0..n).map(|i| bar(i as i64, 1.1 + (i as f64) * 0.0001)).collect()
    }

    #[test]
    fn empty_bars_is_an_error() {
        let playbook = long_only_playbook();
        let registry = IndicatorRegistry::new();
        let multi_tf = MultiTfEngine::new(vec![]);
        let mut config = BacktestConfig::default();
        config.warmup_override = Some(0);
        assert!(matches!(
            run_backtest(&playbook, &registry, &multi_tf, &config),
            Err(BacktestError::EmptyBars)
        ));
    }

    #[test]
    fn opens_and_closes_a_trade_via_take_profit() {
        let playbook = long_only_playbook();
        let registry = IndicatorRegistry::new();
        let mut series = bars(10);
        // Bar 5 rallies through the take-profit level set at entry.
        series[5].high = series[4].close + 0.06;
        let multi_tf = MultiTfEngine::new(series);
        let config = BacktestConfig {
            warmup_override: Some(0),
            ..BacktestConfig::default()
        };

        let result = run_backtest(&playbook, &registry, &multi_tf, &config).unwrap();
        assert!(!result.trades.is_empty());
        let trade = &result.trades[0];
        assert_eq!(trade.direction, Direction::Buy);
        assert_eq!(trade.exit_reason, ExitReason::Tp);
        assert_eq!(trade.outcome, TradeOutcome::Win);
    }

    #[test]
    fn forced_close_at_end_of_data_when_still_open() {
        let playbook = long_only_playbook();
        let registry = IndicatorRegistry::new();
        let series = bars(5);
        let multi_tf = MultiTfEngine::new(series);
        let config = BacktestConfig {
            warmup_override: Some(0),
            ..BacktestConfig::default()
        };

        let result = run_backtest(&playbook, &registry, &multi_tf, &config).unwrap();
        assert_eq!(result.trades.last().unwrap().exit_reason, ExitReason::EndOfData);
    }

    #[test]
    fn not_enough_bars_for_warmup_is_an_error() {
        let playbook = long_only_playbook();
        let registry = IndicatorRegistry::new();
        let multi_tf = MultiTfEngine::new(bars(3));
        let config = BacktestConfig {
            warmup_override: Some(10),
            ..BacktestConfig::default()
        };
        assert!(matches!(
            run_backtest(&playbook, &registry, &multi_tf, &config),
            Err(BacktestError::NotEnoughBars { .. })
        ));
    }

    #[test]
    fn phase_timeout_moves_phase_without_a_position() {
        let mut playbook = long_only_playbook();
        playbook.phases.get_mut("idle").unwrap().transitions.clear();
        playbook.phases.get_mut("idle").unwrap().timeout = Some(PhaseTimeout {
            timeframe: Timeframe::M15,
            bars: 2,
            to: "in_pos".into(),
        });
        let registry = IndicatorRegistry::new();
        let multi_tf = MultiTfEngine::new(bars(6));
        let config = BacktestConfig {
            warmup_override: Some(0),
            ..BacktestConfig::default()
        };

        let result = run_backtest(&playbook, &registry, &multi_tf, &config).unwrap();
        assert!(result.trades.is_empty());
    }
}
