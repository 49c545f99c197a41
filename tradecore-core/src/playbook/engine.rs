//! The live playbook state machine.
//!
//! One [`PlaybookInstance`] exists per (playbook, symbol) pair (the
//! specification resolves an ambiguity in the Python original here: the
//! original keys its instance table by playbook id alone and silently
//! overwrites the instance on every configured symbol but the last one —
//! this port keys by the composite pair instead, so every symbol gets its
//! own instance). A [`PlaybookEngine`] owns the table and dispatches
//! bar-close events to the right instance.
//!
//! Grounded on `original_source/agent/playbook_engine.py`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Timeframe};
use crate::expr::{evaluate, evaluate_condition, evaluate_condition_detailed, AstCache, ConditionSnapshot, EvalContext};
use crate::indicators::IndicatorRegistry;

use super::{CircuitBreakerConfig, DynExpr, Direction, Phase, PmAction, Playbook, TransitionAction, VarValue};

/// The direction (or exit) a signal requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Long,
    Short,
    ExitLong,
    ExitShort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub playbook_id: String,
    pub phase: String,
    pub symbol: String,
    pub direction: SignalDirection,
    pub price_at_signal: f64,
    pub conditions_snapshot: ConditionSnapshot,
    pub reasoning: String,
}

/// A position-management event emitted instead of being applied directly —
/// the caller (live trade executor, or the backtest replay loop) decides how
/// to realize it against the actual open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManagementEvent {
    ModifySl { symbol: String, new_sl: f64 },
    ModifyTp { symbol: String, new_tp: f64 },
    TrailSl { symbol: String, new_sl: f64 },
    PartialClose { symbol: String, percent: f64 },
}

/// Everything that happened during one `on_bar_close` evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    pub signals: Vec<Signal>,
    pub management_events: Vec<ManagementEvent>,
    pub log_messages: Vec<String>,
    pub transitioned: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub consecutive_losses: u32,
    pub error_count: u32,
    pub tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    /// Trips if a threshold (nonzero) has been reached; returns whether the
    /// state just transitioned into tripped.
    fn maybe_trip(&mut self, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> bool {
        if self.tripped {
            return false;
        }
        let losses_tripped =
            config.max_consecutive_losses > 0 && self.consecutive_losses >= config.max_consecutive_losses;
        let errors_tripped = config.max_errors > 0 && self.error_count >= config.max_errors;
        if losses_tripped || errors_tripped {
            self.tripped = true;
            self.tripped_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Auto-resets once the cooldown has elapsed. A `cooldown_minutes` of 0
    /// means manual reset only.
    fn maybe_cooldown(&mut self, config: &CircuitBreakerConfig, now: DateTime<Utc>) {
        if !self.tripped || config.cooldown_minutes <= 0 {
            return;
        }
        if let Some(tripped_at) = self.tripped_at {
            let elapsed = now.signed_duration_since(tripped_at);
            if elapsed.num_minutes() >= config.cooldown_minutes {
                self.reset();
            }
        }
    }

    pub fn reset(&mut self) {
        self.tripped = false;
        self.tripped_at = None;
        self.consecutive_losses = 0;
        self.error_count = 0;
    }

    pub fn is_active(&self) -> bool {
        self.tripped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTradeSnapshot {
    pub ticket: Option<u64>,
    pub direction: Direction,
    pub open_price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub lot: f64,
}

/// Per-(playbook, symbol) state. Mutated only by [`PlaybookEngine`]; emitted
/// after every evaluation so a caller can persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookInstance {
    pub playbook_id: String,
    pub symbol: String,
    pub current_phase: String,
    pub variables: HashMap<String, VarValue>,
    pub bars_in_phase: u64,
    pub timeframe_counters: HashMap<Timeframe, u64>,
    pub fired_once: HashSet<String>,
    pub position: Option<OpenTradeSnapshot>,
    pub circuit_breaker: CircuitBreakerState,
    /// Current-bar indicator outputs, `id -> field -> value`.
    pub indicators: HashMap<String, HashMap<String, f64>>,
    /// The previous bar's outputs, for `prev.<id>.<field>` resolution.
    pub prev_indicators: HashMap<String, HashMap<String, f64>>,
}

impl PlaybookInstance {
    pub fn new(playbook: &Playbook, symbol: impl Into<String>) -> Self {
        let variables = playbook
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.default.clone()))
            .collect();
        Self {
            playbook_id: playbook.id.clone(),
            symbol: symbol.into(),
            current_phase: playbook.initial_phase.clone(),
            variables,
            bars_in_phase: 0,
            timeframe_counters: HashMap::new(),
            fired_once: HashSet::new(),
            position: None,
            circuit_breaker: CircuitBreakerState::default(),
            indicators: HashMap::new(),
            prev_indicators: HashMap::new(),
        }
    }

    fn var_map_f64(&self) -> HashMap<String, f64> {
        self.variables
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
            .collect()
    }

    fn trade_context(&self, price: f64) -> Option<HashMap<String, f64>> {
        self.position.as_ref().map(|p| {
            let pnl = (price - p.open_price) * p.direction.sign();
            HashMap::from([
                ("open_price".to_string(), p.open_price),
                ("sl".to_string(), p.sl.unwrap_or(0.0)),
                ("tp".to_string(), p.tp.unwrap_or(0.0)),
                ("lot".to_string(), p.lot),
                ("pnl".to_string(), pnl),
            ])
        })
    }

    fn risk_context(risk: &super::RiskConfig) -> HashMap<String, f64> {
        HashMap::from([
            ("max_lot".to_string(), risk.max_lot),
            ("max_daily_trades".to_string(), risk.max_daily_trades as f64),
            ("max_drawdown_pct".to_string(), risk.max_drawdown_pct),
            ("max_open_positions".to_string(), risk.max_open_positions as f64),
        ])
    }

    fn build_context(&self, price: f64, risk: &super::RiskConfig) -> EvalContext {
        let mut ctx = EvalContext::new(price);
        ctx.vars = self.var_map_f64();
        ctx.indicators = self.indicators.clone();
        ctx.prev_indicators = self.prev_indicators.clone();
        ctx.trade = self.trade_context(price);
        ctx.risk = Self::risk_context(risk);
        ctx
    }

    /// Recomputes every playbook indicator whose configured timeframe is
    /// `closed_tf`, using the most recent bars available on that timeframe.
    fn refresh_indicators(
        &mut self,
        playbook: &Playbook,
        registry: &IndicatorRegistry,
        closed_tf: Timeframe,
        bars_by_tf: &HashMap<Timeframe, Vec<Bar>>,
    ) {
        for ind_cfg in &playbook.indicators {
            if ind_cfg.timeframe != closed_tf {
                continue;
            }
            let Ok(indicator) = registry.get(&ind_cfg.name) else {
                continue;
            };
            let Some(bars) = bars_by_tf.get(&closed_tf) else {
                continue;
            };
            if bars.is_empty() {
                continue;
            }
            if let Some(output) = indicator.compute_at(bars, bars.len() - 1) {
                self.indicators.insert(ind_cfg.id.clone(), output.into_iter().collect());
            }
        }
    }

    /// Runs one bar-close evaluation per the ten-step algorithm. Returns the
    /// signals and management events produced; does not itself talk to a
    /// broker — that is the caller's job, informed by this output.
    #[allow(clippy::too_many_arguments)]
    pub fn on_bar_close(
        &mut self,
        playbook: &Playbook,
        registry: &IndicatorRegistry,
        ast_cache: &AstCache,
        closed_tf: Timeframe,
        bars_by_tf: &HashMap<Timeframe, Vec<Bar>>,
        price: f64,
        now: DateTime<Utc>,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        self.circuit_breaker.maybe_cooldown(&playbook.risk.circuit_breaker, now);

        let Some(phase) = playbook.phases.get(&self.current_phase) else {
            return outcome;
        };
        if !phase.evaluate_on.contains(&closed_tf) {
            return outcome;
        }

        self.refresh_indicators(playbook, registry, closed_tf, bars_by_tf);

        self.bars_in_phase += 1;
        *self.timeframe_counters.entry(closed_tf).or_insert(0) += 1;

        // Timeout check.
        if let Some(timeout) = &phase.timeout {
            let count = self.timeframe_counters.get(&timeout.timeframe).copied().unwrap_or(0);
            if timeout.timeframe == closed_tf && count >= timeout.bars {
                self.transition_to(&timeout.to);
                outcome.transitioned = true;
                return outcome;
            }
        }

        let ctx = self.build_context(price, &playbook.risk);
        let breaker_active = self.circuit_breaker.is_active();

        let phase = playbook.phases.get(&self.current_phase).expect("phase exists");
        let mut sorted: Vec<&super::Transition> = phase.transitions.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        for transition in sorted {
            if !evaluate_condition(ast_cache, &transition.conditions, &ctx) {
                continue;
            }
            let snapshot = evaluate_condition_detailed(ast_cache, &transition.conditions, &ctx);
            self.execute_actions(
                playbook,
                ast_cache,
                &transition.actions,
                &ctx,
                price,
                breaker_active,
                &mut outcome,
                snapshot,
            );
            self.transition_to(&transition.to);
            outcome.transitioned = true;
            break;
        }

        if !outcome.transitioned {
            if let Some(phase) = playbook.phases.get(&self.current_phase) {
                self.evaluate_position_management(ast_cache, phase, &ctx, price, &mut outcome);
            }
        }

        self.prev_indicators = self.indicators.clone();
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_actions(
        &mut self,
        playbook: &Playbook,
        ast_cache: &AstCache,
        actions: &[TransitionAction],
        ctx: &EvalContext,
        price: f64,
        breaker_active: bool,
        outcome: &mut StepOutcome,
        snapshot: ConditionSnapshot,
    ) {
        for action in actions {
            if let (Some(name), Some(expr)) = (&action.set_var, &action.expr) {
                if let Ok(value) = evaluate(ast_cache, expr, ctx) {
                    self.variables.insert(name.clone(), VarValue::Float(value));
                }
            }

            if let Some(trade) = &action.open_trade {
                if self.position.is_none() && !breaker_active {
                    let lot = trade
                        .lot
                        .as_ref()
                        .and_then(|e| evaluate(ast_cache, &e.expr, ctx).ok())
                        .unwrap_or(playbook.risk.max_lot);
                    let sl = trade.sl.as_ref().and_then(|e| evaluate(ast_cache, &e.expr, ctx).ok());
                    let tp = trade.tp.as_ref().and_then(|e| evaluate(ast_cache, &e.expr, ctx).ok());

                    self.position = Some(OpenTradeSnapshot {
                        ticket: None,
                        direction: trade.direction,
                        open_price: price,
                        sl,
                        tp,
                        lot,
                    });

                    let direction = match trade.direction {
                        Direction::Buy => SignalDirection::Long,
                        Direction::Sell => SignalDirection::Short,
                    };
                    outcome.signals.push(Signal {
                        playbook_id: self.playbook_id.clone(),
                        phase: self.current_phase.clone(),
                        symbol: self.symbol.clone(),
                        direction,
                        price_at_signal: price,
                        conditions_snapshot: snapshot.clone(),
                        reasoning: format!("transition fired in phase {}", self.current_phase),
                    });
                }
            }

            if action.close_trade {
                if let Some(position) = &self.position {
                    let direction = match position.direction {
                        Direction::Buy => SignalDirection::ExitLong,
                        Direction::Sell => SignalDirection::ExitShort,
                    };
                    outcome.signals.push(Signal {
                        playbook_id: self.playbook_id.clone(),
                        phase: self.current_phase.clone(),
                        symbol: self.symbol.clone(),
                        direction,
                        price_at_signal: price,
                        conditions_snapshot: snapshot.clone(),
                        reasoning: "close_trade action".to_string(),
                    });
                }
            }

            if let Some(msg) = &action.log {
                outcome.log_messages.push(msg.clone());
            }
        }
    }

    fn evaluate_position_management(
        &mut self,
        ast_cache: &AstCache,
        phase: &Phase,
        ctx: &EvalContext,
        price: f64,
        outcome: &mut StepOutcome,
    ) {
        if self.position.is_none() {
            return;
        }
        for rule in &phase.position_management {
            if rule.once && self.fired_once.contains(&rule.name) {
                continue;
            }
            if !evaluate_condition(ast_cache, &rule.when, ctx) {
                continue;
            }

            let direction = self.position.as_ref().map(|p| p.direction);
            match &rule.action {
                PmAction::ModifySl(expr) => {
                    if let Ok(mut new_sl) = evaluate(ast_cache, &expr.expr, ctx) {
                        if let (Some(position), Some(dir)) = (&mut self.position, direction) {
                            new_sl = ratchet_sl(position.sl, new_sl, dir);
                            position.sl = Some(new_sl);
                            outcome.management_events.push(ManagementEvent::ModifySl {
                                symbol: self.symbol.clone(),
                                new_sl,
                            });
                        }
                    }
                }
                PmAction::ModifyTp(expr) => {
                    if let Ok(new_tp) = evaluate(ast_cache, &expr.expr, ctx) {
                        if let Some(position) = &mut self.position {
                            position.tp = Some(new_tp);
                            outcome.management_events.push(ManagementEvent::ModifyTp {
                                symbol: self.symbol.clone(),
                                new_tp,
                            });
                        }
                    }
                }
                PmAction::TrailSl { distance } => {
                    if let (Ok(distance), Some(dir)) = (evaluate(ast_cache, &distance.expr, ctx), direction) {
                        let raw = match dir {
                            Direction::Buy => price - distance,
                            Direction::Sell => price + distance,
                        };
                        if let Some(position) = &mut self.position {
                            let new_sl = ratchet_sl(position.sl, raw, dir);
                            position.sl = Some(new_sl);
                            outcome.management_events.push(ManagementEvent::TrailSl {
                                symbol: self.symbol.clone(),
                                new_sl,
                            });
                        }
                    }
                }
                PmAction::PartialClose { percent } => {
                    outcome.management_events.push(ManagementEvent::PartialClose {
                        symbol: self.symbol.clone(),
                        percent: *percent,
                    });
                }
            }

            if rule.once {
                self.fired_once.insert(rule.name.clone());
            }
        }
    }

    fn transition_to(&mut self, to: &str) {
        self.current_phase = to.to_string();
        self.bars_in_phase = 0;
        self.timeframe_counters.clear();
        self.fired_once.clear();
    }

    /// External order flow notifies the instance a trade opened.
    pub fn notify_trade_opened(&mut self, ticket: u64, direction: Direction, open_price: f64, sl: Option<f64>, tp: Option<f64>, lot: f64) {
        self.position = Some(OpenTradeSnapshot {
            ticket: Some(ticket),
            direction,
            open_price,
            sl,
            tp,
            lot,
        });
    }

    /// External order flow notifies the instance a trade closed with the
    /// given P&L. Updates the circuit breaker and follows `on_trade_closed`
    /// if the current phase declares one.
    pub fn notify_trade_closed(&mut self, playbook: &Playbook, pnl: f64, now: DateTime<Utc>) {
        self.position = None;
        if pnl < 0.0 {
            self.circuit_breaker.consecutive_losses += 1;
        } else {
            self.circuit_breaker.consecutive_losses = 0;
        }
        self.circuit_breaker.maybe_trip(&playbook.risk.circuit_breaker, now);

        if let Some(phase) = playbook.phases.get(&self.current_phase) {
            if let Some(target) = phase.on_trade_closed.clone() {
                self.transition_to(&target);
            }
        }
    }

    pub fn notify_trade_error(&mut self, playbook: &Playbook, now: DateTime<Utc>) {
        self.circuit_breaker.error_count += 1;
        self.circuit_breaker.maybe_trip(&playbook.risk.circuit_breaker, now);
    }

    pub fn is_circuit_breaker_active(&self) -> bool {
        self.circuit_breaker.is_active()
    }

    pub fn reset_circuit_breaker(&mut self) {
        self.circuit_breaker.reset();
    }
}

/// Ratchets a stop so it never moves adverse to the open direction: a long's
/// stop only ever rises, a short's stop only ever falls. Matches
/// `original_source/agent/backtest/engine.py`'s `_process_pm_rules` trail
/// branch, generalized to every SL-setting action per §4.5 step 7.
fn ratchet_sl(current: Option<f64>, proposed: f64, direction: Direction) -> f64 {
    match current {
        None => proposed,
        Some(current) => match direction {
            Direction::Buy => proposed.max(current),
            Direction::Sell => proposed.min(current),
        },
    }
}

/// Owns every (playbook, symbol) instance and dispatches bar-close events.
#[derive(Default)]
pub struct PlaybookEngine {
    instances: HashMap<(String, String), PlaybookInstance>,
    ast_cache: AstCache,
}

impl PlaybookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads one instance per configured symbol (not one per playbook — see
    /// the module doc comment for why this differs from the Python
    /// original).
    pub fn load(&mut self, playbook: &Playbook) {
        for symbol in &playbook.symbols {
            let key = (playbook.id.clone(), symbol.clone());
            self.instances
                .entry(key)
                .or_insert_with(|| PlaybookInstance::new(playbook, symbol.clone()));
        }
    }

    pub fn unload(&mut self, playbook_id: &str, symbol: &str) {
        self.instances.remove(&(playbook_id.to_string(), symbol.to_string()));
    }

    pub fn instance(&self, playbook_id: &str, symbol: &str) -> Option<&PlaybookInstance> {
        self.instances.get(&(playbook_id.to_string(), symbol.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_bar_close(
        &mut self,
        playbook: &Playbook,
        registry: &IndicatorRegistry,
        symbol: &str,
        closed_tf: Timeframe,
        bars_by_tf: &HashMap<Timeframe, Vec<Bar>>,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<StepOutcome> {
        let key = (playbook.id.clone(), symbol.to_string());
        let instance = self.instances.get_mut(&key)?;
        Some(instance.on_bar_close(playbook, registry, &self.ast_cache, closed_tf, bars_by_tf, price, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CmpOp, Condition, Rule};
    use std::collections::HashMap as Map;

    fn bar(minute: i64, close: f64) -> Bar {
        use chrono::TimeZone;
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            time: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: close,
            high: close + 0.001,
            low: close - 0.001,
            close,
            volume: 10,
        }
    }

    fn trending_playbook() -> Playbook {
        let mut phases = Map::new();
        phases.insert(
            "idle".to_string(),
            Phase {
                evaluate_on: vec![Timeframe::M15],
                transitions: vec![super::super::Transition {
                    to: "in_pos".into(),
                    conditions: Condition::All(vec![Condition::Rule(Rule {
                        left: "_price".into(),
                        op: CmpOp::Gt,
                        right: "1.0".into(),
                    })]),
                    actions: vec![TransitionAction {
                        open_trade: Some(super::super::TradeAction {
                            direction: Direction::Buy,
                            lot: None,
                            sl: Some(DynExpr::new("_price - 0.01")),
                            tp: Some(DynExpr::new("_price + 0.02")),
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
            autonomy: Autonomy::SignalOnly,
            indicators: vec![],
            variables: Map::new(),
            phases,
            initial_phase: "idle".into(),
            risk: super::super::RiskConfig::default(),
        }
    }

    #[test]
    fn transition_fires_and_opens_position() {
        let playbook = trending_playbook();
        let mut engine = PlaybookEngine::new();
        engine.load(&playbook);
        let registry = IndicatorRegistry::new();
        let bars_by_tf = Map::from([(Timeframe::M15, vec![bar(0, 1.1)])]);

        let outcome = engine
            .on_bar_close(&playbook, &registry, "EURUSD", Timeframe::M15, &bars_by_tf, 1.1, Utc::now())
            .unwrap();

        assert_eq!(outcome.signals.len(), 1);
        assert_eq!(outcome.signals[0].direction, SignalDirection::Long);
        let instance = engine.instance("pb1", "EURUSD").unwrap();
        assert_eq!(instance.current_phase, "in_pos");
        assert!(instance.position.is_some());
    }

    #[test]
    fn circuit_breaker_trips_after_consecutive_losses() {
        let mut playbook = trending_playbook();
        playbook.risk.circuit_breaker = CircuitBreakerConfig {
            max_consecutive_losses: 2,
            max_errors: 0,
            cooldown_minutes: 0,
        };
        let mut instance = PlaybookInstance::new(&playbook, "EURUSD");
        let now = Utc::now();
        instance.notify_trade_closed(&playbook, -10.0, now);
        assert!(!instance.is_circuit_breaker_active());
        instance.notify_trade_closed(&playbook, -10.0, now);
        assert!(instance.is_circuit_breaker_active());
    }

    #[test]
    fn circuit_breaker_suppresses_open_trade_not_close() {
        let playbook = trending_playbook();
        let mut instance = PlaybookInstance::new(&playbook, "EURUSD");
        instance.circuit_breaker.tripped = true;
        let registry = IndicatorRegistry::new();
        let ast_cache = AstCache::new();
        let bars_by_tf = Map::from([(Timeframe::M15, vec![bar(0, 1.1)])]);
        let outcome = instance.on_bar_close(&playbook, &registry, &ast_cache, Timeframe::M15, &bars_by_tf, 1.1, Utc::now());
        assert!(outcome.signals.is_empty());
        assert!(instance.position.is_none());
    }

    #[test]
    fn ratchet_never_loosens_long_stop() {
        assert_eq!(ratchet_sl(Some(1.0), 0.9, Direction::Buy), 1.0);
        assert_eq!(ratchet_sl(Some(1.0), 1.1, Direction::Buy), 1.1);
    }

    #[test]
    fn ratchet_never_loosens_short_stop() {
        assert_eq!(ratchet_sl(Some(1.0), 1.1, Direction::Sell), 1.0);
        assert_eq!(ratchet_sl(Some(1.0), 0.9, Direction::Sell), 0.9);
    }
}
