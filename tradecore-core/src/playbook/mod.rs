//! Playbook data model.
//!
//! A playbook is a declarative, multi-phase state machine: indicators feed
//! a shared expression context, phases own prioritized transitions guarded
//! by condition trees, and position-management rules adjust an open trade
//! without changing phase. This module only describes the *shape*; the
//! state machine that walks it lives in [`engine`].
//!
//! Grounded on `original_source/agent/models/playbook.py` and
//! `original_source/agent/models/strategy.py`.

pub mod engine;
mod error;

pub use error::{PlaybookError, Result};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Timeframe;
use crate::expr::Condition;
use crate::indicators::IndicatorRegistry;

/// Trading direction of an open or requested position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

/// Whether a playbook may act on its own signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    SignalOnly,
    SemiAuto,
    FullAuto,
}

impl Default for Autonomy {
    fn default() -> Self {
        Autonomy::SignalOnly
    }
}

/// A named expression string, mirroring the Python original's `DynamicExpr`
/// wrapper — every field that is computed rather than fixed carries its
/// source expression alongside whatever other metadata the action needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynExpr {
    pub expr: String,
}

impl DynExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        Self { expr: expr.into() }
    }
}

/// A playbook-instance variable: a typed scalar with a default, readable by
/// expressions as `var.<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VarValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
}

impl VarValue {
    /// Coerce to the scalar an expression sees. String variables have no
    /// numeric form and are skipped when building an evaluation context.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VarValue::Float(v) => Some(*v),
            VarValue::Int(v) => Some(*v as f64),
            VarValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            VarValue::String(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookVariable {
    pub default: VarValue,
}

/// One configured indicator instance within a playbook. `params` are plain
/// scalars; indicator-specific defaults fill in anything unspecified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub id: String,
    pub name: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub params: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// 0 disables the consecutive-loss trip.
    pub max_consecutive_losses: u32,
    /// 0 disables the error-count trip.
    pub max_errors: u32,
    /// 0 means manual reset only.
    pub cooldown_minutes: i64,
}

impl CircuitBreakerConfig {
    /// The teacher's `CircuitBreaker::default_provider()` convention: three
    /// consecutive failures, a 30 minute cooldown.
    pub fn default_enabled() -> Self {
        Self {
            max_consecutive_losses: 3,
            max_errors: 5,
            cooldown_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_lot: f64,
    pub max_daily_trades: u32,
    pub max_drawdown_pct: f64,
    pub max_open_positions: u32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_lot: 0.1,
            max_daily_trades: 5,
            max_drawdown_pct: 3.0,
            max_open_positions: 2,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// An `open_trade` transition action: direction is fixed, lot/SL/TP are
/// optional expressions evaluated against the firing bar's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAction {
    pub direction: Direction,
    #[serde(default)]
    pub lot: Option<DynExpr>,
    #[serde(default)]
    pub sl: Option<DynExpr>,
    #[serde(default)]
    pub tp: Option<DynExpr>,
}

/// One action executed when a transition fires, in declared order. At most
/// one of `set_var`/`open_trade`/`close_trade`/`log` is meaningful per
/// instance, but all four are modeled as independent optional fields so a
/// single action list entry can, like the original, combine a `log` with a
/// trade action for journaling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionAction {
    #[serde(default)]
    pub set_var: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub open_trade: Option<TradeAction>,
    #[serde(default)]
    pub close_trade: bool,
    #[serde(default)]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub to: String,
    pub conditions: Condition,
    #[serde(default)]
    pub actions: Vec<TransitionAction>,
    #[serde(default)]
    pub priority: i32,
}

/// One of the four position-management operations a rule may perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmAction {
    ModifySl(DynExpr),
    ModifyTp(DynExpr),
    TrailSl { distance: DynExpr },
    PartialClose { percent: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionManagementRule {
    pub name: String,
    #[serde(default)]
    pub once: bool,
    pub when: Condition,
    pub action: PmAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTimeout {
    pub timeframe: Timeframe,
    pub bars: u64,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub evaluate_on: Vec<Timeframe>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub timeout: Option<PhaseTimeout>,
    #[serde(default)]
    pub position_management: Vec<PositionManagementRule>,
    #[serde(default)]
    pub on_trade_closed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub autonomy: Autonomy,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    #[serde(default)]
    pub variables: HashMap<String, PlaybookVariable>,
    pub phases: HashMap<String, Phase>,
    pub initial_phase: String,
    #[serde(default)]
    pub risk: RiskConfig,
}

fn default_schema_version() -> u32 {
    1
}

impl Playbook {
    /// Validates referential integrity: every phase name a transition,
    /// timeout, or `on_trade_closed` points at must exist, the initial phase
    /// must exist, indicator ids must be unique, and every indicator name
    /// must resolve against the given registry. Called once at load time;
    /// a playbook that fails this is rejected before any bar is evaluated.
    pub fn validate(&self, registry: &IndicatorRegistry) -> Result<()> {
        if self.phases.is_empty() {
            return Err(PlaybookError::NoPhases);
        }
        if !self.phases.contains_key(&self.initial_phase) {
            return Err(PlaybookError::UnknownInitialPhase(self.initial_phase.clone()));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for ind in &self.indicators {
            if !seen_ids.insert(ind.id.clone()) {
                return Err(PlaybookError::DuplicateIndicatorId(ind.id.clone()));
            }
            registry
                .get(&ind.name)
                .map_err(|e| PlaybookError::Indicator(ind.name.clone(), e))?;
        }

        for (name, phase) in &self.phases {
            for transition in &phase.transitions {
                if !self.phases.contains_key(&transition.to) {
                    return Err(PlaybookError::UnknownTransitionTarget {
                        from: name.clone(),
                        to: transition.to.clone(),
                    });
                }
            }
            if let Some(timeout) = &phase.timeout {
                if !self.phases.contains_key(&timeout.to) {
                    return Err(PlaybookError::UnknownTimeoutTarget {
                        from: name.clone(),
                        to: timeout.to.clone(),
                    });
                }
            }
            if let Some(target) = &phase.on_trade_closed {
                if !self.phases.contains_key(target) {
                    return Err(PlaybookError::UnknownTradeClosedTarget {
                        from: name.clone(),
                        to: target.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
