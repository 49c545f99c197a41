//! Indicator engine.
//!
//! Every indicator can be run two ways and must agree pointwise: `compute_at`
//! judges a single bar using only bars up to and including it (what a
//! playbook sees live); `compute_series` runs the same logic over a whole
//! history (what a backtest precomputes once). The default `compute_at`
//! simply calls `compute_series` on a truncated slice, which makes
//! "no look-ahead" a structural property rather than a discipline an author
//! has to remember.

mod custom;
mod error;
mod nw;
mod ob_fvg;
mod registry;
mod smc;
mod standard;
mod tpo;

pub use custom::{CustomIndicator, KeltnerChannel};
pub use error::IndicatorError;
pub use nw::{NwEnvelope, NwKernel};
pub use ob_fvg::OrderBlocksFvg;
pub use registry::IndicatorRegistry;
pub use smc::SmcStructure;
pub use standard::{Adx, Atr, Bollinger, Cci, Ema, Macd, Rsi, Sma, Stochastic, WilliamsR};
pub use tpo::RollingTpo;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::domain::Bar;

/// A single bar's worth of output from an indicator: field name -> value.
/// Uses `BTreeMap` for deterministic iteration/serialization order.
pub type IndicatorOutput = BTreeMap<String, f64>;

pub trait Indicator: Send + Sync {
    fn name(&self) -> &str;

    /// Field names this indicator writes, e.g. `["macd", "signal", "histogram"]`.
    fn output_fields(&self) -> &[&str];

    /// A string uniquely identifying this instance's frozen parameters, used
    /// as part of the memoization key so two differently-parameterized copies
    /// of the same indicator never collide in a shared cache.
    fn params_fingerprint(&self) -> String;

    /// Number of leading bars that produce no output (absent, not a sentinel
    /// value) before the indicator has enough history to be meaningful.
    fn warmup(&self, bar_count: usize) -> usize;

    /// Compute this indicator over every bar in `bars`. `bars[i]`'s output
    /// must depend only on `bars[0..=i]`.
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>>;

    /// Compute this indicator at a single bar index. The default
    /// implementation truncates history to `bars[..=index]` before delegating
    /// to `compute_series`, so future bars are structurally unreachable.
    fn compute_at(&self, bars: &[Bar], index: usize) -> Option<IndicatorOutput> {
        if index >= bars.len() {
            return None;
        }
        self.compute_series(&bars[..=index]).pop().flatten()
    }
}

/// `clamp(max_period * 1.2, 20, N/4)`, rounded down. Degenerates gracefully
/// when `N` is small enough that `N/4 < 20` by using `N/4` as both bounds.
pub fn warmup_bars(max_period: usize, bar_count: usize) -> usize {
    let raw = (max_period as f64 * 1.2).floor() as usize;
    let hi = (bar_count / 4).max(1);
    let lo = 20usize.min(hi);
    raw.clamp(lo, hi)
}

/// Memoizes indicator output by `(bar_index, indicator_name, frozen_params)`
/// so a playbook re-evaluating the same bar (e.g. across multiple rules that
/// reference the same indicator) only pays the compute cost once.
#[derive(Default)]
pub struct IndicatorCache {
    cache: Mutex<HashMap<(usize, String, String), Option<IndicatorOutput>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        indicator: &dyn Indicator,
        bars: &[Bar],
        index: usize,
    ) -> Option<IndicatorOutput> {
        let key = (index, indicator.name().to_string(), indicator.params_fingerprint());
        {
            let guard = self.cache.lock().expect("indicator cache poisoned");
            if let Some(hit) = guard.get(&key) {
                return hit.clone();
            }
        }
        let result = indicator.compute_at(bars, index);
        self.cache
            .lock()
            .expect("indicator cache poisoned")
            .insert(key, result.clone());
        result
    }

    pub fn clear(&self) {
        self.cache.lock().expect("indicator cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_clamps_between_twenty_and_quarter_length() {
        assert_eq!(warmup_bars(14, 1000), 20);
        assert_eq!(warmup_bars(200, 1000), 240);
        assert_eq!(warmup_bars(200, 40), 10);
    }
}
