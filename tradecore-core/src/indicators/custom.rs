//! Pluggable custom indicators.
//!
//! A custom indicator is an ordinary [`Indicator`] plus a small amount of
//! discovery metadata (name, matching keywords) so a playbook author can
//! reference it by name without the engine needing a hardcoded list.

use std::collections::BTreeMap;

use super::{warmup_bars, Indicator, IndicatorOutput};
use crate::domain::Bar;

pub trait CustomIndicator: Indicator {
    /// Keywords a playbook's indicator config can match against to discover
    /// this indicator without knowing its exact registered name.
    fn keywords(&self) -> &[&str];
}

/// Keltner Channel: an EMA basis with ATR-scaled upper/lower bands.
#[derive(Debug, Clone)]
pub struct KeltnerChannel {
    pub period: usize,
    pub atr_period: usize,
    pub multiplier: f64,
}

impl Default for KeltnerChannel {
    fn default() -> Self {
        Self {
            period: 20,
            atr_period: 10,
            multiplier: 2.0,
        }
    }
}

impl Indicator for KeltnerChannel {
    fn name(&self) -> &str {
        "keltner_channel"
    }

    fn output_fields(&self) -> &[&str] {
        &["upper", "basis", "lower"]
    }

    fn params_fingerprint(&self) -> String {
        format!(
            "period={},atr_period={},mult={}",
            self.period, self.atr_period, self.multiplier
        )
    }

    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period.max(self.atr_period), bar_count)
    }

    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let atr = super::standard::Atr {
            period: self.atr_period,
        }
        .compute_series(bars);

        let alpha = 2.0 / (self.period as f64 + 1.0);
        let mut ema_seed = None;
        let mut prev_ema = 0.0;

        (0..closes.len())
            .map(|i| {
                if i + 1 < self.period {
                    return None;
                }
                let basis = if ema_seed.is_none() {
                    let seed =
                        closes[i + 1 - self.period..=i].iter().sum::<f64>() / self.period as f64;
                    ema_seed = Some(seed);
                    prev_ema = seed;
                    seed
                } else {
                    let next = alpha * closes[i] + (1.0 - alpha) * prev_ema;
                    prev_ema = next;
                    next
                };

                let band_width = atr[i].as_ref().map(|m| m["value"]).unwrap_or(0.0);
                let mut out = BTreeMap::new();
                out.insert("basis".to_string(), basis);
                out.insert("upper".to_string(), basis + self.multiplier * band_width);
                out.insert("lower".to_string(), basis - self.multiplier * band_width);
                Some(out)
            })
            .collect()
    }
}

impl CustomIndicator for KeltnerChannel {
    fn keywords(&self) -> &[&str] {
        &["keltner", "kc", "channel"]
    }
}
