//! Nadaraya-Watson rational-quadratic kernel regression and its ATR-scaled
//! envelope.

use std::collections::BTreeMap;

use super::standard::true_range_series;
use super::{warmup_bars, Indicator, IndicatorOutput};
use crate::domain::Bar;

fn rq_weight(distance: f64, bandwidth: f64, relative_weight: f64) -> f64 {
    (1.0 + (distance * distance) / (2.0 * relative_weight * bandwidth * bandwidth))
        .powf(-relative_weight)
}

fn rq_kernel_at(closes: &[f64], index: usize, bandwidth: f64, relative_weight: f64, lookback: usize) -> f64 {
    let start = index.saturating_sub(lookback.saturating_sub(1));
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for j in start..=index {
        let distance = (index - j) as f64;
        let w = rq_weight(distance, bandwidth, relative_weight);
        weighted_sum += w * closes[j];
        weight_total += w;
    }
    if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        closes[index]
    }
}

fn rma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < period || period == 0 {
        return out;
    }
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for (i, &v) in values.iter().enumerate().skip(period) {
        let next = (prev * (period as f64 - 1.0) + v) / period as f64;
        out[i] = Some(next);
        prev = next;
    }
    out
}

#[derive(Debug, Clone)]
pub struct NwKernel {
    pub bandwidth: f64,
    pub relative_weight: f64,
    pub lookback: usize,
}

impl Default for NwKernel {
    fn default() -> Self {
        Self {
            bandwidth: 8.0,
            relative_weight: 8.0,
            lookback: 25,
        }
    }
}

impl Indicator for NwKernel {
    fn name(&self) -> &str {
        "nw_kernel"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!(
            "h={},r={},lookback={}",
            self.bandwidth, self.relative_weight, self.lookback
        )
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.lookback, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        (0..closes.len())
            .map(|i| {
                if i < self.warmup(bars.len()) {
                    return None;
                }
                let value = rq_kernel_at(&closes, i, self.bandwidth, self.relative_weight, self.lookback);
                let mut out = BTreeMap::new();
                out.insert("value".to_string(), value);
                Some(out)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NwEnvelope {
    pub bandwidth: f64,
    pub relative_weight: f64,
    pub lookback: usize,
    pub atr_period: usize,
    pub near_mult: f64,
    pub avg_mult: f64,
    pub far_mult: f64,
}

impl Default for NwEnvelope {
    fn default() -> Self {
        Self {
            bandwidth: 8.0,
            relative_weight: 8.0,
            lookback: 25,
            atr_period: 14,
            near_mult: 1.0,
            avg_mult: 2.0,
            far_mult: 3.0,
        }
    }
}

impl Indicator for NwEnvelope {
    fn name(&self) -> &str {
        "nw_envelope"
    }
    fn output_fields(&self) -> &[&str] {
        &[
            "basis",
            "upper_near",
            "lower_near",
            "upper_avg",
            "lower_avg",
            "upper_far",
            "lower_far",
        ]
    }
    fn params_fingerprint(&self) -> String {
        format!(
            "h={},r={},lookback={},atr={}",
            self.bandwidth, self.relative_weight, self.lookback, self.atr_period
        )
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.lookback.max(self.atr_period), bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let tr = true_range_series(bars);
        let atr = rma(&tr, self.atr_period);

        (0..closes.len())
            .map(|i| {
                if i < self.warmup(bars.len()) {
                    return None;
                }
                let basis = rq_kernel_at(&closes, i, self.bandwidth, self.relative_weight, self.lookback);
                let width = atr[i].unwrap_or(0.0);
                let mut out = BTreeMap::new();
                out.insert("basis".to_string(), basis);
                out.insert("upper_near".to_string(), basis + width * self.near_mult);
                out.insert("lower_near".to_string(), basis - width * self.near_mult);
                out.insert("upper_avg".to_string(), basis + width * self.avg_mult);
                out.insert("lower_avg".to_string(), basis - width * self.avg_mult);
                out.insert("upper_far".to_string(), basis + width * self.far_mult);
                out.insert("lower_far".to_string(), basis - width * self.far_mult);
                Some(out)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::domain::Timeframe;

    fn bar(i: usize, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
            open: close,
            high: close + 0.001,
            low: close - 0.001,
            close,
            volume: 100,
        }
    }

    fn flat_bars(n: usize) -> Vec<Bar> {
        (0..n).map(|i| bar(i, 1.1000)).collect()
    }

    #[test]
    fn kernel_regression_matches_flat_price() {
        let bars = flat_bars(60);
        let kernel = NwKernel::default();
        let out = kernel.compute_series(&bars);
        let last = out.last().unwrap().as_ref().unwrap();
        assert!((last["value"] - 1.1000).abs() < 1e-9);
    }

    #[test]
    fn envelope_bands_widen_outward_from_basis() {
        let bars = flat_bars(60);
        let env = NwEnvelope::default();
        let out = env.compute_series(&bars);
        let last = out.last().unwrap().as_ref().unwrap();
        assert!(last["upper_far"] >= last["upper_avg"]);
        assert!(last["upper_avg"] >= last["upper_near"]);
        assert!(last["upper_near"] >= last["basis"]);
        assert!(last["basis"] >= last["lower_near"]);
    }

    #[test]
    fn no_look_ahead() {
        let bars = flat_bars(80);
        let kernel = NwKernel::default();
        let series = kernel.compute_series(&bars);
        for i in [40, 79] {
            assert_eq!(series[i], kernel.compute_at(&bars, i));
        }
    }
}
