//! Standard oscillators and overlays: RSI, EMA, SMA, MACD, Stochastic,
//! Bollinger Bands, ATR, ADX, CCI, Williams %R.

use std::collections::BTreeMap;

use super::{warmup_bars, Indicator, IndicatorOutput};
use crate::domain::Bar;

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn sma_at(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series (one entry per input value, `None` before `period` values
/// have accumulated). First value is the plain SMA seed, per convention.
fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < period || period == 0 {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for (i, &v) in values.iter().enumerate().skip(period) {
        let next = alpha * v + (1.0 - alpha) * prev;
        out[i] = Some(next);
        prev = next;
    }
    out
}

/// Wilder smoothing: seed with a simple average of the first `period`
/// values, then `next = (prev * (period - 1) + value) / period`.
fn wilder_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
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

fn single(field: &str, value: f64) -> IndicatorOutput {
    let mut m = BTreeMap::new();
    m.insert(field.to_string(), value);
    m
}

// ---------------------------------------------------------------- RSI -----

#[derive(Debug, Clone)]
pub struct Rsi {
    pub period: usize,
}

impl Default for Rsi {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "rsi"
    }

    fn output_fields(&self) -> &[&str] {
        &["value"]
    }

    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }

    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }

    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let n = bars.len();
        let mut out = vec![None; n];
        if n < self.period + 1 {
            return out;
        }
        let c = closes(bars);
        let mut gains = vec![0.0; n];
        let mut losses = vec![0.0; n];
        for i in 1..n {
            let delta = c[i] - c[i - 1];
            if delta > 0.0 {
                gains[i] = delta;
            } else {
                losses[i] = -delta;
            }
        }
        let avg_gain = wilder_series(&gains[1..], self.period);
        let avg_loss = wilder_series(&losses[1..], self.period);
        for i in 0..avg_gain.len() {
            if let (Some(g), Some(l)) = (avg_gain[i], avg_loss[i]) {
                let rsi = if l == 0.0 {
                    100.0
                } else {
                    let rs = g / l;
                    100.0 - 100.0 / (1.0 + rs)
                };
                out[i + 1] = Some(single("value", rsi));
            }
        }
        out
    }
}

// ---------------------------------------------------------------- EMA -----

#[derive(Debug, Clone)]
pub struct Ema {
    pub period: usize,
}

impl Default for Ema {
    fn default() -> Self {
        Self { period: 20 }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        "ema"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        ema_series(&closes(bars), self.period)
            .into_iter()
            .map(|v| v.map(|x| single("value", x)))
            .collect()
    }
}

// ---------------------------------------------------------------- SMA -----

#[derive(Debug, Clone)]
pub struct Sma {
    pub period: usize,
}

impl Default for Sma {
    fn default() -> Self {
        Self { period: 20 }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        "sma"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let c = closes(bars);
        (0..c.len())
            .map(|i| sma_at(&c[..=i], self.period).map(|v| single("value", v)))
            .collect()
    }
}

// --------------------------------------------------------------- MACD -----

#[derive(Debug, Clone)]
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        "macd"
    }
    fn output_fields(&self) -> &[&str] {
        &["macd", "signal", "histogram"]
    }
    fn params_fingerprint(&self) -> String {
        format!("fast={},slow={},signal={}", self.fast, self.slow, self.signal)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.slow + self.signal, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let c = closes(bars);
        let ema_fast = ema_series(&c, self.fast);
        let ema_slow = ema_series(&c, self.slow);
        let macd_line: Vec<Option<f64>> = ema_fast
            .iter()
            .zip(ema_slow.iter())
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();

        // EMA of the MACD line itself, skipping the leading `None`s.
        let first_valid = macd_line.iter().position(|v| v.is_some());
        let mut signal_line = vec![None; macd_line.len()];
        if let Some(start) = first_valid {
            let dense: Vec<f64> = macd_line[start..].iter().map(|v| v.unwrap()).collect();
            let sig = ema_series(&dense, self.signal);
            for (i, v) in sig.into_iter().enumerate() {
                signal_line[start + i] = v;
            }
        }

        macd_line
            .iter()
            .zip(signal_line.iter())
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => {
                    let mut out = BTreeMap::new();
                    out.insert("macd".to_string(), *m);
                    out.insert("signal".to_string(), *s);
                    out.insert("histogram".to_string(), m - s);
                    Some(out)
                }
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------- Stochastic ----

#[derive(Debug, Clone)]
pub struct Stochastic {
    pub k_period: usize,
    pub d_period: usize,
    pub slowing: usize,
}

impl Default for Stochastic {
    fn default() -> Self {
        Self {
            k_period: 5,
            d_period: 3,
            slowing: 3,
        }
    }
}

impl Indicator for Stochastic {
    fn name(&self) -> &str {
        "stochastic"
    }
    fn output_fields(&self) -> &[&str] {
        &["k", "d"]
    }
    fn params_fingerprint(&self) -> String {
        format!("k={},d={},slowing={}", self.k_period, self.d_period, self.slowing)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.k_period + self.d_period + self.slowing, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let n = bars.len();
        let mut raw_k = vec![None; n];
        for i in 0..n {
            if i + 1 < self.k_period {
                continue;
            }
            let window = &bars[i + 1 - self.k_period..=i];
            let hh = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let ll = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let c = bars[i].close;
            raw_k[i] = if hh > ll {
                Some(100.0 * (c - ll) / (hh - ll))
            } else {
                Some(50.0)
            };
        }

        let slow_k = moving_average_option(&raw_k, self.slowing);
        let d = moving_average_option(&slow_k, self.d_period);

        slow_k
            .iter()
            .zip(d.iter())
            .map(|(k, d)| match (k, d) {
                (Some(k), Some(d)) => {
                    let mut out = BTreeMap::new();
                    out.insert("k".to_string(), *k);
                    out.insert("d".to_string(), *d);
                    Some(out)
                }
                _ => None,
            })
            .collect()
    }
}

fn moving_average_option(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in 0..values.len() {
        if i + 1 < period {
            continue;
        }
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_some()) {
            let sum: f64 = window.iter().map(|v| v.unwrap()).sum();
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

// -------------------------------------------------------------- Bollinger -

#[derive(Debug, Clone)]
pub struct Bollinger {
    pub period: usize,
    pub deviations: f64,
}

impl Default for Bollinger {
    fn default() -> Self {
        Self {
            period: 20,
            deviations: 2.0,
        }
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        "bollinger"
    }
    fn output_fields(&self) -> &[&str] {
        &["upper", "middle", "lower"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={},dev={}", self.period, self.deviations)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let c = closes(bars);
        (0..c.len())
            .map(|i| {
                if i + 1 < self.period {
                    return None;
                }
                let window = &c[i + 1 - self.period..=i];
                let mean = window.iter().sum::<f64>() / self.period as f64;
                let variance =
                    window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.period as f64;
                let sd = variance.sqrt();
                let mut out = BTreeMap::new();
                out.insert("upper".to_string(), mean + self.deviations * sd);
                out.insert("middle".to_string(), mean);
                out.insert("lower".to_string(), mean - self.deviations * sd);
                Some(out)
            })
            .collect()
    }
}

// -------------------------------------------------------------------- ATR -

#[derive(Debug, Clone)]
pub struct Atr {
    pub period: usize,
}

impl Default for Atr {
    fn default() -> Self {
        Self { period: 14 }
    }
}

pub(super) fn true_range_series(bars: &[Bar]) -> Vec<f64> {
    let mut out = vec![0.0; bars.len()];
    for i in 0..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let tr = if i == 0 {
            high - low
        } else {
            let prev_close = bars[i - 1].close;
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        };
        out[i] = tr;
    }
    out
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        "atr"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let tr = true_range_series(bars);
        wilder_series(&tr, self.period)
            .into_iter()
            .map(|v| v.map(|x| single("value", x)))
            .collect()
    }
}

// -------------------------------------------------------------------- ADX -

#[derive(Debug, Clone)]
pub struct Adx {
    pub period: usize,
}

impl Default for Adx {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for Adx {
    fn name(&self) -> &str {
        "adx"
    }
    fn output_fields(&self) -> &[&str] {
        &["adx", "plus_di", "minus_di"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period * 2, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let n = bars.len();
        let mut plus_dm = vec![0.0; n];
        let mut minus_dm = vec![0.0; n];
        for i in 1..n {
            let up = bars[i].high - bars[i - 1].high;
            let down = bars[i - 1].low - bars[i].low;
            if up > down && up > 0.0 {
                plus_dm[i] = up;
            }
            if down > up && down > 0.0 {
                minus_dm[i] = down;
            }
        }
        let tr = true_range_series(bars);
        let atr = wilder_series(&tr, self.period);
        let sm_plus = wilder_series(&plus_dm, self.period);
        let sm_minus = wilder_series(&minus_dm, self.period);

        let mut plus_di = vec![None; n];
        let mut minus_di = vec![None; n];
        let mut dx = vec![None; n];
        for i in 0..n {
            if let (Some(atr), Some(p), Some(m)) = (atr[i], sm_plus[i], sm_minus[i]) {
                if atr > 0.0 {
                    let pdi = 100.0 * p / atr;
                    let mdi = 100.0 * m / atr;
                    plus_di[i] = Some(pdi);
                    minus_di[i] = Some(mdi);
                    let denom = pdi + mdi;
                    if denom > 0.0 {
                        dx[i] = Some(100.0 * (pdi - mdi).abs() / denom);
                    }
                }
            }
        }

        let first_dx = dx.iter().position(|v| v.is_some());
        let mut adx = vec![None; n];
        if let Some(start) = first_dx {
            let dense: Vec<f64> = dx[start..]
                .iter()
                .map(|v| v.unwrap_or(0.0))
                .collect();
            let smoothed = wilder_series(&dense, self.period);
            for (i, v) in smoothed.into_iter().enumerate() {
                adx[start + i] = v;
            }
        }

        (0..n)
            .map(|i| match (adx[i], plus_di[i], minus_di[i]) {
                (Some(a), Some(p), Some(m)) => {
                    let mut out = BTreeMap::new();
                    out.insert("adx".to_string(), a);
                    out.insert("plus_di".to_string(), p);
                    out.insert("minus_di".to_string(), m);
                    Some(out)
                }
                _ => None,
            })
            .collect()
    }
}

// -------------------------------------------------------------------- CCI -

#[derive(Debug, Clone)]
pub struct Cci {
    pub period: usize,
}

impl Default for Cci {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for Cci {
    fn name(&self) -> &str {
        "cci"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let tp: Vec<f64> = bars
            .iter()
            .map(|b| (b.high + b.low + b.close) / 3.0)
            .collect();
        (0..tp.len())
            .map(|i| {
                if i + 1 < self.period {
                    return None;
                }
                let window = &tp[i + 1 - self.period..=i];
                let mean = window.iter().sum::<f64>() / self.period as f64;
                let mean_dev =
                    window.iter().map(|v| (v - mean).abs()).sum::<f64>() / self.period as f64;
                let value = if mean_dev > 0.0 {
                    (tp[i] - mean) / (0.015 * mean_dev)
                } else {
                    0.0
                };
                Some(single("value", value))
            })
            .collect()
    }
}

// ----------------------------------------------------------- Williams %R --

#[derive(Debug, Clone)]
pub struct WilliamsR {
    pub period: usize,
}

impl Default for WilliamsR {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for WilliamsR {
    fn name(&self) -> &str {
        "williams_r"
    }
    fn output_fields(&self) -> &[&str] {
        &["value"]
    }
    fn params_fingerprint(&self) -> String {
        format!("period={}", self.period)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.period, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        (0..bars.len())
            .map(|i| {
                if i + 1 < self.period {
                    return None;
                }
                let window = &bars[i + 1 - self.period..=i];
                let hh = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                let ll = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                let value = if hh > ll {
                    -100.0 * (hh - bars[i].close) / (hh - ll)
                } else {
                    -50.0
                };
                Some(single("value", value))
            })
            .collect()
    }
}
