//! Rolling time-price-opportunity / market profile: point of control and
//! value area high/low over a trailing window of bars.

use std::collections::BTreeMap;

use super::{warmup_bars, Indicator, IndicatorOutput};
use crate::domain::Bar;

const VALUE_AREA_PCT: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct RollingTpo {
    pub window: usize,
    pub bins: usize,
}

impl Default for RollingTpo {
    fn default() -> Self {
        Self {
            window: 100,
            bins: 24,
        }
    }
}

impl Indicator for RollingTpo {
    fn name(&self) -> &str {
        "rolling_tpo"
    }
    fn output_fields(&self) -> &[&str] {
        &["poc", "vah", "val"]
    }
    fn params_fingerprint(&self) -> String {
        format!("window={},bins={}", self.window, self.bins)
    }
    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(self.window, bar_count)
    }
    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let n = bars.len();
        (0..n)
            .map(|i| {
                if i + 1 < self.window {
                    return None;
                }
                let slice = &bars[i + 1 - self.window..=i];
                profile_for(slice, self.bins)
            })
            .collect()
    }
}

fn profile_for(slice: &[Bar], bins: usize) -> Option<IndicatorOutput> {
    let hi = slice.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lo = slice.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if !(hi > lo) || bins == 0 {
        return None;
    }
    let bin_width = (hi - lo) / bins as f64;
    let mut counts = vec![0f64; bins];

    for b in slice {
        let first = bin_index(b.low, lo, bin_width, bins);
        let last = bin_index(b.high, lo, bin_width, bins);
        for bin in first..=last {
            counts[bin] += 1.0;
        }
    }

    let total: f64 = counts.iter().sum();
    let poc_bin = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut included = vec![false; bins];
    included[poc_bin] = true;
    let mut covered = counts[poc_bin];
    let mut low_bin = poc_bin;
    let mut high_bin = poc_bin;

    while covered < total * VALUE_AREA_PCT && (low_bin > 0 || high_bin + 1 < bins) {
        let below = if low_bin > 0 { counts[low_bin - 1] } else { -1.0 };
        let above = if high_bin + 1 < bins {
            counts[high_bin + 1]
        } else {
            -1.0
        };
        if above >= below {
            high_bin += 1;
            covered += counts[high_bin];
            included[high_bin] = true;
        } else {
            low_bin -= 1;
            covered += counts[low_bin];
            included[low_bin] = true;
        }
    }

    let poc = lo + bin_width * (poc_bin as f64 + 0.5);
    let val = lo + bin_width * low_bin as f64;
    let vah = lo + bin_width * (high_bin as f64 + 1.0);

    let mut out = BTreeMap::new();
    out.insert("poc".to_string(), poc);
    out.insert("vah".to_string(), vah);
    out.insert("val".to_string(), val);
    Some(out)
}

fn bin_index(price: f64, lo: f64, bin_width: f64, bins: usize) -> usize {
    (((price - lo) / bin_width) as usize).min(bins - 1)
}
