//! Order blocks and fair-value gaps.
//!
//! Tracks only the most recent bullish and bearish order block, and the most
//! recent bullish and bearish fair-value gap, each with a small lifecycle.
//! OB state codes: `0` none, `1` active, `2` tested, `3` breaker, `4` reversed.

use std::collections::BTreeMap;

use super::{warmup_bars, Indicator, IndicatorOutput};
use crate::domain::Bar;

const OB_OFFSETS: [usize; 2] = [2, 3];

#[derive(Debug, Clone, Copy)]
struct OrderBlock {
    low: f64,
    high: f64,
    state: f64,
}

#[derive(Debug, Clone, Copy)]
struct FairValueGap {
    low: f64,
    high: f64,
    filled: bool,
}

#[derive(Debug, Clone)]
pub struct OrderBlocksFvg;

impl Default for OrderBlocksFvg {
    fn default() -> Self {
        Self
    }
}

fn is_bearish(b: &Bar) -> bool {
    b.close < b.open
}

fn is_bullish(b: &Bar) -> bool {
    b.close > b.open
}

impl Indicator for OrderBlocksFvg {
    fn name(&self) -> &str {
        "order_blocks_fvg"
    }

    fn output_fields(&self) -> &[&str] {
        &[
            "bullish_ob_low",
            "bullish_ob_high",
            "bullish_ob_state",
            "bearish_ob_low",
            "bearish_ob_high",
            "bearish_ob_state",
            "bullish_fvg_low",
            "bullish_fvg_high",
            "bullish_fvg_filled",
            "bearish_fvg_low",
            "bearish_fvg_high",
            "bearish_fvg_filled",
        ]
    }

    fn params_fingerprint(&self) -> String {
        "default".to_string()
    }

    fn warmup(&self, bar_count: usize) -> usize {
        warmup_bars(20, bar_count)
    }

    fn compute_series(&self, bars: &[Bar]) -> Vec<Option<IndicatorOutput>> {
        let n = bars.len();
        let mut out = vec![None; n];
        let mut bullish_ob: Option<OrderBlock> = None;
        let mut bearish_ob: Option<OrderBlock> = None;
        let mut bullish_fvg: Option<FairValueGap> = None;
        let mut bearish_fvg: Option<FairValueGap> = None;

        for i in 0..n {
            for &offset in &OB_OFFSETS {
                if i < offset {
                    continue;
                }
                let candle = &bars[i - offset];
                if is_bearish(candle) && bars[i].close > candle.high {
                    bullish_ob = Some(OrderBlock {
                        low: candle.low,
                        high: candle.high,
                        state: 1.0,
                    });
                }
                if is_bullish(candle) && bars[i].close < candle.low {
                    bearish_ob = Some(OrderBlock {
                        low: candle.low,
                        high: candle.high,
                        state: 1.0,
                    });
                }
            }

            if i >= 2 {
                let gap_low_bar = &bars[i - 2];
                let current = &bars[i];
                if current.low > gap_low_bar.high {
                    bullish_fvg = Some(FairValueGap {
                        low: gap_low_bar.high,
                        high: current.low,
                        filled: false,
                    });
                }
                if current.high < gap_low_bar.low {
                    bearish_fvg = Some(FairValueGap {
                        low: current.high,
                        high: gap_low_bar.low,
                        filled: false,
                    });
                }
            }

            let price_low = bars[i].low;
            let price_high = bars[i].high;
            let price_close = bars[i].close;

            if let Some(ob) = bullish_ob.as_mut() {
                if price_low <= ob.high && price_low >= ob.low && ob.state == 1.0 {
                    ob.state = 2.0;
                } else if price_close < ob.low && ob.state >= 1.0 {
                    ob.state = if ob.state == 2.0 { 3.0 } else { 4.0 };
                }
            }
            if let Some(ob) = bearish_ob.as_mut() {
                if price_high >= ob.low && price_high <= ob.high && ob.state == 1.0 {
                    ob.state = 2.0;
                } else if price_close > ob.high && ob.state >= 1.0 {
                    ob.state = if ob.state == 2.0 { 3.0 } else { 4.0 };
                }
            }
            if let Some(fvg) = bullish_fvg.as_mut() {
                if price_low <= fvg.high && price_low >= fvg.low {
                    fvg.filled = true;
                }
            }
            if let Some(fvg) = bearish_fvg.as_mut() {
                if price_high >= fvg.low && price_high <= fvg.high {
                    fvg.filled = true;
                }
            }

            if i < self.warmup(n) {
                continue;
            }

            let mut fields = BTreeMap::new();
            let (bl_lo, bl_hi, bl_st) = bullish_ob
                .map(|ob| (ob.low, ob.high, ob.state))
                .unwrap_or((f64::NAN, f64::NAN, 0.0));
            let (be_lo, be_hi, be_st) = bearish_ob
                .map(|ob| (ob.low, ob.high, ob.state))
                .unwrap_or((f64::NAN, f64::NAN, 0.0));
            fields.insert("bullish_ob_low".to_string(), bl_lo);
            fields.insert("bullish_ob_high".to_string(), bl_hi);
            fields.insert("bullish_ob_state".to_string(), bl_st);
            fields.insert("bearish_ob_low".to_string(), be_lo);
            fields.insert("bearish_ob_high".to_string(), be_hi);
            fields.insert("bearish_ob_state".to_string(), be_st);

            let (bf_lo, bf_hi, bf_filled) = bullish_fvg
                .map(|f| (f.low, f.high, f.filled))
                .unwrap_or((f64::NAN, f64::NAN, false));
            let (bef_lo, bef_hi, bef_filled) = bearish_fvg
                .map(|f| (f.low, f.high, f.filled))
                .unwrap_or((f64::NAN, f64::NAN, false));
            fields.insert("bullish_fvg_low".to_string(), bf_lo);
            fields.insert("bullish_fvg_high".to_string(), bf_hi);
            fields.insert("bullish_fvg_filled".to_string(), if bf_filled { 1.0 } else { 0.0 });
            fields.insert("bearish_fvg_low".to_string(), bef_lo);
            fields.insert("bearish_fvg_high".to_string(), bef_hi);
            fields.insert("bearish_fvg_filled".to_string(), if bef_filled { 1.0 } else { 0.0 });

            out[i] = Some(fields);
        }

        out
    }
}
