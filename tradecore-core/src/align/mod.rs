//! Multi-timeframe alignment.
//!
//! Maps an index on a primary timeframe to the largest index on a secondary
//! timeframe whose open time is less than or equal to the primary bar's open
//! time. The mapping is strictly one-way: a primary bar can only see
//! secondary bars that have already closed by the time it opens, so a
//! playbook referencing an H4 indicator from an M15 phase never sees a
//! partially-formed H4 bar from the future.

use std::collections::HashMap;

use crate::domain::{Bar, Timeframe};

/// Precomputed bars and indicator series for one timeframe, plus a cached
/// index alignment back to the primary timeframe.
pub struct MultiTfEngine {
    primary: Vec<Bar>,
    secondary: HashMap<Timeframe, Vec<Bar>>,
    alignment: HashMap<Timeframe, Vec<Option<usize>>>,
}

impl MultiTfEngine {
    pub fn new(primary: Vec<Bar>) -> Self {
        Self {
            primary,
            secondary: HashMap::new(),
            alignment: HashMap::new(),
        }
    }

    /// Registers a secondary timeframe's bars and precomputes, for every
    /// primary-bar index, the largest secondary index whose open time is
    /// `<=` that primary bar's open time.
    pub fn add_timeframe(&mut self, tf: Timeframe, bars: Vec<Bar>) {
        let alignment = align_indices(&self.primary, &bars);
        self.secondary.insert(tf, bars);
        self.alignment.insert(tf, alignment);
    }

    pub fn primary_bars(&self) -> &[Bar] {
        &self.primary
    }

    pub fn secondary_bars(&self, tf: Timeframe) -> Option<&[Bar]> {
        self.secondary.get(&tf).map(|v| v.as_slice())
    }

    /// The secondary-timeframe bar aligned to `primary_index`, or `None` if
    /// no secondary bar has closed yet at that point.
    pub fn aligned_bar(&self, tf: Timeframe, primary_index: usize) -> Option<&Bar> {
        let idx = *self.alignment.get(&tf)?.get(primary_index)?;
        idx.and_then(|i| self.secondary.get(&tf)?.get(i))
    }

    pub fn aligned_index(&self, tf: Timeframe, primary_index: usize) -> Option<usize> {
        self.alignment.get(&tf)?.get(primary_index).copied().flatten()
    }
}

fn align_indices(primary: &[Bar], secondary: &[Bar]) -> Vec<Option<usize>> {
    let mut out = Vec::with_capacity(primary.len());
    let mut cursor = 0usize;
    for p in primary {
        while cursor + 1 < secondary.len() && secondary[cursor + 1].time <= p.time {
            cursor += 1;
        }
        if !secondary.is_empty() && secondary[cursor].time <= p.time {
            out.push(Some(cursor));
        } else {
            out.push(None);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(symbol: &str, tf: Timeframe, minute: i64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timeframe: tf,
            time: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: 1.0,
            high: 1.001,
            low: 0.999,
            close: 1.0005,
            volume: 10,
        }
    }

    #[test]
    fn aligns_to_last_closed_higher_tf_bar() {
        // M15 bars every 15 minutes; H1 bars every 60 minutes.
        let primary: Vec<Bar> = (0..8).map(|i| bar("EURUSD", Timeframe::M15, i * 15)).collect();
        let secondary: Vec<Bar> = (0..2).map(|i| bar("EURUSD", Timeframe::H1, i * 60)).collect();

        let mut engine = MultiTfEngine::new(primary);
        engine.add_timeframe(Timeframe::H1, secondary);

        // Bars at minute 0..45 should align to the H1 bar opening at minute 0.
        for i in 0..4 {
            assert_eq!(engine.aligned_index(Timeframe::H1, i), Some(0));
        }
        // Bars at minute 60..105 should align to the H1 bar opening at minute 60.
        for i in 4..8 {
            assert_eq!(engine.aligned_index(Timeframe::H1, i), Some(1));
        }
    }

    #[test]
    fn no_alignment_before_any_higher_tf_bar_has_opened() {
        let primary = vec![bar("EURUSD", Timeframe::M15, 0)];
        let secondary = vec![bar("EURUSD", Timeframe::H1, 15)];
        let mut engine = MultiTfEngine::new(primary);
        engine.add_timeframe(Timeframe::H1, secondary);
        assert_eq!(engine.aligned_index(Timeframe::H1, 0), None);
    }

    #[test]
    fn never_reaches_into_the_future() {
        let primary: Vec<Bar> = (0..20).map(|i| bar("EURUSD", Timeframe::M15, i * 15)).collect();
        let secondary: Vec<Bar> = (0..5).map(|i| bar("EURUSD", Timeframe::H1, i * 60)).collect();
        let mut engine = MultiTfEngine::new(primary.clone());
        engine.add_timeframe(Timeframe::H1, secondary.clone());
        for i in 0..primary.len() {
            if let Some(idx) = engine.aligned_index(Timeframe::H1, i) {
                assert!(secondary[idx].time <= primary[i].time);
            }
        }
    }
}
