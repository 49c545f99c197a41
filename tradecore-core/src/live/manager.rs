//! The live data manager (SPEC_FULL §4.8).
//!
//! Holds per-(symbol, timeframe) ring buffers of the last K bars, the latest
//! tick per symbol, and a cache of indicator outputs keyed by
//! (symbol, timeframe, indicator id). On every incoming tick it asks the
//! bridge for the last two bars of each subscribed timeframe; a new opening
//! time past what's stored is a bar close, which appends to the ring buffer,
//! refreshes that timeframe's indicators, and is reported back to the
//! caller as a [`BarCloseEvent`] — there is no callback registry here since
//! the crate has no async runtime, so "fire bar-close callbacks" becomes
//! "return the events that happened this tick" and the caller (state
//! machine dispatch, in `playbook::engine`) drives them.
//!
//! Grounded on `original_source/agent/data_manager.py`'s `DataManager`.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bridge::{BrokerBridge, TickQuote};
use crate::domain::{Bar, Timeframe};
use crate::indicators::{IndicatorOutput, IndicatorRegistry};
use crate::playbook::IndicatorConfig;

use super::error::{LiveError, Result};

/// Ring-buffer capacity per (symbol, timeframe) unless overridden.
pub const DEFAULT_RING_CAPACITY: usize = 200;

/// One bar closing, with every indicator configured on its timeframe
/// refreshed against the updated buffer.
#[derive(Debug, Clone)]
pub struct BarCloseEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
    pub indicators: HashMap<String, IndicatorOutput>,
}

/// Bounded history for one (symbol, timeframe): oldest-first, capped at
/// `capacity` by dropping from the front.
struct RingBuffer {
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, bar: Bar) {
        if self.bars.len() >= self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    fn last_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.bars.back().map(|b| b.time)
    }

    fn as_vec(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }
}

/// Owns ring buffers, the latest tick per symbol, and a cached indicator
/// snapshot. Not `Send`/`Sync` by itself beyond its fields' own bounds —
/// callers needing concurrent access wrap it the way the rest of the crate
/// wraps shared mutable state (a single-writer lock per §5).
pub struct LiveDataManager<'a> {
    bridge: &'a dyn BrokerBridge,
    registry: &'a IndicatorRegistry,
    ring_capacity: usize,
    subscriptions: HashMap<String, Vec<Timeframe>>,
    buffers: HashMap<(String, Timeframe), RingBuffer>,
    latest_tick: HashMap<String, TickQuote>,
    indicator_configs: HashMap<String, Vec<IndicatorConfig>>,
    indicator_cache: HashMap<(String, Timeframe, String), IndicatorOutput>,
    /// (symbol, timeframe) pairs whose first bar-close detection since
    /// subscribing has not yet been suppressed.
    awaiting_first_close: HashSet<(String, Timeframe)>,
}

impl<'a> LiveDataManager<'a> {
    pub fn new(bridge: &'a dyn BrokerBridge, registry: &'a IndicatorRegistry) -> Self {
        Self::with_ring_capacity(bridge, registry, DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(bridge: &'a dyn BrokerBridge, registry: &'a IndicatorRegistry, ring_capacity: usize) -> Self {
        Self {
            bridge,
            registry,
            ring_capacity,
            subscriptions: HashMap::new(),
            buffers: HashMap::new(),
            latest_tick: HashMap::new(),
            indicator_configs: HashMap::new(),
            indicator_cache: HashMap::new(),
            awaiting_first_close: HashSet::new(),
        }
    }

    /// Subscribes to `symbol` on every listed timeframe: tells the bridge,
    /// then seeds each ring buffer from its initial bar history. The first
    /// bar-close detection for each (symbol, timeframe) pair afterwards is
    /// suppressed, since it would otherwise just report the seeded state.
    pub fn subscribe(&mut self, symbol: &str, timeframes: &[Timeframe]) -> Result<()> {
        self.bridge.subscribe(std::slice::from_ref(&symbol.to_string()))?;
        self.subscriptions
            .entry(symbol.to_string())
            .or_default()
            .extend(timeframes.iter().copied());
        self.subscriptions.get_mut(symbol).unwrap().sort();
        self.subscriptions.get_mut(symbol).unwrap().dedup();

        for &tf in timeframes {
            let key = (symbol.to_string(), tf);
            let buffer = self.buffers.entry(key.clone()).or_insert_with(|| RingBuffer::new(self.ring_capacity));
            let seed = self.bridge.get_bars(symbol, tf, self.ring_capacity)?;
            for bar in seed {
                buffer.push(bar);
            }
            self.awaiting_first_close.insert(key);
        }
        Ok(())
    }

    /// Registers the indicator configuration to refresh for `symbol` on each
    /// bar close — mirrors the indicator list a loaded playbook carries for
    /// that symbol.
    pub fn register_indicators(&mut self, symbol: &str, configs: Vec<IndicatorConfig>) {
        self.indicator_configs.insert(symbol.to_string(), configs);
    }

    pub fn latest_tick(&self, symbol: &str) -> Option<&TickQuote> {
        self.latest_tick.get(symbol)
    }

    pub fn bars(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        self.buffers
            .get(&(symbol.to_string(), timeframe))
            .map(RingBuffer::as_vec)
            .unwrap_or_default()
    }

    pub fn indicator_output(&self, symbol: &str, timeframe: Timeframe, indicator_id: &str) -> Option<&IndicatorOutput> {
        self.indicator_cache
            .get(&(symbol.to_string(), timeframe, indicator_id.to_string()))
    }

    /// Processes one incoming tick: updates the tick cache, then checks
    /// every subscribed timeframe for `symbol` for a bar close. Returns the
    /// events produced (zero, one, or more than one if several timeframes
    /// closed on the same tick).
    pub fn on_tick(&mut self, tick: TickQuote, symbol: &str) -> Result<Vec<BarCloseEvent>> {
        self.latest_tick.insert(symbol.to_string(), tick);

        let timeframes = self
            .subscriptions
            .get(symbol)
            .cloned()
            .ok_or_else(|| LiveError::NotSubscribed(symbol.to_string()))?;

        let mut events = Vec::new();
        for tf in timeframes {
            if let Some(event) = self.poll_timeframe(symbol, tf)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn poll_timeframe(&mut self, symbol: &str, tf: Timeframe) -> Result<Option<BarCloseEvent>> {
        let recent = self.bridge.get_bars(symbol, tf, 2)?;
        let Some(newest) = recent.last() else {
            return Ok(None);
        };

        let key = (symbol.to_string(), tf);
        let stored_last_time = self.buffers.get(&key).and_then(RingBuffer::last_time);
        let is_new = stored_last_time.map(|t| newest.time > t).unwrap_or(true);
        if !is_new {
            return Ok(None);
        }

        let buffer = self.buffers.entry(key.clone()).or_insert_with(|| RingBuffer::new(self.ring_capacity));
        buffer.push(newest.clone());

        if self.awaiting_first_close.remove(&key) {
            return Ok(None);
        }

        let indicators = self.refresh_indicators(symbol, tf);
        Ok(Some(BarCloseEvent {
            symbol: symbol.to_string(),
            timeframe: tf,
            bar: newest.clone(),
            indicators,
        }))
    }

    fn refresh_indicators(&mut self, symbol: &str, tf: Timeframe) -> HashMap<String, IndicatorOutput> {
        let Some(configs) = self.indicator_configs.get(symbol) else {
            return HashMap::new();
        };
        let bars = self.buffers.get(&(symbol.to_string(), tf)).map(RingBuffer::as_vec).unwrap_or_default();
        if bars.is_empty() {
            return HashMap::new();
        }

        let mut out = HashMap::new();
        for cfg in configs.iter().filter(|c| c.timeframe == tf) {
            let Ok(indicator) = self.registry.get(&cfg.name) else {
                continue;
            };
            if let Some(output) = indicator.compute_at(&bars, bars.len() - 1) {
                self.indicator_cache
                    .insert((symbol.to_string(), tf, cfg.id.clone()), output.clone());
                out.insert(cfg.id.clone(), output);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::NullBridge;
    use crate::domain::Timeframe;
    use chrono::{DateTime, TimeZone, Utc};

    fn bar(t: DateTime<Utc>, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            time: t,
            open: close,
            high: close + 0.001,
            low: close - 0.001,
            close,
            volume: 100,
        }
    }

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).single().unwrap()
    }

    #[test]
    fn subscribing_seeds_the_ring_buffer() {
        let bridge = NullBridge::new().with_bars("EURUSD", Timeframe::M15, vec![bar(ts(0), 1.1), bar(ts(900), 1.101)]);
        let registry = IndicatorRegistry::new();
        let mut mgr = LiveDataManager::new(&bridge, &registry);
        mgr.subscribe("EURUSD", &[Timeframe::M15]).unwrap();
        assert_eq!(mgr.bars("EURUSD", Timeframe::M15).len(), 2);
    }

    #[test]
    fn first_close_detection_after_subscribe_is_suppressed() {
        let bridge = NullBridge::new().with_bars("EURUSD", Timeframe::M15, vec![bar(ts(0), 1.1), bar(ts(900), 1.101)]);
        let registry = IndicatorRegistry::new();
        let mut mgr = LiveDataManager::new(&bridge, &registry);
        mgr.subscribe("EURUSD", &[Timeframe::M15]).unwrap();

        let tick = TickQuote {
            bid: 1.1010,
            ask: 1.1012,
            timestamp: ts(950),
        };
        let events = mgr.on_tick(tick, "EURUSD").unwrap();
        assert!(events.is_empty(), "the pre-existing last bar must not be reported as a fresh close");
    }

    #[test]
    fn a_genuinely_new_bar_fires_one_event() {
        let bridge = NullBridge::new().with_bars("EURUSD", Timeframe::M15, vec![bar(ts(0), 1.1), bar(ts(900), 1.101)]);
        let registry = IndicatorRegistry::new();
        let mut mgr = LiveDataManager::new(&bridge, &registry);
        mgr.subscribe("EURUSD", &[Timeframe::M15]).unwrap();

        // First tick just observes the already-seeded state.
        mgr.on_tick(
            TickQuote {
                bid: 1.1010,
                ask: 1.1012,
                timestamp: ts(950),
            },
            "EURUSD",
        )
        .unwrap();

        bridge.push_bar("EURUSD", Timeframe::M15, bar(ts(1800), 1.102));
        let events = mgr
            .on_tick(
                TickQuote {
                    bid: 1.1020,
                    ask: 1.1022,
                    timestamp: ts(1850),
                },
                "EURUSD",
            )
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bar.time, ts(1800));
        assert_eq!(mgr.bars("EURUSD", Timeframe::M15).len(), 3);
    }

    #[test]
    fn tick_for_unsubscribed_symbol_is_an_error() {
        let bridge = NullBridge::new();
        let registry = IndicatorRegistry::new();
        let mut mgr = LiveDataManager::new(&bridge, &registry);
        let tick = TickQuote {
            bid: 1.0,
            ask: 1.0001,
            timestamp: ts(0),
        };
        assert!(matches!(mgr.on_tick(tick, "GBPUSD"), Err(LiveError::NotSubscribed(_))));
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let mut bars = vec![bar(ts(0), 1.1)];
        for i in 1..5 {
            bars.push(bar(ts(i * 900), 1.1 + i as f64 * 0.001));
        }
        let bridge = NullBridge::new().with_bars("EURUSD", Timeframe::M15, bars);
        let registry = IndicatorRegistry::new();
        let mut mgr = LiveDataManager::with_ring_capacity(&bridge, &registry, 3);
        mgr.subscribe("EURUSD", &[Timeframe::M15]).unwrap();
        assert_eq!(mgr.bars("EURUSD", Timeframe::M15).len(), 3);
    }
}
