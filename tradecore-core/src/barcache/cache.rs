//! Hive-partitioned Parquet bar cache.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/timeframe={TF}/{year}.parquet`, one
//! file per (symbol, timeframe, year), written atomically (temp file then
//! rename) with a JSON metadata sidecar recording the cached date range, row
//! count, and a BLAKE3 content hash. Grounded on the teacher's
//! `data/cache.rs` `ParquetCache`, extended with the timeframe partition the
//! teacher's daily-bar-only equities cache didn't need.
//!
//! Upserts key on (symbol, timeframe, bar time): writing a bar whose time
//! matches an existing row overwrites its OHLCV, matching §6.2's schema.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Timeframe};

use super::error::{BarCacheError, Result};

const STREAM_BATCH_SIZE: usize = 10_000;

/// Metadata sidecar for a cached (symbol, timeframe) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bar_count: usize,
    pub data_hash: String,
    pub cached_at: DateTime<Utc>,
}

pub struct BarCache {
    cache_dir: PathBuf,
}

impl BarCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn partition_dir(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.cache_dir
            .join(format!("symbol={symbol}"))
            .join(format!("timeframe={timeframe}"))
    }

    fn year_path(&self, symbol: &str, timeframe: Timeframe, year: i32) -> PathBuf {
        self.partition_dir(symbol, timeframe)
            .join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.partition_dir(symbol, timeframe).join("meta.json")
    }

    /// Upsert a batch of bars. Returns the number of bars written.
    pub fn upsert_many(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Err(BarCacheError::EmptyBatch);
        }

        let dir = self.partition_dir(symbol, timeframe);
        fs::create_dir_all(&dir).map_err(|e| BarCacheError::Io(e.to_string()))?;

        let mut by_year: BTreeMap<i32, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            by_year.entry(bar.time.year()).or_default().push(bar);
        }

        for (year, new_bars) in &by_year {
            let path = self.year_path(symbol, timeframe, *year);
            let mut merged: BTreeMap<i64, Bar> = if path.exists() {
                load_year_file(&path)?
                    .into_iter()
                    .map(|b| (b.time.timestamp(), b))
                    .collect()
            } else {
                BTreeMap::new()
            };

            for bar in new_bars {
                merged.insert(bar.time.timestamp(), (*bar).clone());
            }

            let ordered: Vec<Bar> = merged.into_values().collect();
            write_year_file(&path, &ordered)?;
        }

        self.recompute_meta(symbol, timeframe)?;
        Ok(bars.len())
    }

    /// Upsert bars from an iterator, flushing to disk every ~10k bars — used
    /// for large imports that should not hold the whole dataset in memory at
    /// once. Returns the total number of bars written.
    pub fn upsert_streaming<I>(&self, symbol: &str, timeframe: Timeframe, bars: I) -> Result<usize>
    where
        I: IntoIterator<Item = Bar>,
    {
        let mut total = 0usize;
        let mut batch = Vec::with_capacity(STREAM_BATCH_SIZE);

        for bar in bars {
            batch.push(bar);
            if batch.len() >= STREAM_BATCH_SIZE {
                total += self.upsert_many(symbol, timeframe, &batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            total += self.upsert_many(symbol, timeframe, &batch)?;
        }

        Ok(total)
    }

    /// Load every cached bar for (symbol, timeframe), sorted ascending.
    /// Corrupt year files are quarantined (renamed `.quarantined`) and
    /// skipped, matching the teacher's load-time integrity discipline.
    pub fn load_all(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>> {
        let dir = self.partition_dir(symbol, timeframe);
        if !dir.exists() {
            return Err(BarCacheError::NoCachedData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        let mut all_bars = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| BarCacheError::Io(e.to_string()))?;

        for entry in entries {
            let entry = entry.map_err(|e| BarCacheError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_year_file(&path) {
                Ok(bars) => all_bars.extend(bars),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    eprintln!(
                        "WARNING: quarantining corrupt bar cache file {}: {e}",
                        path.display()
                    );
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        if all_bars.is_empty() {
            return Err(BarCacheError::NoCachedData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        all_bars.sort_by_key(|b| b.time);
        Ok(all_bars)
    }

    /// Load the last `n` bars, oldest-first.
    pub fn select_last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>> {
        let mut all = self.load_all(symbol, timeframe)?;
        if all.len() > n {
            all.drain(0..all.len() - n);
        }
        Ok(all)
    }

    /// Load bars whose time falls in `[from, to]` inclusive, oldest-first.
    pub fn select_between(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let all = self.load_all(symbol, timeframe)?;
        Ok(all
            .into_iter()
            .filter(|b| b.time >= from && b.time <= to)
            .collect())
    }

    /// Number of cached bars for (symbol, timeframe), 0 if nothing is cached.
    pub fn count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.get_meta(symbol, timeframe)
            .map(|m| m.bar_count)
            .unwrap_or(0)
    }

    pub fn get_meta(&self, symbol: &str, timeframe: Timeframe) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, timeframe)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn recompute_meta(&self, symbol: &str, timeframe: Timeframe) -> Result<()> {
        let bars = self.load_all(symbol, timeframe)?;
        let hash = blake3::hash(
            &serde_json::to_vec(&bars).map_err(|e| BarCacheError::Validation(e.to_string()))?,
        );
        let meta = CacheMeta {
            symbol: symbol.to_string(),
            timeframe,
            start_time: bars.first().expect("checked non-empty by load_all").time,
            end_time: bars.last().expect("checked non-empty by load_all").time,
            bar_count: bars.len(),
            data_hash: hash.to_hex().to_string(),
            cached_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| BarCacheError::Validation(e.to_string()))?;
        fs::write(self.meta_path(symbol, timeframe), json)
            .map_err(|e| BarCacheError::Io(e.to_string()))?;
        Ok(())
    }
}

fn bars_to_dataframe(symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<DataFrame> {
    let bar_time_unix: Vec<i64> = bars.iter().map(|b| b.time.timestamp()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let fetched_at: Vec<i64> = vec![Utc::now().timestamp(); bars.len()];

    DataFrame::new(vec![
        Column::new("symbol".into(), vec![symbol.to_string(); bars.len()]),
        Column::new("timeframe".into(), vec![timeframe.to_string(); bars.len()]),
        Column::new("bar_time_unix".into(), bar_time_unix),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("fetched_at".into(), fetched_at),
    ])
    .map_err(|e| BarCacheError::Parquet(format!("dataframe creation: {e}")))
}

fn write_year_file(path: &Path, bars: &[Bar]) -> Result<()> {
    if bars.is_empty() {
        return Ok(());
    }
    let symbol = &bars[0].symbol;
    let timeframe = bars[0].timeframe;
    let mut df = bars_to_dataframe(symbol, timeframe, bars)?;

    let tmp_path = path.with_extension("parquet.tmp");
    let file =
        fs::File::create(&tmp_path).map_err(|e| BarCacheError::Parquet(format!("create: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| BarCacheError::Parquet(format!("write: {e}")))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        BarCacheError::Parquet(format!("atomic rename failed: {e}"))
    })
}

fn load_year_file(path: &Path) -> Result<Vec<Bar>> {
    let file =
        fs::File::open(path).map_err(|e| BarCacheError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| BarCacheError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(BarCacheError::Validation("empty parquet file".into()));
    }

    let map_err = |e: PolarsError| BarCacheError::Parquet(format!("column read: {e}"));
    let symbol_col = df.column("symbol").map_err(map_err)?;
    let tf_col = df.column("timeframe").map_err(map_err)?;
    let time_col = df.column("bar_time_unix").map_err(map_err)?;
    let open_col = df.column("open").map_err(map_err)?;
    let high_col = df.column("high").map_err(map_err)?;
    let low_col = df.column("low").map_err(map_err)?;
    let close_col = df.column("close").map_err(map_err)?;
    let vol_col = df.column("volume").map_err(map_err)?;

    let symbol_ca = symbol_col.str().map_err(map_err)?;
    let tf_ca = tf_col.str().map_err(map_err)?;
    let time_ca = time_col.i64().map_err(map_err)?;
    let open_ca = open_col.f64().map_err(map_err)?;
    let high_ca = high_col.f64().map_err(map_err)?;
    let low_ca = low_col.f64().map_err(map_err)?;
    let close_ca = close_col.f64().map_err(map_err)?;
    let vol_ca = vol_col.u64().map_err(map_err)?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let symbol = symbol_ca
            .get(i)
            .ok_or_else(|| BarCacheError::Validation(format!("null symbol at row {i}")))?
            .to_string();
        let tf_str = tf_ca
            .get(i)
            .ok_or_else(|| BarCacheError::Validation(format!("null timeframe at row {i}")))?;
        let timeframe = Timeframe::parse(tf_str)
            .ok_or_else(|| BarCacheError::UnknownTimeframe(tf_str.to_string()))?;
        let ts = time_ca
            .get(i)
            .ok_or_else(|| BarCacheError::Validation(format!("null time at row {i}")))?;
        let time = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| BarCacheError::Validation(format!("invalid timestamp at row {i}")))?;

        bars.push(Bar {
            symbol,
            timeframe,
            time,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_cache_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("tradecore_barcache_test_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn bar(symbol: &str, tf: Timeframe, ts: i64, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timeframe: tf,
            time: Utc.timestamp_opt(ts, 0).single().unwrap(),
            open: close,
            high: close + 0.001,
            low: close - 0.001,
            close,
            volume: 100,
        }
    }

    #[test]
    fn upsert_and_load_roundtrip() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        let bars = vec![
            bar("EURUSD", Timeframe::M15, 1_700_000_000, 1.1000),
            bar("EURUSD", Timeframe::M15, 1_700_000_900, 1.1010),
        ];
        cache.upsert_many("EURUSD", Timeframe::M15, &bars).unwrap();

        let loaded = cache.load_all("EURUSD", Timeframe::M15).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].close, 1.1000);
        assert_eq!(loaded[1].close, 1.1010);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn upsert_overwrites_on_conflicting_bar_time() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        cache
            .upsert_many(
                "EURUSD",
                Timeframe::M15,
                &[bar("EURUSD", Timeframe::M15, 1_700_000_000, 1.1000)],
            )
            .unwrap();
        cache
            .upsert_many(
                "EURUSD",
                Timeframe::M15,
                &[bar("EURUSD", Timeframe::M15, 1_700_000_000, 1.2345)],
            )
            .unwrap();

        let loaded = cache.load_all("EURUSD", Timeframe::M15).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, 1.2345);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn writing_the_same_bar_twice_is_idempotent() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        let bars = vec![bar("EURUSD", Timeframe::M15, 1_700_000_000, 1.1000)];
        cache.upsert_many("EURUSD", Timeframe::M15, &bars).unwrap();
        cache.upsert_many("EURUSD", Timeframe::M15, &bars).unwrap();

        assert_eq!(cache.count("EURUSD", Timeframe::M15), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn select_last_n_returns_oldest_first() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        let bars: Vec<Bar> = (0..10)
            .map(|i| bar("EURUSD", Timeframe::M15, 1_700_000_000 + i * 900, 1.1 + i as f64 * 0.001))
            .collect();
        cache.upsert_many("EURUSD", Timeframe::M15, &bars).unwrap();

        let last3 = cache.select_last_n("EURUSD", Timeframe::M15, 3).unwrap();
        assert_eq!(last3.len(), 3);
        assert!(last3[0].time < last3[1].time);
        assert_eq!(last3[2].time, bars[9].time);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn select_between_is_inclusive() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        let bars: Vec<Bar> = (0..5)
            .map(|i| bar("EURUSD", Timeframe::M15, 1_700_000_000 + i * 900, 1.1))
            .collect();
        cache.upsert_many("EURUSD", Timeframe::M15, &bars).unwrap();

        let from = bars[1].time;
        let to = bars[3].time;
        let range = cache
            .select_between("EURUSD", Timeframe::M15, from, to)
            .unwrap();
        assert_eq!(range.len(), 3);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_nonexistent_symbol_is_an_error() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        assert!(cache.load_all("NONEXISTENT", Timeframe::M15).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn count_is_zero_for_uncached_symbol() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        assert_eq!(cache.count("NONEXISTENT", Timeframe::M15), 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn bars_spanning_multiple_years_partition_correctly() {
        let dir = temp_cache_dir();
        let cache = BarCache::new(&dir);
        let bars = vec![
            bar("EURUSD", Timeframe::D1, 1_672_531_200, 1.05), // 2023-01-01
            bar("EURUSD", Timeframe::D1, 1_704_067_200, 1.10), // 2024-01-01
        ];
        cache.upsert_many("EURUSD", Timeframe::D1, &bars).unwrap();

        assert!(cache.year_path("EURUSD", Timeframe::D1, 2023).exists());
        assert!(cache.year_path("EURUSD", Timeframe::D1, 2024).exists());
        assert_eq!(cache.count("EURUSD", Timeframe::D1), 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
