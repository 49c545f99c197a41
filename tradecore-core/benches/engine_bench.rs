use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};

use tradecore_core::domain::{Bar, Timeframe};
use tradecore_core::indicators::{Indicator, Rsi, SmcStructure};

fn synthetic_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let base = 1.10 + (i as f64 / 50.0).sin() * 0.01 + i as f64 * 0.00002;
            Bar {
                symbol: "EURUSD".to_string(),
                timeframe: Timeframe::M15,
                time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
                open: base,
                high: base + 0.0015,
                low: base - 0.0015,
                close: base + 0.0003,
                volume: 500,
            }
        })
        .collect()
}

fn bench_rsi_full_series(c: &mut Criterion) {
    let bars = synthetic_bars(5_000);
    let rsi = Rsi::default();
    c.bench_function("rsi_full_series_5k_bars", |b| {
        b.iter(|| rsi.compute_series(&bars))
    });
}

fn bench_smc_full_series(c: &mut Criterion) {
    let bars = synthetic_bars(5_000);
    let smc = SmcStructure::default();
    c.bench_function("smc_structure_full_series_5k_bars", |b| {
        b.iter(|| smc.compute_series(&bars))
    });
}

criterion_group!(benches, bench_rsi_full_series, bench_smc_full_series);
criterion_main!(benches);
