//! Bar and tick CSV import, and tick-to-bar aggregation.
//!
//! Grounded on `original_source/agent/backtest/import_manager.py`
//! (`_produce_bar_csv`, `_produce_tick_csv`, `_parse_tick_row`) and
//! `agent/api/charting.py`'s `_parse_row`, per SPEC_FULL §4.7/§6.4.

use chrono::NaiveDateTime;
use csv::ReaderBuilder;

use crate::domain::{Bar, Timeframe};

use super::error::{BarCacheError, Result};

/// Which side of the tick to use as the aggregated bar's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMode {
    Bid,
    Ask,
    Mid,
}

impl Default for PriceMode {
    fn default() -> Self {
        PriceMode::Bid
    }
}

const DATE_FORMATS: &[&str] = &["%Y.%m.%d", "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

const TICK_DATETIME_FORMATS: &[&str] = &[
    "%Y.%m.%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

fn clean_field(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '<' || c == '>')
}

fn detect_delimiter(sample_line: &str) -> u8 {
    if sample_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn looks_like_bar_header(fields: &[&str]) -> bool {
    fields
        .iter()
        .take(3)
        .any(|f| matches!(f.to_ascii_lowercase().as_str(), "date" | "time" | "open"))
}

fn looks_like_tick_header(fields: &[&str]) -> bool {
    fields.iter().take(4).any(|f| {
        matches!(
            f.to_ascii_lowercase().as_str(),
            "date" | "time" | "datetime" | "timestamp" | "bid"
        )
    })
}

/// Parse a single cleaned bar CSV row into a `Bar`. Tries combined
/// date+time columns first, then a date-only column.
fn parse_bar_row(fields: &[&str], symbol: &str, timeframe: Timeframe) -> Option<Bar> {
    if fields.len() >= 6 {
        for date_fmt in DATE_FORMATS {
            for time_fmt in TIME_FORMATS {
                let combined = format!("{} {}", fields[0], fields[1]);
                let fmt = format!("{date_fmt} {time_fmt}");
                if let Ok(dt) = NaiveDateTime::parse_from_str(&combined, &fmt) {
                    let o: f64 = fields[2].parse().ok()?;
                    let h: f64 = fields[3].parse().ok()?;
                    let l: f64 = fields[4].parse().ok()?;
                    let c: f64 = fields[5].parse().ok()?;
                    let volume = fields
                        .get(6)
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(0.0) as u64;
                    return Some(Bar {
                        symbol: symbol.to_string(),
                        timeframe,
                        time: dt.and_utc(),
                        open: o,
                        high: h,
                        low: l,
                        close: c,
                        volume,
                    });
                }
            }
        }
    }

    if fields.len() >= 5 {
        for date_fmt in DATE_FORMATS {
            if let Ok(d) = chrono::NaiveDate::parse_from_str(fields[0], date_fmt) {
                let o: f64 = fields[1].parse().ok()?;
                let h: f64 = fields[2].parse().ok()?;
                let l: f64 = fields[3].parse().ok()?;
                let c: f64 = fields[4].parse().ok()?;
                let volume = fields
                    .get(5)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0) as u64;
                let dt = d.and_hms_opt(0, 0, 0)?;
                return Some(Bar {
                    symbol: symbol.to_string(),
                    timeframe,
                    time: dt.and_utc(),
                    open: o,
                    high: h,
                    low: l,
                    close: c,
                    volume,
                });
            }
        }
    }

    None
}

/// Parse a bar CSV (delimiter auto-detected between tab and comma, header
/// row optional) into `Bar`s for the given symbol/timeframe.
pub fn parse_bar_csv(text: &str, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>> {
    let Some(first_line) = text.lines().next() else {
        return Ok(Vec::new());
    };
    let delimiter = detect_delimiter(first_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut bars = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| BarCacheError::CsvParse { row: row_idx, reason: e.to_string() })?;
        let fields: Vec<&str> = record.iter().map(clean_field).collect();

        if row_idx == 0 && looks_like_bar_header(&fields) {
            continue;
        }

        if let Some(bar) = parse_bar_row(&fields, symbol, timeframe) {
            bars.push(bar);
        }
    }

    Ok(bars)
}

/// Parse a single tick CSV row. Returns `(unix_timestamp, price)` where
/// price is selected according to `price_mode`.
fn parse_tick_row(fields: &[&str], price_mode: PriceMode) -> Option<(i64, f64)> {
    if fields.len() < 3 {
        return None;
    }

    let mut ts: Option<i64> = None;
    let mut bid_idx = 1;
    let mut ask_idx = 2;

    if let Ok(val) = fields[0].parse::<f64>() {
        if val > 1e9 {
            ts = Some(val as i64);
        } else if val > 1e6 {
            ts = Some((val / 1000.0) as i64);
        }
    }

    if ts.is_none() {
        for fmt in TICK_DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(fields[0], fmt) {
                ts = Some(dt.and_utc().timestamp());
                break;
            }
        }
    }

    if ts.is_none() && fields.len() >= 4 {
        'outer: for date_fmt in DATE_FORMATS {
            for time_fmt in TIME_FORMATS {
                let combined = format!("{} {}", fields[0], fields[1]);
                let fmt = format!("{date_fmt} {time_fmt}");
                if let Ok(dt) = NaiveDateTime::parse_from_str(&combined, &fmt) {
                    ts = Some(dt.and_utc().timestamp());
                    bid_idx = 2;
                    ask_idx = 3;
                    break 'outer;
                }
            }
        }
    }

    let ts = ts?;
    let bid: f64 = fields.get(bid_idx)?.parse().ok()?;
    let ask: f64 = fields
        .get(ask_idx)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(bid);

    let price = match price_mode {
        PriceMode::Mid => (bid + ask) / 2.0,
        PriceMode::Ask => ask,
        PriceMode::Bid => bid,
    };

    Some((ts, price))
}

/// Parse a tick CSV into `(unix_timestamp, price)` pairs, in file order.
pub fn parse_tick_csv(text: &str, price_mode: PriceMode) -> Result<Vec<(i64, f64)>> {
    let Some(first_line) = text.lines().next() else {
        return Ok(Vec::new());
    };
    let delimiter = detect_delimiter(first_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut ticks = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| BarCacheError::CsvParse { row: row_idx, reason: e.to_string() })?;
        let fields: Vec<&str> = record.iter().map(clean_field).collect();

        if row_idx == 0 && looks_like_tick_header(&fields) {
            continue;
        }

        if let Some(tick) = parse_tick_row(&fields, price_mode) {
            ticks.push(tick);
        }
    }

    Ok(ticks)
}

/// Aggregate a time-ordered stream of `(unix_timestamp, price)` ticks into
/// OHLCV bars. The bar-open timestamp for a tick is
/// `floor(ts / tf_seconds) * tf_seconds`; volume is the count of ticks
/// folded into the bar (the original doesn't carry a real traded-volume
/// figure for tick data either). The final in-progress bucket is flushed at
/// end of input.
pub fn aggregate_ticks_to_bars<I>(ticks: I, symbol: &str, timeframe: Timeframe) -> Vec<Bar>
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let tf_seconds = timeframe.seconds();
    let mut bars = Vec::new();

    let mut current: Option<(i64, f64, f64, f64, f64, u64)> = None; // (bucket, o, h, l, c, vol)

    for (ts, price) in ticks {
        let bucket = (ts.div_euclid(tf_seconds)) * tf_seconds;

        match &mut current {
            Some((cur_bucket, _o, h, l, c, vol)) if *cur_bucket == bucket => {
                if price > *h {
                    *h = price;
                }
                if price < *l {
                    *l = price;
                }
                *c = price;
                *vol += 1;
            }
            _ => {
                if let Some((bucket, o, h, l, c, vol)) = current.take() {
                    bars.push(make_bar(symbol, timeframe, bucket, o, h, l, c, vol));
                }
                current = Some((bucket, price, price, price, price, 1));
            }
        }
    }

    if let Some((bucket, o, h, l, c, vol)) = current {
        bars.push(make_bar(symbol, timeframe, bucket, o, h, l, c, vol));
    }

    bars
}

fn make_bar(
    symbol: &str,
    timeframe: Timeframe,
    bucket_ts: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    volume: u64,
) -> Bar {
    use chrono::{TimeZone, Utc};
    Bar {
        symbol: symbol.to_string(),
        timeframe,
        time: Utc.timestamp_opt(bucket_ts, 0).single().unwrap_or_else(Utc::now),
        open: o,
        high: h,
        low: l,
        close: c,
        volume,
    }
}
