//! Parser for the broker terminal's historical binary bar format ("HST"),
//! grounded on `original_source/agent/backtest/import_manager.py`'s
//! `_produce_hst` and `agent/api/charting.py`'s `_parse_hst_gen` — bit-exact
//! per SPEC_FULL §6.3.
//!
//! Layout: a 148-byte header (version as a little-endian i32 at offset 0, a
//! 12-byte ASCIIZ symbol at offset 68, the period in minutes as a
//! little-endian i32 at offset 80), followed by a fixed-size record stream.
//! Two known versions:
//! - v400: 44-byte records — `<i5d>` (i32 time, 5×f64: open, low, high,
//!   close, volume).
//! - v401: 60-byte records — `<q4dqiq>` (i64 time, 4×f64: open, high, low,
//!   close, i64 volume, i32 spread, i64 real_volume).

use chrono::{TimeZone, Utc};

use crate::domain::{Bar, Timeframe};

use super::error::{BarCacheError, Result};

const HEADER_SIZE: usize = 148;
const VERSION_OFFSET: usize = 0;
const SYMBOL_OFFSET: usize = 68;
const SYMBOL_LEN: usize = 12;
const PERIOD_OFFSET: usize = 80;

const V400_RECORD_SIZE: usize = 44;
const V401_RECORD_SIZE: usize = 60;

/// Header metadata read from the fixed 148-byte prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryHeader {
    pub version: i32,
    /// Symbol embedded in the file, empty if the field was blank.
    pub symbol: String,
    pub timeframe: Option<Timeframe>,
    pub record_size: usize,
}

fn read_i32_le(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_i64_le(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn read_f64_le(buf: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

/// Parse the 148-byte header. `data` must be at least `HEADER_SIZE` bytes.
pub fn parse_header(data: &[u8]) -> Result<BinaryHeader> {
    if data.len() < HEADER_SIZE {
        return Err(BarCacheError::BinaryFileTooSmall(data.len()));
    }

    let version = read_i32_le(data, VERSION_OFFSET);
    let record_size = match version {
        400 => V400_RECORD_SIZE,
        401 => V401_RECORD_SIZE,
        other => return Err(BarCacheError::UnknownBinaryVersion(other)),
    };

    let symbol_bytes = &data[SYMBOL_OFFSET..SYMBOL_OFFSET + SYMBOL_LEN];
    let symbol_end = symbol_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(SYMBOL_LEN);
    let symbol = String::from_utf8_lossy(&symbol_bytes[..symbol_end])
        .trim()
        .to_string();

    let period_minutes = read_i32_le(data, PERIOD_OFFSET);
    let timeframe = Timeframe::from_minutes(period_minutes as i64);

    Ok(BinaryHeader {
        version,
        symbol,
        timeframe,
        record_size,
    })
}

/// Parse one fixed-size record at `offset` into a `Bar`. `symbol` and
/// `timeframe` are the caller's chosen identity (normally taken from the
/// header, falling back to the caller's request when the header's fields are
/// absent/unrecognized).
fn parse_record(
    data: &[u8],
    offset: usize,
    version: i32,
    symbol: &str,
    timeframe: Timeframe,
) -> Bar {
    let (ts, open, high, low, close, volume) = if version == 400 {
        let ts = read_i32_le(data, offset) as i64;
        let open = read_f64_le(data, offset + 4);
        let low = read_f64_le(data, offset + 12);
        let high = read_f64_le(data, offset + 20);
        let close = read_f64_le(data, offset + 28);
        let volume = read_f64_le(data, offset + 36) as u64;
        (ts, open, high, low, close, volume)
    } else {
        let ts = read_i64_le(data, offset);
        let open = read_f64_le(data, offset + 8);
        let high = read_f64_le(data, offset + 16);
        let low = read_f64_le(data, offset + 24);
        let close = read_f64_le(data, offset + 32);
        let volume = read_i64_le(data, offset + 40) as u64;
        (ts, open, high, low, close, volume)
    };

    Bar {
        symbol: symbol.to_string(),
        timeframe,
        time: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
        open,
        high,
        low,
        close,
        volume,
    }
}

/// Parse an entire historical binary buffer, yielding one `Bar` per record.
///
/// `fallback_symbol`/`fallback_timeframe` are used when the header's own
/// symbol field is blank or its period is not one of the eight recognized
/// timeframes — mirroring the original's behavior of trusting the file's
/// embedded identity when present.
pub fn parse_bars(
    data: &[u8],
    fallback_symbol: &str,
    fallback_timeframe: Timeframe,
) -> Result<Vec<Bar>> {
    let header = parse_header(data)?;
    let symbol = if header.symbol.is_empty() {
        fallback_symbol.to_string()
    } else {
        header.symbol.clone()
    };
    let timeframe = header.timeframe.unwrap_or(fallback_timeframe);

    let body = &data[HEADER_SIZE..];
    let count = body.len() / header.record_size;
    let mut bars = Vec::with_capacity(count);

    for i in 0..count {
        let offset = i * header.record_size;
        bars.push(parse_record(body, offset, header.version, &symbol, timeframe));
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: i32, symbol: &str, period_minutes: i32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&version.to_le_bytes());
        let sym_bytes = symbol.as_bytes();
        let n = sym_bytes.len().min(SYMBOL_LEN);
        buf[SYMBOL_OFFSET..SYMBOL_OFFSET + n].copy_from_slice(&sym_bytes[..n]);
        buf[PERIOD_OFFSET..PERIOD_OFFSET + 4].copy_from_slice(&period_minutes.to_le_bytes());
        buf
    }

    fn v400_record(ts: i32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(V400_RECORD_SIZE);
        buf.extend_from_slice(&ts.to_le_bytes());
        buf.extend_from_slice(&open.to_le_bytes());
        buf.extend_from_slice(&low.to_le_bytes());
        buf.extend_from_slice(&high.to_le_bytes());
        buf.extend_from_slice(&close.to_le_bytes());
        buf.extend_from_slice(&volume.to_le_bytes());
        buf
    }

    fn v401_record(
        ts: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
        spread: i32,
        real_volume: i64,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(V401_RECORD_SIZE);
        buf.extend_from_slice(&ts.to_le_bytes());
        buf.extend_from_slice(&open.to_le_bytes());
        buf.extend_from_slice(&high.to_le_bytes());
        buf.extend_from_slice(&low.to_le_bytes());
        buf.extend_from_slice(&close.to_le_bytes());
        buf.extend_from_slice(&volume.to_le_bytes());
        buf.extend_from_slice(&spread.to_le_bytes());
        buf.extend_from_slice(&real_volume.to_le_bytes());
        buf
    }

    #[test]
    fn rejects_a_file_smaller_than_the_header() {
        let buf = vec![0u8; 100];
        assert!(matches!(
            parse_header(&buf),
            Err(BarCacheError::BinaryFileTooSmall(100))
        ));
    }

    #[test]
    fn rejects_an_unknown_version() {
        let buf = header(399, "EURUSD", 15);
        assert!(matches!(
            parse_header(&buf),
            Err(BarCacheError::UnknownBinaryVersion(399))
        ));
    }

    #[test]
    fn parses_header_symbol_and_period() {
        let buf = header(400, "EURUSD", 15);
        let h = parse_header(&buf).unwrap();
        assert_eq!(h.version, 400);
        assert_eq!(h.symbol, "EURUSD");
        assert_eq!(h.timeframe, Some(Timeframe::M15));
        assert_eq!(h.record_size, V400_RECORD_SIZE);
    }

    #[test]
    fn parses_v400_records() {
        let mut buf = header(400, "EURUSD", 60);
        buf.extend(v400_record(1_700_000_000, 1.1000, 1.1020, 1.0990, 1.1010, 500.0));
        buf.extend(v400_record(1_700_003_600, 1.1010, 1.1030, 1.1000, 1.1025, 600.0));

        let bars = parse_bars(&buf, "UNUSED", Timeframe::H1).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].symbol, "EURUSD");
        assert_eq!(bars[0].timeframe, Timeframe::H1);
        assert_eq!(bars[0].open, 1.1000);
        assert_eq!(bars[0].high, 1.1020);
        assert_eq!(bars[0].low, 1.0990);
        assert_eq!(bars[0].close, 1.1010);
        assert_eq!(bars[0].volume, 500);
        assert_eq!(bars[1].volume, 600);
    }

    #[test]
    fn parses_v401_records() {
        let mut buf = header(401, "XAUUSD", 240);
        buf.extend(v401_record(1_700_000_000, 2000.0, 2010.0, 1995.0, 2005.0, 42, 20, 4200));

        let bars = parse_bars(&buf, "UNUSED", Timeframe::H4).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timeframe, Timeframe::H4);
        assert_eq!(bars[0].open, 2000.0);
        assert_eq!(bars[0].high, 2010.0);
        assert_eq!(bars[0].low, 1995.0);
        assert_eq!(bars[0].close, 2005.0);
        assert_eq!(bars[0].volume, 42);
    }

    #[test]
    fn falls_back_to_caller_symbol_and_timeframe_when_header_is_blank() {
        let mut buf = header(400, "", 0);
        buf.extend(v400_record(1_700_000_000, 1.0, 1.0, 1.0, 1.0, 0.0));

        let bars = parse_bars(&buf, "GBPUSD", Timeframe::M30).unwrap();
        assert_eq!(bars[0].symbol, "GBPUSD");
        assert_eq!(bars[0].timeframe, Timeframe::M30);
    }
}
