//! Bar cache errors: everything that can go wrong persisting, loading, or
//! importing bars, kept separate from the indicator/playbook/backtest error
//! families per the per-module `thiserror` convention.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BarCacheError>;

#[derive(Debug, Error)]
pub enum BarCacheError {
    #[error("no bars to cache")]
    EmptyBatch,

    #[error("failed to create cache directory: {0}")]
    Io(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("cache validation error: {0}")]
    Validation(String),

    #[error("no cached data for {symbol} {timeframe}")]
    NoCachedData { symbol: String, timeframe: String },

    #[error("unrecognized historical binary format version: {0}")]
    UnknownBinaryVersion(i32),

    #[error("historical binary file is too small: {0} bytes")]
    BinaryFileTooSmall(usize),

    #[error("could not parse CSV row {row}: {reason}")]
    CsvParse { row: usize, reason: String },

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
}
