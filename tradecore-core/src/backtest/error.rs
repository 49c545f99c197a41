//! Backtest configuration and setup errors. These fail before the replay
//! loop runs, per the error-handling design's "backtest failures" category.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("no bars supplied for the primary timeframe")]
    EmptyBars,

    #[error("only {available} bars available, warmup requires at least {required}")]
    NotEnoughBars { available: usize, required: usize },

    #[error("indicator `{0}` is configured on timeframe {1} but no bars were registered for it")]
    MissingTimeframe(String, String),

    #[error("indicator `{0}`: {1}")]
    Indicator(String, #[source] crate::indicators::IndicatorError),
}
