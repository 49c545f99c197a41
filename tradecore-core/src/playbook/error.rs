//! Errors raised while loading or validating a playbook.
//!
//! These are configuration errors per the error-handling design: they fail
//! at load time, before any bar is ever evaluated, rather than surfacing
//! mid-run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlaybookError>;

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("playbook has no phases")]
    NoPhases,

    #[error("initial phase `{0}` is not defined")]
    UnknownInitialPhase(String),

    #[error("transition in phase `{from}` targets unknown phase `{to}`")]
    UnknownTransitionTarget { from: String, to: String },

    #[error("timeout in phase `{from}` targets unknown phase `{to}`")]
    UnknownTimeoutTarget { from: String, to: String },

    #[error("on_trade_closed in phase `{from}` targets unknown phase `{to}`")]
    UnknownTradeClosedTarget { from: String, to: String },

    #[error("duplicate indicator id `{0}`")]
    DuplicateIndicatorId(String),

    #[error("indicator `{0}`: {1}")]
    Indicator(String, #[source] crate::indicators::IndicatorError),

    #[error("unknown timeframe string `{0}`")]
    UnknownTimeframe(String),

    #[error("malformed playbook: {0}")]
    Malformed(String),
}
