//! Errors for indicator construction and lookup.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("indicator '{0}' has an invalid period: {1}")]
    InvalidPeriod(String, i64),
    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),
    #[error("indicator '{0}' is already registered")]
    DuplicateRegistration(String),
    #[error("custom indicator '{0}' produced no output for field '{1}'")]
    MissingField(String, String),
}
