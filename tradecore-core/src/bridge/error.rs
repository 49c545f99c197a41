//! Errors from the broker bridge request/reply channel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge request timed out")]
    Timeout,

    #[error("bridge connection lost")]
    ConnectionLost,

    #[error("bridge rejected the request: {0}")]
    Remote(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),
}
