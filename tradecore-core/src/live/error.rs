//! Errors surfaced by the live data manager — bridge failures pass through
//! unchanged since there is nothing more specific to say about them here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LiveError>;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("bridge error: {0}")]
    Bridge(#[from] crate::bridge::BridgeError),

    #[error("symbol `{0}` is not subscribed")]
    NotSubscribed(String),
}
