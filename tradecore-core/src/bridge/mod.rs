//! The broker bridge contract: a thin request/reply interface the live data
//! manager and trade executor depend on, with no concrete transport
//! implementation in scope (SPEC_FULL §6.1). Grounded on
//! `original_source/agent/bridge.py`'s `ZMQBridge` — the method set mirrors
//! its command surface (`GET_TICK`, `GET_BARS`, `GET_INDICATOR`,
//! `OPEN_ORDER`, `CLOSE_ORDER`, `MODIFY_ORDER`, `GET_POSITIONS`,
//! `GET_ACCOUNT`, `SUBSCRIBE`) one-for-one, translated from the Python
//! original's async request/reply calls into a synchronous trait — this
//! crate has no async runtime dependency, and the out-of-scope bridge
//! process is the one responsible for whatever I/O model backs it.

mod error;

pub use error::{BridgeError, Result};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Timeframe};
use crate::playbook::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickQuote {
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl TickQuote {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderResult {
    pub success: bool,
    pub ticket: Option<u64>,
    pub open_price: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub lot: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub pnl: f64,
    pub open_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub margin_level: Option<f64>,
    pub profit: f64,
}

/// The broker bridge's message schema as a Rust trait. Every method maps to
/// exactly one request/reply command from §6.1; implementations are
/// expected to translate these calls onto whatever transport (ZeroMQ, a
/// named pipe, an HTTP long-poll) the bridge process actually speaks — that
/// translation is out of scope here.
pub trait BrokerBridge: Send + Sync {
    fn get_tick(&self, symbol: &str) -> Result<TickQuote>;

    fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>>;

    /// Delegates indicator computation to the broker terminal itself; used
    /// only when the core chooses not to compute an indicator locally.
    fn get_indicator(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        name: &str,
        params: &HashMap<String, f64>,
        count: usize,
    ) -> Result<HashMap<String, Vec<f64>>>;

    fn open_order(
        &self,
        symbol: &str,
        direction: Direction,
        lot: f64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> Result<OpenOrderResult>;

    fn close_order(&self, ticket: u64) -> Result<()>;

    fn modify_order(&self, ticket: u64, sl: Option<f64>, tp: Option<f64>) -> Result<()>;

    fn get_positions(&self) -> Result<Vec<PositionInfo>>;

    fn get_account(&self) -> Result<AccountInfo>;

    fn subscribe(&self, symbols: &[String]) -> Result<()>;
}
