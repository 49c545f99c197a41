//! Tick — a single bid/ask quote update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn spread_and_mid() {
        let t = Tick {
            symbol: "EURUSD".into(),
            bid: 1.1000,
            ask: 1.1002,
            time: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
        };
        assert!((t.spread() - 0.0002).abs() < 1e-9);
        assert!((t.mid() - 1.1001).abs() < 1e-9);
    }
}
