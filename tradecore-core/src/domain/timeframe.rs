//! Timeframe — the bar period a symbol is sampled at.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A bar period. Ordered coarsest-last for convenience in alignment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    /// Length of one bar in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
        }
    }

    pub fn seconds(self) -> i64 {
        self.minutes() * 60
    }

    /// Parse the broker's period-in-minutes convention (used by the historical
    /// binary format header) into a `Timeframe`.
    pub fn from_minutes(minutes: i64) -> Option<Self> {
        match minutes {
            1 => Some(Timeframe::M1),
            5 => Some(Timeframe::M5),
            15 => Some(Timeframe::M15),
            30 => Some(Timeframe::M30),
            60 => Some(Timeframe::H1),
            240 => Some(Timeframe::H4),
            1440 => Some(Timeframe::D1),
            10080 => Some(Timeframe::W1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Some(Timeframe::M1),
            "M5" => Some(Timeframe::M5),
            "M15" => Some(Timeframe::M15),
            "M30" => Some(Timeframe::M30),
            "H1" => Some(Timeframe::H1),
            "H4" => Some(Timeframe::H4),
            "D1" => Some(Timeframe::D1),
            "W1" => Some(Timeframe::W1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_minutes() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
        ] {
            assert_eq!(Timeframe::from_minutes(tf.minutes()), Some(tf));
        }
    }

    #[test]
    fn ordering_is_coarseness() {
        assert!(Timeframe::M1 < Timeframe::H1);
        assert!(Timeframe::H4 < Timeframe::D1);
    }

    #[test]
    fn parse_case_insensitive() {
        assert_eq!(Timeframe::parse("h4"), Some(Timeframe::H4));
        assert_eq!(Timeframe::parse("bogus"), None);
    }
}
