//! Domain types shared by the indicator engine, playbook state machine, and
//! backtest engine.

pub mod bar;
pub mod ids;
pub mod tick;
pub mod timeframe;

pub use bar::Bar;
pub use ids::{ContentHash, RunId};
pub use tick::Tick;
pub use timeframe::Timeframe;

/// Symbol type alias.
pub type Symbol = String;
