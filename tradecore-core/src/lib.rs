//! TrendLab Core — the trading decision core.
//!
//! - Domain types (bars, ticks, timeframes, content-addressed ids)
//! - A safe expression sub-language shared by indicators, playbooks, and the
//!   backtest replayer
//! - An indicator engine: standard oscillators/overlays plus market-structure
//!   indicators (SMC, order blocks + FVG, Nadaraya-Watson, rolling TPO)
//!
//! - Multi-timeframe alignment, a playbook state machine, a deterministic
//!   backtest replayer, and the performance metrics computed from its output
//!
//! - A bar cache with streaming ingest, tick-to-bar aggregation, and
//!   historical-format parsers, plus a thin broker-bridge contract and the
//!   live data manager that sits between the two and the state machine.

pub mod align;
pub mod backtest;
pub mod barcache;
pub mod bridge;
pub mod domain;
pub mod expr;
pub mod indicators;
pub mod live;
pub mod metrics;
pub mod playbook;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the shared domain and expression types are
    /// Send + Sync, since the playbook engine and backtest replayer are
    /// expected to run indicator precomputation across threads via rayon.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Tick>();
        require_sync::<domain::Tick>();
        require_send::<domain::Timeframe>();
        require_sync::<domain::Timeframe>();
        require_send::<domain::RunId>();
        require_sync::<domain::RunId>();
        require_send::<domain::ContentHash>();
        require_sync::<domain::ContentHash>();

        require_send::<expr::Expr>();
        require_sync::<expr::Expr>();
        require_send::<expr::Condition>();
        require_sync::<expr::Condition>();
        require_send::<expr::AstCache>();
        require_sync::<expr::AstCache>();

        require_send::<indicators::IndicatorCache>();
        require_sync::<indicators::IndicatorCache>();

        require_send::<playbook::Playbook>();
        require_sync::<playbook::Playbook>();
        require_send::<playbook::engine::PlaybookInstance>();
        require_sync::<playbook::engine::PlaybookInstance>();

        require_send::<backtest::BacktestConfig>();
        require_sync::<backtest::BacktestConfig>();
        require_send::<backtest::RunResult>();
        require_sync::<backtest::RunResult>();

        require_send::<metrics::PerformanceMetrics>();
        require_sync::<metrics::PerformanceMetrics>();

        require_send::<barcache::BarCache>();
        require_sync::<barcache::BarCache>();
    }
}
