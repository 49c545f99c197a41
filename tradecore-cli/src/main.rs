//! tradecore CLI — playbook linting, single-symbol backtests, and bar
//! import into the Parquet cache.
//!
//! Commands:
//! - `lint` — load a playbook TOML file and validate it against the
//!   built-in indicator registry, the way a playbook loader would before
//!   accepting it for live or backtest use (SPEC_FULL §7).
//! - `backtest` — run a playbook over a bar CSV export and print the
//!   resulting metrics (and optionally the full trade ledger) as JSON.
//! - `import` — parse a bar or tick CSV export, or a historical binary
//!   export, and upsert it into the on-disk bar cache.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use tradecore_core::align::MultiTfEngine;
use tradecore_core::backtest::{run_backtest, BacktestConfig};
use tradecore_core::barcache::{aggregate_ticks_to_bars, parse_bar_csv, parse_binary_bars, parse_tick_csv, BarCache, PriceMode};
use tradecore_core::domain::Timeframe;
use tradecore_core::indicators::IndicatorRegistry;
use tradecore_core::playbook::Playbook;

#[derive(Parser)]
#[command(name = "tradecore", version, about = "Playbook linter and backtest runner for the trading decision core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a playbook TOML file without running anything.
    Lint {
        /// Path to the playbook TOML file.
        playbook: PathBuf,
    },
    /// Run a playbook over a bar CSV export and print the resulting metrics.
    Backtest {
        /// Path to the playbook TOML file.
        playbook: PathBuf,
        /// Path to a bar CSV export for the playbook's primary symbol.
        #[arg(long)]
        bars: PathBuf,
        /// Symbol the bar file covers (overrides the playbook's first symbol).
        #[arg(long)]
        symbol: Option<String>,
        /// Primary timeframe the bar file is sampled at.
        #[arg(long, default_value = "M15")]
        timeframe: String,
        #[arg(long, default_value_t = 1.0)]
        spread_pips: f64,
        #[arg(long, default_value_t = 0.5)]
        slippage_pips: f64,
        #[arg(long, default_value_t = 7.0)]
        commission_per_lot: f64,
        #[arg(long, default_value_t = 10_000.0)]
        starting_balance: f64,
        /// Also print the full trade ledger, not just the metrics.
        #[arg(long)]
        with_trades: bool,
    },
    /// Import a bar/tick CSV export or historical binary export into the
    /// on-disk Parquet bar cache.
    Import {
        /// Path to the source file.
        input: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "M15")]
        timeframe: String,
        #[arg(long, value_enum, default_value_t = SourceFormat::BarCsv)]
        format: SourceFormat,
        /// Directory the Parquet bar cache lives under.
        #[arg(long, default_value = "./bar_cache")]
        cache_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceFormat {
    BarCsv,
    TickCsv,
    Binary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Lint { playbook } => lint(&playbook),
        Command::Backtest {
            playbook,
            bars,
            symbol,
            timeframe,
            spread_pips,
            slippage_pips,
            commission_per_lot,
            starting_balance,
            with_trades,
        } => backtest(
            &playbook,
            &bars,
            symbol,
            &timeframe,
            spread_pips,
            slippage_pips,
            commission_per_lot,
            starting_balance,
            with_trades,
        ),
        Command::Import {
            input,
            symbol,
            timeframe,
            format,
            cache_dir,
        } => import(&input, &symbol, &timeframe, format, &cache_dir),
    }
}

fn load_playbook(path: &PathBuf) -> Result<Playbook> {
    let text = fs::read_to_string(path).with_context(|| format!("reading playbook file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing playbook TOML in {}", path.display()))
}

fn lint(path: &PathBuf) -> Result<()> {
    let playbook = load_playbook(path)?;
    let registry = IndicatorRegistry::new();
    match playbook.validate(&registry) {
        Ok(()) => {
            println!(
                "OK: playbook `{}` ({} phases, {} indicators) is valid",
                playbook.id,
                playbook.phases.len(),
                playbook.indicators.len()
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("playbook `{}` rejected: {e}", playbook.id),
    }
}

#[allow(clippy::too_many_arguments)]
fn backtest(
    playbook_path: &PathBuf,
    bars_path: &PathBuf,
    symbol_override: Option<String>,
    timeframe: &str,
    spread_pips: f64,
    slippage_pips: f64,
    commission_per_lot: f64,
    starting_balance: f64,
    with_trades: bool,
) -> Result<()> {
    let playbook = load_playbook(playbook_path)?;
    let registry = IndicatorRegistry::new();
    playbook
        .validate(&registry)
        .map_err(|e| anyhow::anyhow!("playbook `{}` rejected: {e}", playbook.id))?;

    let tf = Timeframe::parse(timeframe).ok_or_else(|| anyhow::anyhow!("unknown timeframe `{timeframe}`"))?;
    let symbol = symbol_override
        .or_else(|| playbook.symbols.first().cloned())
        .context("no symbol given and the playbook declares none")?;

    let text = fs::read_to_string(bars_path).with_context(|| format!("reading bar file {}", bars_path.display()))?;
    let bars = parse_bar_csv(&text, &symbol, tf).with_context(|| format!("parsing bar CSV {}", bars_path.display()))?;

    let multi_tf = MultiTfEngine::new(bars);
    for ind_cfg in &playbook.indicators {
        if ind_cfg.timeframe != tf {
            anyhow::bail!(
                "playbook indicator `{}` needs timeframe {} but this CLI only loads a single \
                 `--bars` file for {timeframe}; multi-timeframe backtests need a richer runner",
                ind_cfg.id,
                ind_cfg.timeframe
            );
        }
    }

    let config = BacktestConfig {
        symbol,
        timeframe: tf,
        spread_pips,
        slippage_pips,
        commission_per_lot,
        starting_balance,
        warmup_override: None,
    };

    let result = run_backtest(&playbook, &registry, &multi_tf, &config)?;

    if with_trades {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&result.metrics)?);
    }
    Ok(())
}

fn import(input: &PathBuf, symbol: &str, timeframe: &str, format: SourceFormat, cache_dir: &PathBuf) -> Result<()> {
    let tf = Timeframe::parse(timeframe).ok_or_else(|| anyhow::anyhow!("unknown timeframe `{timeframe}`"))?;
    let cache = BarCache::new(cache_dir);

    let count = match format {
        SourceFormat::BarCsv => {
            let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
            let bars = parse_bar_csv(&text, symbol, tf)?;
            cache.upsert_streaming(symbol, tf, bars)?
        }
        SourceFormat::TickCsv => {
            let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
            let ticks = parse_tick_csv(&text, PriceMode::Mid)?;
            let bars = aggregate_ticks_to_bars(ticks, symbol, tf);
            cache.upsert_streaming(symbol, tf, bars)?
        }
        SourceFormat::Binary => {
            let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
            let bars = parse_binary_bars(&bytes, symbol, tf)?;
            cache.upsert_streaming(symbol, tf, bars)?
        }
    };

    println!("imported {count} bars into {}", cache.cache_dir().display());
    Ok(())
}
