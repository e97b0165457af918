//! CLI argument definitions for tickrelay.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Fetch latest quotes for one or more symbols |
//! | `history` | Fetch historical OHLCV bars |
//! | `fundamentals` | Fetch a company fundamentals snapshot |
//! | `health` | Probe every configured backend |
//! | `sources` | List backends in trial order with cooldown state |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | TOML file layered over the built-in defaults |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--no-cache` | `false` | Skip the response cache for this run |
//!
//! # Examples
//!
//! ```bash
//! tickrelay quote AAPL MSFT --pretty
//! tickrelay history AAPL --period 3mo --interval 1d
//! RUST_LOG=tickrelay_core=debug tickrelay fundamentals AAPL
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Market data through a prioritized chain of backends with cooldowns and caching.
#[derive(Debug, Parser)]
#[command(
    name = "tickrelay",
    author,
    version,
    about = "Market data with provider fallback and caching",
    long_about = "tickrelay asks several market-data backends in priority order, benches a \
backend that reports a rate limit for a cooldown window, and caches answers per data type.\n\
\n\
Backends: Yahoo Finance (no key), Polygon, Alpha Vantage, Finnhub and Twelve Data \
(enabled when <NAME>_API_KEY is set or a key is configured).\n\
\n\
Use 'tickrelay <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Configuration file (TOML). Environment variables prefixed TICKRELAY__ override it.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Bypass the response cache: neither read nor write cached entries.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch latest quote(s) for one or more symbols.
    ///
    /// # Examples
    ///
    ///   tickrelay quote AAPL
    ///   tickrelay quote AAPL MSFT GOOGL --pretty
    Quote(QuoteArgs),

    /// Fetch historical OHLCV bars.
    ///
    /// # Examples
    ///
    ///   tickrelay history AAPL
    ///   tickrelay history AAPL --period 5d --interval 5m
    History(HistoryArgs),

    /// Fetch a company fundamentals snapshot.
    ///
    /// # Examples
    ///
    ///   tickrelay fundamentals AAPL
    Fundamentals(FundamentalsArgs),

    /// Probe every configured backend concurrently.
    Health,

    /// List configured backends in trial order.
    Sources,
}

/// Arguments for the `quote` command.
#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// One or more market symbols (e.g., AAPL, MSFT, GOOGL).
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,
}

/// Arguments for the `history` command.
#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Market symbol to fetch bars for.
    pub symbol: String,

    /// Lookback window: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, ytd, max.
    #[arg(long, default_value = "1mo")]
    pub period: String,

    /// Bar interval: 1m, 5m, 15m, 30m, 1h, 1d, 1wk, 1mo.
    #[arg(long, default_value = "1d")]
    pub interval: String,
}

/// Arguments for the `fundamentals` command.
#[derive(Debug, Args)]
pub struct FundamentalsArgs {
    /// Market symbol.
    pub symbol: String,
}
