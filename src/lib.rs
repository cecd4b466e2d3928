//! # Funding Rate Arb
//!
//! Cross-venue perpetual funding rate arbitrage between Binance and
//! Hyperliquid: history collection, funding comparison, backtesting and a
//! paper-trading loop.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Venue connectors (REST + WebSocket) and the paper exchange
//! - `data`: Historical downloads, live collection and CSV datasets
//! - `strategy`: Spread matching, signals, scanning and pair execution
//! - `risk`: Order checks, stop rules and drawdown tracking
//! - `persistence`: SQLite storage for market data and paper state
//! - `backtest`: Spread backtests and parameter sweeps
//! - `trader`: Live paper-trading loop
//! - `notify`: Log and Telegram notifications
//! - `report`: Charts and text summaries
//! - `utils`: Shared decimal and time helpers

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod persistence;
pub mod report;
pub mod risk;
pub mod strategy;
pub mod trader;
pub mod utils;

pub use config::Config;
