//! Backtesting of the threshold strategy on historical funding spreads.
//!
//! This module provides:
//! - Spread dataset loading (CSV export of a comparison)
//! - Period-by-period simulation engine
//! - Parameter sweep for optimization
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use funding_rate_arb::backtest::{load_spread_records, BacktestConfig, BacktestEngine};
//!
//! let records = load_spread_records("data/historical/spread_ENA.csv")?;
//! let engine = BacktestEngine::from_config(&config);
//! let result = engine.run(&records)?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod engine;
mod metrics;
mod runner;

pub use engine::{BacktestEngine, BacktestResult, ClosedTrade};
pub use metrics::{BacktestMetrics, EquityPoint};
pub use runner::{ParameterSpace, SweepParams, SweepResults, SweepRow, SweepRunner};

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Config;
use crate::data::read_csv;
use crate::strategy::SpreadRecord;

/// Sizing and cost assumptions for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Initial capital for the backtest
    pub initial_balance: Decimal,
    /// Margin per leg; notional per leg is `position_size * leverage`
    pub position_size: Decimal,
    pub leverage: u8,
    /// Taker fee per leg per fill
    pub taker_fee: Decimal,
    /// Slippage per leg per fill
    pub slippage: Decimal,
    /// Hours per funding record (the Binance period)
    pub period_hours: u32,
}

impl BacktestConfig {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.trading;
        Self {
            initial_balance: t.initial_balance,
            position_size: t.position_size,
            leverage: t.leverage,
            taker_fee: t.taker_fee,
            slippage: t.slippage_tolerance,
            period_hours: t.funding_multiplier,
        }
    }

    /// Notional per leg.
    pub fn notional(&self) -> Decimal {
        self.position_size * Decimal::from(self.leverage)
    }

    /// Margin across both legs.
    pub fn margin(&self) -> Decimal {
        Decimal::TWO * self.position_size
    }

    /// Cost of filling both legs once, on entry or on exit.
    pub fn fill_cost(&self) -> Decimal {
        Decimal::TWO * self.notional() * (self.taker_fee + self.slippage)
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Load a spread comparison previously exported with `compare --output`.
pub fn load_spread_records<P: AsRef<Path>>(path: P) -> Result<Vec<SpreadRecord>> {
    let mut records: Vec<SpreadRecord> = read_csv(path)?;
    records.sort_by_key(|r| r.binance_time_ms);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sizing() {
        let config = BacktestConfig {
            initial_balance: dec!(10000),
            position_size: dec!(1000),
            leverage: 3,
            taker_fee: dec!(0.0004),
            slippage: dec!(0.0001),
            period_hours: 8,
        };
        assert_eq!(config.notional(), dec!(3000));
        assert_eq!(config.margin(), dec!(2000));
        // 2 legs * 3000 * 0.0005
        assert_eq!(config.fill_cost(), dec!(3));
    }

    #[test]
    fn test_defaults_follow_trading_config() {
        let config = BacktestConfig::default();
        assert_eq!(config.period_hours, 8);
        assert_eq!(config.leverage, 2);
        assert_eq!(config.initial_balance, dec!(10000));
    }
}
