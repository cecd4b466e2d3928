//! Venue-agnostic connector interface.
//!
//! Every perpetuals venue (Binance, Hyperliquid, the paper exchange) exposes
//! the same operations so collectors, the executor and the trader can work
//! against `Arc<dyn ExchangeConnector>` without caring which venue is behind it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{FundingRecord, Kline, KlineInterval, OrderAck, OrderRequest, PositionSnapshot};
use crate::error::ExchangeResult;

/// Venue identifier for multi-venue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Hyperliquid,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Binance => write!(f, "Binance"),
            Venue::Hyperliquid => write!(f, "Hyperliquid"),
        }
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "hyperliquid" => Ok(Venue::Hyperliquid),
            other => anyhow::bail!("Unsupported exchange: {}", other),
        }
    }
}

impl Venue {
    /// Short code for display (2-3 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Binance => "BN",
            Venue::Hyperliquid => "HL",
        }
    }

    /// Lowercase name used in file names and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Hyperliquid => "hyperliquid",
        }
    }
}

/// Operations every venue connector provides.
///
/// Symbols are in the venue's native format ("BTCUSDT" on Binance, "BTC" on
/// Hyperliquid). Timestamps are Unix milliseconds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Current (predicted) funding rate for a symbol, in the venue's native period.
    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Historical funding rates in `[start_ms, end_ms]`, sorted by time.
    async fn get_historical_funding_rates(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<FundingRecord>>;

    /// Historical candles in `[start_ms, end_ms]`, sorted by open time.
    async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<Kline>>;

    /// Current mark price.
    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Place an order.
    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck>;

    /// Current position, `None` when flat.
    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>>;

    /// Close the position with a reduce-only market order, `None` when flat.
    async fn close_position(&self, symbol: &str) -> ExchangeResult<Option<OrderAck>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_display() {
        assert_eq!(Venue::Binance.to_string(), "Binance");
        assert_eq!(Venue::Hyperliquid.short_code(), "HL");
        assert_eq!(Venue::Hyperliquid.as_str(), "hyperliquid");
    }

    #[test]
    fn test_venue_from_str() {
        assert_eq!("BINANCE".parse::<Venue>().unwrap(), Venue::Binance);
        assert_eq!(" hyperliquid ".parse::<Venue>().unwrap(), Venue::Hyperliquid);

        let err = "kraken".parse::<Venue>().unwrap_err();
        assert!(err.to_string().contains("Unsupported exchange"));
    }
}
