//! Normalized types shared by all venue connectors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::traits::Venue;
use crate::error::{ExchangeError, ExchangeResult};

/// A single funding rate observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub venue: Venue,
    /// Symbol in the venue's native format
    pub symbol: String,
    /// Funding time in milliseconds
    pub time_ms: i64,
    /// Rate for the venue's funding period (hourly on Hyperliquid)
    pub rate: Decimal,
    /// Premium component (Hyperliquid only)
    #[serde(default)]
    pub premium: Option<Decimal>,
    /// Mark price at settlement (Binance only, absent on old records)
    #[serde(default)]
    pub mark_price: Option<Decimal>,
}

/// Sort records by time and drop duplicates from overlapping pages.
pub fn normalize_funding_records(mut records: Vec<FundingRecord>) -> Vec<FundingRecord> {
    records.sort_by_key(|r| r.time_ms);
    records.dedup_by_key(|r| r.time_ms);
    records
}

/// Sort candles by open time and drop duplicates from overlapping pages.
pub fn normalize_klines(mut klines: Vec<Kline>) -> Vec<Kline> {
    klines.sort_by_key(|k| k.open_time_ms);
    klines.dedup_by_key(|k| k.open_time_ms);
    klines
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Open time in milliseconds
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Candle interval supported by both venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl KlineInterval {
    /// Interval string as used by both APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::M1 => "1m",
            KlineInterval::M3 => "3m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::M30 => "30m",
            KlineInterval::H1 => "1h",
            KlineInterval::H2 => "2h",
            KlineInterval::H4 => "4h",
            KlineInterval::H6 => "6h",
            KlineInterval::H12 => "12h",
            KlineInterval::D1 => "1d",
            KlineInterval::W1 => "1w",
        }
    }

    /// Interval length in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            KlineInterval::M1 => 1,
            KlineInterval::M3 => 3,
            KlineInterval::M5 => 5,
            KlineInterval::M15 => 15,
            KlineInterval::M30 => 30,
            KlineInterval::H1 => 60,
            KlineInterval::H2 => 120,
            KlineInterval::H4 => 240,
            KlineInterval::H6 => 360,
            KlineInterval::H12 => 720,
            KlineInterval::D1 => 1440,
            KlineInterval::W1 => 10080,
        }
    }

    /// Interval length in milliseconds.
    pub fn millis(&self) -> i64 {
        self.minutes() * 60_000
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = match s {
            "1m" => KlineInterval::M1,
            "3m" => KlineInterval::M3,
            "5m" => KlineInterval::M5,
            "15m" => KlineInterval::M15,
            "30m" => KlineInterval::M30,
            "1h" => KlineInterval::H1,
            "2h" => KlineInterval::H2,
            "4h" => KlineInterval::H4,
            "6h" => KlineInterval::H6,
            "12h" => KlineInterval::H12,
            "1d" => KlineInterval::D1,
            "1w" => KlineInterval::W1,
            other => anyhow::bail!("Unsupported interval: {}", other),
        };
        Ok(interval)
    }
}

/// Direction for funding spread arbitrage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadDirection {
    /// Long on Hyperliquid, short on the other venue
    LongHlShortOther,
    /// Short on Hyperliquid, long on the other venue
    ShortHlLongOther,
}

impl SpreadDirection {
    /// Direction that collects a positive `hl - other` spread, `None` at zero.
    pub fn from_spread(spread: Decimal) -> Option<Self> {
        if spread > Decimal::ZERO {
            Some(SpreadDirection::ShortHlLongOther)
        } else if spread < Decimal::ZERO {
            Some(SpreadDirection::LongHlShortOther)
        } else {
            None
        }
    }

    /// Side of the opening order on Hyperliquid.
    pub fn hyperliquid_side(&self) -> OrderSide {
        match self {
            SpreadDirection::LongHlShortOther => OrderSide::Buy,
            SpreadDirection::ShortHlLongOther => OrderSide::Sell,
        }
    }

    /// Side of the opening order on the other venue.
    pub fn other_side(&self) -> OrderSide {
        self.hyperliquid_side().opposite()
    }

    /// Funding earned per unit notional and unit spread: +1 when short the
    /// higher-paying venue.
    pub fn funding_sign(&self) -> Decimal {
        match self {
            SpreadDirection::ShortHlLongOther => Decimal::ONE,
            SpreadDirection::LongHlShortOther => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadDirection::LongHlShortOther => "long_hl_short_other",
            SpreadDirection::ShortHlLongOther => "short_hl_long_other",
        }
    }
}

impl fmt::Display for SpreadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpreadDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long_hl_short_other" => Ok(SpreadDirection::LongHlShortOther),
            "short_hl_long_other" => Ok(SpreadDirection::ShortHlLongOther),
            other => anyhow::bail!("Unknown spread direction: {}", other),
        }
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// Venue-neutral order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for limit orders
    pub price: Option<Decimal>,
    /// Leverage to set before placing the order
    pub leverage: Option<u8>,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Market order opening or increasing a position.
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            leverage: None,
            reduce_only: false,
        }
    }

    /// Limit order.
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_leverage(mut self, leverage: u8) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Reject malformed requests before they reach a venue.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(ExchangeError::InvalidRequest(
                "limit orders require a price".to_string(),
            )),
            (OrderType::Limit, Some(p)) if p <= Decimal::ZERO => Err(
                ExchangeError::InvalidRequest(format!("price must be positive, got {}", p)),
            ),
            _ => Ok(()),
        }
    }
}

/// Order acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub venue: Venue,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
    /// Fee paid in quote currency (zero when the venue does not report it)
    pub fee: Decimal,
}

/// Open position snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub venue: Venue,
    pub symbol: String,
    /// Signed size: positive = long, negative = short
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u8,
}

impl PositionSnapshot {
    /// Side of an order that would close this position.
    pub fn closing_side(&self) -> OrderSide {
        if self.quantity > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    /// Absolute notional at mark price.
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_interval_parsing() {
        let interval: KlineInterval = "4h".parse().unwrap();
        assert_eq!(interval, KlineInterval::H4);
        assert_eq!(interval.minutes(), 240);
        assert_eq!(KlineInterval::W1.minutes(), 10080);
        assert_eq!(KlineInterval::H1.millis(), 3_600_000);
        assert!("2d".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn test_spread_direction() {
        let short_hl = SpreadDirection::from_spread(dec!(0.0002)).unwrap();
        assert_eq!(short_hl, SpreadDirection::ShortHlLongOther);
        assert_eq!(short_hl.hyperliquid_side(), OrderSide::Sell);
        assert_eq!(short_hl.other_side(), OrderSide::Buy);
        assert_eq!(short_hl.funding_sign(), dec!(1));

        let long_hl = SpreadDirection::from_spread(dec!(-0.0002)).unwrap();
        assert_eq!(long_hl, SpreadDirection::LongHlShortOther);
        assert_eq!(long_hl.funding_sign(), dec!(-1));

        assert_eq!(SpreadDirection::from_spread(Decimal::ZERO), None);
        assert_eq!(
            "long_hl_short_other".parse::<SpreadDirection>().unwrap(),
            SpreadDirection::LongHlShortOther
        );
    }

    #[test]
    fn test_normalize_funding_records() {
        let record = |t: i64| FundingRecord {
            venue: Venue::Hyperliquid,
            symbol: "BTC".to_string(),
            time_ms: t,
            rate: dec!(0.0000125),
            premium: None,
            mark_price: None,
        };
        let records = normalize_funding_records(vec![record(3), record(1), record(3), record(2)]);
        let times: Vec<i64> = records.iter().map(|r| r.time_ms).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_order_validation() {
        assert!(OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01))
            .validate()
            .is_ok());
        assert!(OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0))
            .validate()
            .is_err());

        let mut limit = OrderRequest::limit("BTCUSDT", OrderSide::Sell, dec!(1), dec!(50000));
        assert!(limit.validate().is_ok());
        limit.price = None;
        assert!(matches!(
            limit.validate(),
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_position_closing_side() {
        let pos = PositionSnapshot {
            venue: Venue::Binance,
            symbol: "ETHUSDT".to_string(),
            quantity: dec!(-2),
            entry_price: dec!(3000),
            mark_price: dec!(3100),
            unrealized_pnl: dec!(-200),
            leverage: 2,
        };
        assert_eq!(pos.closing_side(), OrderSide::Buy);
        assert_eq!(pos.notional(), dec!(6200));
    }
}
