//! Type definitions for Hyperliquid API responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::types::SpreadDirection;

/// Request type for Hyperliquid info endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InfoRequest {
    /// Get metadata and asset contexts (funding rates, prices, OI).
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs,

    /// Get funding rate history.
    #[serde(rename = "fundingHistory")]
    FundingHistory {
        coin: String,
        #[serde(rename = "startTime")]
        start_time: i64,
        #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
        end_time: Option<i64>,
    },

    /// Get candles for a coin.
    #[serde(rename = "candleSnapshot")]
    CandleSnapshot { req: CandleRequest },

    /// Get margin summary and open positions for a user.
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },
}

/// Body of a `candleSnapshot` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleRequest {
    pub coin: String,
    pub interval: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Response from metaAndAssetCtxs endpoint.
/// Returns a tuple of (Meta, Vec<AssetCtx>).
pub type MetaAndAssetCtxsResponse = (Meta, Vec<AssetCtx>);

/// Universe metadata for perpetuals.
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

/// Metadata for a single asset in the universe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    /// Asset name (e.g., "BTC", "ETH")
    pub name: String,
    /// Size decimal precision
    pub sz_decimals: u8,
    /// Maximum allowed leverage
    pub max_leverage: u8,
    /// Whether only isolated margin is allowed
    #[serde(default)]
    pub only_isolated: bool,
}

/// Real-time context for an asset (prices, funding, volume).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Current funding rate (hourly)
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub funding: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub open_interest: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub prev_day_px: Decimal,
    /// Daily notional volume
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub day_ntl_vlm: Decimal,
    /// Premium over oracle price (null for inactive coins)
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub premium: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub oracle_px: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub mark_px: Decimal,
    /// Mid price (null for inactive coins)
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub mid_px: Option<Decimal>,
}

/// Historical funding rate record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingHistoryRecord {
    pub coin: String,
    /// Hourly funding rate at this timestamp
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub funding_rate: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub premium: Decimal,
    /// Timestamp in milliseconds
    pub time: i64,
}

/// Candle from `candleSnapshot`.
#[derive(Debug, Clone, Deserialize)]
pub struct Candle {
    /// Open time (ms)
    pub t: i64,
    /// Close time (ms)
    #[serde(rename = "T")]
    pub close_time: i64,
    /// Coin
    pub s: String,
    /// Interval
    pub i: String,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub o: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub c: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub h: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub l: Decimal,
    /// Base volume
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub v: Decimal,
    /// Number of trades
    pub n: u64,
}

/// Response from `clearinghouseState`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary: MarginSummary,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub withdrawable: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PerpPosition,
}

/// Open perpetual position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpPosition {
    pub coin: String,
    /// Signed size: positive = long
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub szi: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub entry_px: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub position_value: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub unrealized_pnl: Decimal,
    pub leverage: PositionLeverage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionLeverage {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub account_value: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub total_ntl_pos: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub total_margin_used: Decimal,
}

/// Combined asset data with metadata and context.
#[derive(Debug, Clone)]
pub struct HyperliquidAsset {
    pub name: String,
    pub sz_decimals: u8,
    pub max_leverage: u8,
    /// Current hourly funding rate
    pub funding_rate: Decimal,
    pub open_interest: Decimal,
    pub oracle_price: Decimal,
    pub mark_price: Decimal,
    /// 24h notional volume
    pub volume_24h: Decimal,
    /// Premium over oracle
    pub premium: Decimal,
}

/// Funding rate comparison between Hyperliquid and another venue.
#[derive(Debug, Clone)]
pub struct FundingSpread {
    /// Other venue symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Hyperliquid coin name (e.g., "BTC")
    pub hl_coin: String,
    /// Hyperliquid funding rate (hourly)
    pub hl_funding_hourly: Decimal,
    /// Hyperliquid funding rate scaled to the other venue's period
    pub hl_funding_8h: Decimal,
    /// Other venue funding rate (8h)
    pub other_funding_8h: Decimal,
    /// hl_funding_8h - other_funding_8h
    pub spread_8h: Decimal,
    /// Annualized spread in percent
    pub spread_annualized_pct: Decimal,
    pub recommended_direction: Option<SpreadDirection>,
}

// Custom deserializers for Hyperliquid's string-encoded decimals

fn deserialize_decimal_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Handles both null JSON values and missing fields.
fn deserialize_decimal_str_option_null<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Option<String>> = Option::deserialize(deserializer)?;
    match opt {
        Some(Some(s)) if !s.is_empty() => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_asset_ctx() {
        let json = r#"{
            "funding": "0.00001234",
            "openInterest": "1234567.89",
            "prevDayPx": "50000.0",
            "dayNtlVlm": "999999999.0",
            "premium": null,
            "oraclePx": "50000.0",
            "markPx": "50005.0",
            "midPx": "50002.5",
            "impactPxs": ["50001.0", "50004.0"]
        }"#;

        let ctx: AssetCtx = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.funding, dec!(0.00001234));
        assert_eq!(ctx.mark_px, dec!(50005.0));
        assert_eq!(ctx.premium, None);
    }

    #[test]
    fn test_info_request_serialization() {
        let req = InfoRequest::MetaAndAssetCtxs;
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"metaAndAssetCtxs"}"#);

        let req = InfoRequest::FundingHistory {
            coin: "BTC".to_string(),
            start_time: 1234567890000,
            end_time: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"fundingHistory""#));
        assert!(json.contains(r#""coin":"BTC""#));
        assert!(!json.contains("endTime"));

        let req = InfoRequest::CandleSnapshot {
            req: CandleRequest {
                coin: "ENA".to_string(),
                interval: "1h".to_string(),
                start_time: 1,
                end_time: 2,
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "candleSnapshot");
        assert_eq!(value["req"]["startTime"], 1);
        assert_eq!(value["req"]["interval"], "1h");
    }

    #[test]
    fn test_deserialize_clearinghouse_state() {
        let json = r#"{
            "assetPositions": [{
                "position": {
                    "coin": "ETH",
                    "szi": "-0.5",
                    "entryPx": "2500.0",
                    "positionValue": "1255.0",
                    "unrealizedPnl": "-5.0",
                    "returnOnEquity": "-0.01",
                    "leverage": {"type": "cross", "value": 2},
                    "liquidationPx": null,
                    "marginUsed": "627.5"
                },
                "type": "oneWay"
            }],
            "marginSummary": {
                "accountValue": "10000.0",
                "totalNtlPos": "1255.0",
                "totalRawUsd": "11255.0",
                "totalMarginUsed": "627.5"
            },
            "withdrawable": "9372.5"
        }"#;

        let state: ClearinghouseState = serde_json::from_str(json).unwrap();
        let pos = &state.asset_positions[0].position;
        assert_eq!(pos.szi, dec!(-0.5));
        assert_eq!(pos.entry_px, Some(dec!(2500.0)));
        assert_eq!(pos.leverage.value, 2);
        assert_eq!(state.margin_summary.account_value, dec!(10000.0));
    }
}
