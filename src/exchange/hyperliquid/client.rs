//! Hyperliquid REST API client.
//!
//! Provides access to Hyperliquid perpetuals through the `/info` endpoint:
//! - Funding rates (hourly) and funding history
//! - Asset prices (mark, oracle) and candles
//! - Open positions for a configured wallet

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::types::*;
use crate::config::HyperliquidConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::rate_limit::{RequestPacer, RetryPolicy, PAGE_PAUSE};
use crate::exchange::types::{
    normalize_funding_records, normalize_klines, FundingRecord, Kline, KlineInterval, OrderAck,
    OrderRequest, PositionSnapshot, SpreadDirection,
};
use crate::exchange::{ExchangeConnector, Venue};
use crate::utils::annualized_pct;

/// Base URL for Hyperliquid mainnet API.
const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";
const TESTNET_API_URL: &str = "https://api.hyperliquid-testnet.xyz";

/// `fundingHistory` returns at most this many records per call.
const FUNDING_PAGE_LIMIT: usize = 500;
/// `candleSnapshot` returns at most this many candles per call.
const CANDLE_PAGE_LIMIT: usize = 5000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Hours in the reference funding period used for cross-venue spreads.
const REFERENCE_PERIOD_HOURS: u32 = 8;

/// Hyperliquid API client.
#[derive(Debug)]
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
    wallet_address: Option<String>,
    pacer: RequestPacer,
    retry: RetryPolicy,
    page_pause: Duration,
}

impl HyperliquidClient {
    /// Create a new Hyperliquid client from configuration.
    pub fn new(config: &HyperliquidConfig) -> anyhow::Result<Self> {
        let base_url = if config.testnet {
            TESTNET_API_URL
        } else {
            MAINNET_API_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a new Hyperliquid client with a custom base URL.
    pub fn with_base_url(config: &HyperliquidConfig, base_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet_address: config.wallet_address.clone(),
            pacer: RequestPacer::per_minute(config.requests_per_minute),
            retry: RetryPolicy::new(config.max_retries),
            page_pause: PAGE_PAUSE,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    async fn post_info_once<T: DeserializeOwned>(&self, request: &InfoRequest) -> ExchangeResult<T> {
        self.pacer.acquire().await;

        let url = format!("{}/info", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited {
                venue: Venue::Hyperliquid,
                retry_after: None,
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Api {
                venue: Venue::Hyperliquid,
                status: status.as_u16(),
                code: None,
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|source| ExchangeError::Decode {
            context: format!("Hyperliquid {:?}", request),
            source,
        })
    }

    /// POST to `/info`, retrying transient failures.
    async fn post_info<T: DeserializeOwned>(&self, request: InfoRequest) -> ExchangeResult<T> {
        let request = &request;
        self.retry
            .run(Venue::Hyperliquid, "info", || self.post_info_once(request))
            .await
    }

    /// Get metadata and asset contexts for all perpetuals.
    #[instrument(skip(self), name = "hl_meta_and_asset_ctxs")]
    pub async fn get_meta_and_asset_ctxs(&self) -> ExchangeResult<MetaAndAssetCtxsResponse> {
        let data: MetaAndAssetCtxsResponse = self.post_info(InfoRequest::MetaAndAssetCtxs).await?;
        debug!("Fetched {} assets from Hyperliquid", data.0.universe.len());
        Ok(data)
    }

    /// Get all assets with their current market data.
    #[instrument(skip(self), name = "hl_get_assets")]
    pub async fn get_assets(&self) -> ExchangeResult<Vec<HyperliquidAsset>> {
        let (meta, ctxs) = self.get_meta_and_asset_ctxs().await?;

        if meta.universe.len() != ctxs.len() {
            return Err(ExchangeError::Malformed {
                venue: Venue::Hyperliquid,
                message: format!(
                    "universe has {} assets but {} contexts",
                    meta.universe.len(),
                    ctxs.len()
                ),
            });
        }

        let assets: Vec<HyperliquidAsset> = meta
            .universe
            .into_iter()
            .zip(ctxs)
            .map(|(m, c)| HyperliquidAsset {
                name: m.name,
                sz_decimals: m.sz_decimals,
                max_leverage: m.max_leverage,
                funding_rate: c.funding,
                open_interest: c.open_interest,
                oracle_price: c.oracle_px,
                mark_price: c.mark_px,
                volume_24h: c.day_ntl_vlm,
                premium: c.premium.unwrap_or_default(),
            })
            .collect();

        debug!("Fetched {} Hyperliquid perpetual assets", assets.len());
        Ok(assets)
    }

    /// Current market data for one coin.
    pub async fn get_asset(&self, coin: &str) -> ExchangeResult<HyperliquidAsset> {
        self.get_assets()
            .await?
            .into_iter()
            .find(|a| a.name == coin)
            .ok_or_else(|| ExchangeError::InvalidRequest(format!("Unknown Hyperliquid coin: {}", coin)))
    }

    /// Funding history for a coin, paginated in pages of up to 500 records.
    ///
    /// An empty page moves the cursor forward one day. A full page moves it
    /// past the last record; a short page ends pagination.
    #[instrument(skip(self), name = "hl_get_funding_history")]
    pub async fn get_funding_history(
        &self,
        coin: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<FundingRecord>> {
        let mut records = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let page: Vec<FundingHistoryRecord> = self
                .post_info(InfoRequest::FundingHistory {
                    coin: coin.to_string(),
                    start_time: cursor,
                    end_time: Some(end_ms),
                })
                .await?;

            let Some(last_time) = page.last().map(|r| r.time) else {
                debug!(coin, cursor, "No Hyperliquid funding data, moving forward by 1 day");
                cursor += DAY_MS;
                tokio::time::sleep(self.page_pause).await;
                continue;
            };

            let page_len = page.len();
            records.extend(page.into_iter().map(|r| FundingRecord {
                venue: Venue::Hyperliquid,
                symbol: r.coin,
                time_ms: r.time,
                rate: r.funding_rate,
                premium: Some(r.premium),
                mark_price: None,
            }));

            if page_len < FUNDING_PAGE_LIMIT {
                break;
            }
            cursor = last_time + 1;
            tokio::time::sleep(self.page_pause).await;
        }

        let records = normalize_funding_records(records);
        info!(coin, count = records.len(), "Fetched Hyperliquid funding history");
        Ok(records)
    }

    /// Candles for a coin, paginated in pages of up to 5000.
    #[instrument(skip(self), name = "hl_get_candles")]
    pub async fn get_candles(
        &self,
        coin: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<Kline>> {
        let mut klines = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let page: Vec<Candle> = self
                .post_info(InfoRequest::CandleSnapshot {
                    req: CandleRequest {
                        coin: coin.to_string(),
                        interval: interval.as_str().to_string(),
                        start_time: cursor,
                        end_time: end_ms,
                    },
                })
                .await?;

            let Some(last_open) = page.last().map(|c| c.t) else {
                break;
            };

            let page_len = page.len();
            klines.extend(page.into_iter().map(|c| Kline {
                open_time_ms: c.t,
                open: c.o,
                high: c.h,
                low: c.l,
                close: c.c,
                volume: c.v,
            }));

            if page_len < CANDLE_PAGE_LIMIT {
                break;
            }
            cursor = last_open + interval.millis();
            tokio::time::sleep(self.page_pause).await;
        }

        let klines = normalize_klines(klines);
        debug!(coin, count = klines.len(), "Fetched Hyperliquid candles");
        Ok(klines)
    }

    /// Margin summary and positions for the configured wallet.
    #[instrument(skip(self), name = "hl_clearinghouse_state")]
    pub async fn get_clearinghouse_state(&self) -> ExchangeResult<ClearinghouseState> {
        let user = self.wallet_address.clone().ok_or_else(|| {
            ExchangeError::InvalidRequest(
                "exchanges.hyperliquid.wallet_address is not configured".to_string(),
            )
        })?;
        self.post_info(InfoRequest::ClearinghouseState { user }).await
    }

    /// Calculate funding spread between Hyperliquid and another venue.
    ///
    /// # Arguments
    /// * `hl_assets` - Hyperliquid asset data
    /// * `other_funding` - Map of symbol (e.g., "BTCUSDT") -> 8h funding rate from other venue
    /// * `min_spread_8h` - Minimum absolute spread to consider (e.g., 0.0001 = 0.01%)
    ///
    /// # Returns
    /// Vector of funding spreads sorted by absolute spread (highest first).
    pub fn calculate_funding_spreads(
        hl_assets: &[HyperliquidAsset],
        other_funding: &HashMap<String, Decimal>,
        min_spread_8h: Decimal,
    ) -> Vec<FundingSpread> {
        let mut spreads = Vec::new();

        for asset in hl_assets {
            let other_symbol = format!("{}USDT", asset.name);

            if let Some(&other_rate) = other_funding.get(&other_symbol) {
                let hl_8h = asset.funding_rate * Decimal::from(REFERENCE_PERIOD_HOURS);
                let spread = hl_8h - other_rate;

                if spread.abs() >= min_spread_8h {
                    spreads.push(FundingSpread {
                        symbol: other_symbol,
                        hl_coin: asset.name.clone(),
                        hl_funding_hourly: asset.funding_rate,
                        hl_funding_8h: hl_8h,
                        other_funding_8h: other_rate,
                        spread_8h: spread,
                        spread_annualized_pct: annualized_pct(spread, REFERENCE_PERIOD_HOURS),
                        recommended_direction: SpreadDirection::from_spread(spread),
                    });
                }
            }
        }

        spreads.sort_by(|a, b| b.spread_8h.abs().cmp(&a.spread_8h.abs()));
        spreads
    }
}

#[async_trait]
impl ExchangeConnector for HyperliquidClient {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Decimal> {
        Ok(self.get_asset(symbol).await?.funding_rate)
    }

    async fn get_historical_funding_rates(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<FundingRecord>> {
        self.get_funding_history(symbol, start_ms, end_ms).await
    }

    async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<Kline>> {
        self.get_candles(symbol, interval, start_ms, end_ms).await
    }

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        Ok(self.get_asset(symbol).await?.mark_price)
    }

    async fn place_order(&self, _order: &OrderRequest) -> ExchangeResult<OrderAck> {
        Err(ExchangeError::Unsupported {
            venue: Venue::Hyperliquid,
            operation: "place_order",
        })
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>> {
        let state = self.get_clearinghouse_state().await?;

        Ok(state
            .asset_positions
            .into_iter()
            .map(|p| p.position)
            .find(|p| p.coin == symbol && p.szi != Decimal::ZERO)
            .map(|p| PositionSnapshot {
                venue: Venue::Hyperliquid,
                // positionValue is |szi| * mark
                mark_price: (p.position_value / p.szi).abs(),
                symbol: p.coin,
                quantity: p.szi,
                entry_price: p.entry_px.unwrap_or_default(),
                unrealized_pnl: p.unrealized_pnl,
                leverage: p.leverage.value,
            }))
    }

    async fn close_position(&self, _symbol: &str) -> ExchangeResult<Option<OrderAck>> {
        Err(ExchangeError::Unsupported {
            venue: Venue::Hyperliquid,
            operation: "close_position",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn test_client(server: &MockServer, wallet: Option<&str>) -> HyperliquidClient {
        let config = HyperliquidConfig {
            wallet_address: wallet.map(str::to_string),
            requests_per_minute: 0,
            ..Default::default()
        };
        HyperliquidClient::with_base_url(&config, &server.uri())
            .unwrap()
            .with_retry_policy(RetryPolicy::new(2).with_backoff(Duration::from_millis(1)))
            .with_page_pause(Duration::ZERO)
    }

    fn funding_page(start: i64, count: usize) -> serde_json::Value {
        let rows: Vec<_> = (0..count)
            .map(|i| {
                json!({
                    "coin": "ENA",
                    "fundingRate": "0.0000125",
                    "premium": "-0.0001",
                    "time": start + i as i64 * HOUR_MS
                })
            })
            .collect();
        json!(rows)
    }

    fn candle_page(start: i64, count: usize) -> serde_json::Value {
        let rows: Vec<_> = (0..count)
            .map(|i| {
                let open = start + i as i64 * HOUR_MS;
                json!({"t": open, "T": open + HOUR_MS - 1, "s": "ENA", "i": "1h",
                       "o": "0.50", "c": "0.52", "h": "0.53", "l": "0.49", "v": "12000", "n": 300})
            })
            .collect();
        json!(rows)
    }

    fn asset(name: &str, funding_rate: Decimal) -> HyperliquidAsset {
        HyperliquidAsset {
            name: name.to_string(),
            sz_decimals: 2,
            max_leverage: 50,
            funding_rate,
            open_interest: dec!(1000000),
            oracle_price: dec!(100),
            mark_price: dec!(100),
            volume_24h: dec!(1000000),
            premium: Decimal::ZERO,
        }
    }

    #[test]
    fn test_calculate_funding_spreads() {
        let hl_assets = vec![
            asset("BTC", dec!(0.0001)),  // 0.08% per 8h
            asset("ETH", dec!(-0.0005)), // -0.4% per 8h
            asset("DOGE", dec!(0.00001)),
        ];

        let mut other_funding = HashMap::new();
        other_funding.insert("BTCUSDT".to_string(), dec!(0.0005));
        other_funding.insert("ETHUSDT".to_string(), dec!(-0.001));
        other_funding.insert("DOGEUSDT".to_string(), dec!(0.00008));

        let spreads =
            HyperliquidClient::calculate_funding_spreads(&hl_assets, &other_funding, dec!(0.0001));

        assert_eq!(spreads.len(), 2);

        assert_eq!(spreads[0].hl_coin, "ETH");
        assert_eq!(spreads[0].spread_8h, dec!(-0.003));
        assert_eq!(
            spreads[0].recommended_direction,
            Some(SpreadDirection::LongHlShortOther)
        );

        assert_eq!(spreads[1].hl_coin, "BTC");
        assert_eq!(spreads[1].spread_8h, dec!(0.0003));
        // 0.0003 * 1095 * 100
        assert_eq!(spreads[1].spread_annualized_pct, dec!(32.85));
    }

    #[tokio::test]
    async fn test_funding_history_paginates_full_pages() {
        let server = MockServer::start().await;
        let start = 1_700_000_000_000_i64;
        let end = start + 1000 * HOUR_MS;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "fundingHistory", "startTime": start})))
            .respond_with(ResponseTemplate::new(200).set_body_json(funding_page(start, 500)))
            .expect(1)
            .mount(&server)
            .await;

        let second = start + 499 * HOUR_MS + 1;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "fundingHistory", "startTime": second})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(funding_page(start + 500 * HOUR_MS, 10)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let records = client.get_funding_history("ENA", start, end).await.unwrap();

        assert_eq!(records.len(), 510);
        assert!(records.windows(2).all(|w| w[0].time_ms < w[1].time_ms));
        assert_eq!(records[0].premium, Some(dec!(-0.0001)));
    }

    #[tokio::test]
    async fn test_funding_history_empty_page_advances_one_day() {
        let server = MockServer::start().await;
        let start = 1_700_000_000_000_i64;
        let end = start + 3 * DAY_MS;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"startTime": start})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"startTime": start + DAY_MS})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(funding_page(start + DAY_MS, 24)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let records = client.get_funding_history("ENA", start, end).await.unwrap();
        assert_eq!(records.len(), 24);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "metaAndAssetCtxs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [{"name": "ENA", "szDecimals": 0, "maxLeverage": 10}]},
                [{
                    "funding": "0.0000125",
                    "openInterest": "100",
                    "prevDayPx": "0.5",
                    "dayNtlVlm": "1000",
                    "premium": "0.0",
                    "oraclePx": "0.50",
                    "markPx": "0.51"
                }]
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        assert_eq!(client.get_funding_rate("ENA").await.unwrap(), dec!(0.0000125));
        assert_eq!(client.get_mark_price("ENA").await.unwrap(), dec!(0.51));

        let err = client.get_funding_rate("NOPE").await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_candles_parsed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "candleSnapshot", "req": {"coin": "ENA", "interval": "4h"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"t": 1700000000000_i64, "T": 1700014399999_i64, "s": "ENA", "i": "4h",
                 "o": "0.50", "c": "0.52", "h": "0.53", "l": "0.49", "v": "12000", "n": 300}
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let klines = client
            .get_candles("ENA", KlineInterval::H4, 1700000000000, 1700014399999)
            .await
            .unwrap();

        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].close, dec!(0.52));
        assert_eq!(klines[0].volume, dec!(12000));
    }

    #[tokio::test]
    async fn test_orders_unsupported() {
        let server = MockServer::start().await;
        let client = test_client(&server, None);

        let order = OrderRequest::market("ENA", crate::exchange::OrderSide::Buy, dec!(10));
        let err = client.place_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_position_requires_wallet() {
        let server = MockServer::start().await;
        let client = test_client(&server, None);
        assert!(matches!(
            client.get_position("ENA").await,
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_position_from_clearinghouse_state() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "clearinghouseState", "user": "0xabc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assetPositions": [{
                    "position": {
                        "coin": "ENA",
                        "szi": "-100",
                        "entryPx": "0.50",
                        "positionValue": "51",
                        "unrealizedPnl": "-1",
                        "leverage": {"type": "cross", "value": 2}
                    },
                    "type": "oneWay"
                }],
                "marginSummary": {
                    "accountValue": "1000",
                    "totalNtlPos": "51",
                    "totalMarginUsed": "25.5"
                },
                "withdrawable": "974.5"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, Some("0xabc"));
        let pos = client.get_position("ENA").await.unwrap().unwrap();
        assert_eq!(pos.quantity, dec!(-100));
        assert_eq!(pos.mark_price, dec!(0.51));
        assert_eq!(pos.leverage, 2);

        assert!(client.get_position("BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_fetch() {
        let client = HyperliquidClient::new(&HyperliquidConfig::default()).unwrap();
        let assets = client.get_assets().await.unwrap();

        assert!(!assets.is_empty());
        let btc = assets.iter().find(|a| a.name == "BTC").unwrap();
        println!("BTC funding rate (hourly): {}%", btc.funding_rate * dec!(100));
        println!("BTC mark price: ${}", btc.mark_price);
    }

    #[tokio::test]
    async fn test_funding_history_includes_end_boundary() {
        let server = MockServer::start().await;
        let at = 1_700_000_000_000_i64;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "fundingHistory", "startTime": at, "endTime": at})))
            .respond_with(ResponseTemplate::new(200).set_body_json(funding_page(at, 1)))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let records = client.get_funding_history("ENA", at, at).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time_ms, at);
    }

    #[tokio::test]
    async fn test_candles_paginate_from_last_open() {
        let server = MockServer::start().await;
        let start = 1_700_000_000_000_i64;
        let end = start + 6000 * HOUR_MS;
        let last_open = start + 4999 * HOUR_MS;

        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({"type": "candleSnapshot", "req": {"startTime": start}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(candle_page(start, 5000)))
            .expect(1)
            .mount(&server)
            .await;

        // Second page repeats the last candle of the first.
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(
                json!({"type": "candleSnapshot", "req": {"startTime": last_open + HOUR_MS}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(candle_page(last_open, 3)))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, None);
        let klines = client
            .get_candles("ENA", KlineInterval::H1, start, end)
            .await
            .unwrap();

        assert_eq!(klines.len(), 5002);
        assert!(klines.windows(2).all(|w| w[0].open_time_ms < w[1].open_time_ms));
        assert_eq!(klines.last().unwrap().open_time_ms, start + 5001 * HOUR_MS);
    }
}
