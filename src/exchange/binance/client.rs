//! Binance USDⓈ-M Futures REST client.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::types::*;
use crate::config::BinanceConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::rate_limit::{RequestPacer, RetryPolicy, PAGE_PAUSE};
use crate::exchange::types::{
    normalize_funding_records, normalize_klines, FundingRecord, Kline, KlineInterval, OrderAck,
    OrderRequest, OrderType, PositionSnapshot,
};
use crate::exchange::{ExchangeConnector, Venue};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Maximum records per `fundingRate` page.
const FUNDING_PAGE_LIMIT: usize = 1000;
/// Maximum candles per `klines` page.
const KLINE_PAGE_LIMIT: usize = 1500;
const RECV_WINDOW_MS: u64 = 5000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// Funding period for symbols absent from `fundingInfo`.
pub const DEFAULT_FUNDING_INTERVAL_HOURS: u32 = 8;

/// Binance futures API client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    pacer: RequestPacer,
    retry: RetryPolicy,
    page_pause: Duration,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> anyhow::Result<Self> {
        let base_url = if config.testnet {
            FUTURES_TESTNET_URL
        } else {
            FUTURES_BASE_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(config: &BinanceConfig, base_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.api_secret.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            pacer: RequestPacer::per_minute(config.requests_per_minute),
            retry: RetryPolicy::new(config.max_retries),
            page_pause: PAGE_PAUSE,
        })
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the pause between pages.
    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    /// Whether signed endpoints can be used.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        sign_query(&self.secret_key, query_string)
    }

    /// Send a single request without retries.
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        signed: bool,
    ) -> ExchangeResult<T> {
        let mut query = encode_params(params);

        if signed {
            if !self.has_credentials() {
                return Err(ExchangeError::InvalidRequest(
                    "Binance API credentials are not configured".to_string(),
                ));
            }
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                RECV_WINDOW_MS,
                Utc::now().timestamp_millis()
            ));
            let signature = self.sign(&query);
            query.push_str(&format!("&signature={}", signature));
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.pacer.acquire().await;

        let mut request = self.http.request(method, &url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ExchangeError::RateLimited {
                venue: Venue::Binance,
                retry_after,
            });
        }

        let body = response.text().await?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => (Some(err.code), err.msg),
                Err(_) => (None, body),
            };
            return Err(ExchangeError::Api {
                venue: Venue::Binance,
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|source| ExchangeError::Decode {
            context: format!("Binance {}", path),
            source,
        })
    }

    /// Send a request, retrying transient failures.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        signed: bool,
    ) -> ExchangeResult<T> {
        let params = &params;
        self.retry
            .run(Venue::Binance, path, || {
                self.send_once(method.clone(), path, params, signed)
            })
            .await
    }

    // ==================== Market Data (Public) ====================

    /// Mark price and predicted funding rate for one symbol.
    #[instrument(skip(self))]
    pub async fn get_premium_index(&self, symbol: &str) -> ExchangeResult<PremiumIndex> {
        self.request(
            Method::GET,
            "/fapi/v1/premiumIndex",
            vec![("symbol".to_string(), symbol.to_string())],
            false,
        )
        .await
    }

    /// Mark price and predicted funding rate for all perpetuals.
    #[instrument(skip(self))]
    pub async fn get_all_premium_index(&self) -> ExchangeResult<Vec<PremiumIndex>> {
        self.request(Method::GET, "/fapi/v1/premiumIndex", vec![], false)
            .await
    }

    /// Funding periods for symbols with non-default settings. Symbols absent
    /// from the map settle every `DEFAULT_FUNDING_INTERVAL_HOURS`.
    #[instrument(skip(self))]
    pub async fn get_funding_intervals(&self) -> ExchangeResult<HashMap<String, u32>> {
        let infos: Vec<FundingInfo> = self
            .request(Method::GET, "/fapi/v1/fundingInfo", vec![], false)
            .await?;

        Ok(infos
            .into_iter()
            .map(|i| (i.symbol, i.funding_interval_hours))
            .collect())
    }

    /// Best bid/ask for all symbols.
    #[instrument(skip(self))]
    pub async fn get_book_tickers(&self) -> ExchangeResult<Vec<BookTicker>> {
        self.request(Method::GET, "/fapi/v1/ticker/bookTicker", vec![], false)
            .await
    }

    /// Funding rate history in batches of 1000.
    ///
    /// An empty page moves the cursor forward one day; a short page ends
    /// pagination.
    #[instrument(skip(self))]
    pub async fn get_funding_history(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<FundingRecord>> {
        let mut records = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let params = vec![
                ("symbol".to_string(), symbol.to_string()),
                ("limit".to_string(), FUNDING_PAGE_LIMIT.to_string()),
                ("startTime".to_string(), cursor.to_string()),
                ("endTime".to_string(), end_ms.to_string()),
            ];
            let page: Vec<FundingRateRecord> = self
                .request(Method::GET, "/fapi/v1/fundingRate", params, false)
                .await?;

            let Some(last_time) = page.last().map(|r| r.funding_time) else {
                debug!(
                    symbol,
                    cursor, end_ms, "No Binance funding data in range, moving forward by 1 day"
                );
                cursor += DAY_MS;
                continue;
            };

            let page_len = page.len();
            records.extend(page.into_iter().map(|r| FundingRecord {
                venue: Venue::Binance,
                symbol: r.symbol,
                time_ms: r.funding_time,
                rate: r.funding_rate,
                premium: None,
                mark_price: r.mark_price,
            }));

            if page_len < FUNDING_PAGE_LIMIT {
                break;
            }
            cursor = last_time + 1;
            tokio::time::sleep(self.page_pause).await;
        }

        let records = normalize_funding_records(records);
        info!(symbol, count = records.len(), "Fetched Binance funding history");
        Ok(records)
    }

    /// Candles in batches of 1500.
    #[instrument(skip(self))]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> ExchangeResult<Vec<Kline>> {
        let mut klines = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let params = vec![
                ("symbol".to_string(), symbol.to_string()),
                ("interval".to_string(), interval.as_str().to_string()),
                ("startTime".to_string(), cursor.to_string()),
                ("endTime".to_string(), end_ms.to_string()),
                ("limit".to_string(), KLINE_PAGE_LIMIT.to_string()),
            ];
            let page: Vec<RawKline> = self
                .request(Method::GET, "/fapi/v1/klines", params, false)
                .await?;

            let Some(last_open) = page.last().map(|k| k.0) else {
                break;
            };

            let page_len = page.len();
            for row in page {
                klines.push(parse_raw_kline(&row)?);
            }

            if page_len < KLINE_PAGE_LIMIT {
                break;
            }
            cursor = last_open + interval.millis();
            tokio::time::sleep(self.page_pause).await;
        }

        let klines = normalize_klines(klines);
        debug!(symbol, count = klines.len(), "Fetched Binance klines");
        Ok(klines)
    }

    // ==================== Account (Authenticated) ====================

    /// Positions for a symbol.
    #[instrument(skip(self))]
    pub async fn get_position_risk(&self, symbol: &str) -> ExchangeResult<Vec<PositionRisk>> {
        self.request(
            Method::GET,
            "/fapi/v2/positionRisk",
            vec![("symbol".to_string(), symbol.to_string())],
            true,
        )
        .await
    }

    /// Set leverage for a symbol.
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u8) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("leverage".to_string(), leverage.to_string()),
                ],
                true,
            )
            .await?;
        Ok(())
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a new futures order.
    ///
    /// Orders are sent once: a timed-out request may still have been filled.
    #[instrument(skip(self))]
    pub async fn place_futures_order(&self, order: &OrderRequest) -> ExchangeResult<OrderResponse> {
        order.validate()?;

        if let Some(leverage) = order.leverage {
            self.set_leverage(&order.symbol, leverage).await?;
        }

        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), order.side.as_str().to_string()),
            ("type".to_string(), order.order_type.as_str().to_string()),
            ("quantity".to_string(), order.quantity.normalize().to_string()),
            ("newOrderRespType".to_string(), "RESULT".to_string()),
        ];

        if order.order_type == OrderType::Limit {
            if let Some(price) = order.price {
                params.push(("price".to_string(), price.normalize().to_string()));
                params.push(("timeInForce".to_string(), "GTC".to_string()));
            }
        }

        if order.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }

        debug!("Placing futures order: {:?}", order);

        self.send_once(Method::POST, "/fapi/v1/order", &params, true)
            .await
    }
}

#[async_trait]
impl ExchangeConnector for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Decimal> {
        Ok(self.get_premium_index(symbol).await?.last_funding_rate)
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
        self.get_klines(symbol, interval, start_ms, end_ms).await
    }

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        Ok(self.get_premium_index(symbol).await?.mark_price)
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck> {
        let response = self.place_futures_order(order).await?;
        Ok(OrderAck {
            venue: Venue::Binance,
            order_id: response.order_id.to_string(),
            symbol: response.symbol,
            side: order.side,
            status: response.status,
            filled_qty: response.executed_qty,
            avg_price: response.avg_price,
            fee: Decimal::ZERO,
        })
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>> {
        let positions = self.get_position_risk(symbol).await?;

        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.position_amt != Decimal::ZERO)
            .map(|p| PositionSnapshot {
                venue: Venue::Binance,
                symbol: p.symbol,
                quantity: p.position_amt,
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_profit,
                leverage: p.leverage.parse().unwrap_or(1),
            }))
    }

    async fn close_position(&self, symbol: &str) -> ExchangeResult<Option<OrderAck>> {
        let Some(position) = self.get_position(symbol).await? else {
            return Ok(None);
        };

        let order = OrderRequest::market(symbol, position.closing_side(), position.quantity.abs())
            .reduce_only();
        self.place_order(&order).await.map(Some)
    }
}

/// HMAC-SHA256 hex signature of a query string.
pub fn sign_query(secret: &str, query_string: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn encode_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_raw_kline(row: &RawKline) -> ExchangeResult<Kline> {
    let parse = |value: &str, field: &str| {
        value.parse::<Decimal>().map_err(|e| ExchangeError::Malformed {
            venue: Venue::Binance,
            message: format!("kline {} '{}': {}", field, value, e),
        })
    };

    Ok(Kline {
        open_time_ms: row.0,
        open: parse(&row.1, "open")?,
        high: parse(&row.2, "high")?,
        low: parse(&row.3, "low")?,
        close: parse(&row.4, "close")?,
        volume: parse(&row.5, "volume")?,
    })
}
