//! Cross-venue funding rate scanner.
//!
//! Compares current funding rates between Hyperliquid and Binance to
//! identify perp-perp arbitrage opportunities.

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::exchange::binance::DEFAULT_FUNDING_INTERVAL_HOURS;
use crate::exchange::hyperliquid::{FundingSpread, HyperliquidClient};
use crate::exchange::BinanceClient;

/// Scanner for cross-venue funding rate arbitrage opportunities.
#[derive(Debug, Clone)]
pub struct CrossVenueScanner {
    /// Minimum spread (8h) to include in results
    min_spread_8h: Decimal,
}

impl CrossVenueScanner {
    pub fn new(min_spread_8h: Decimal) -> Self {
        Self { min_spread_8h }
    }

    /// Fetch both venues in parallel and rank spreads by absolute size.
    ///
    /// Binance rates on 4h (or other) schedules are rescaled to 8h first.
    #[instrument(skip(self, binance, hyperliquid), name = "cross_venue_scan")]
    pub async fn scan(
        &self,
        binance: &BinanceClient,
        hyperliquid: &HyperliquidClient,
    ) -> Result<Vec<FundingSpread>> {
        let (premium_index, intervals, hl_assets) = tokio::try_join!(
            binance.get_all_premium_index(),
            binance.get_funding_intervals(),
            hyperliquid.get_assets(),
        )?;

        debug!(
            "Fetched {} Binance rates, {} Hyperliquid assets",
            premium_index.len(),
            hl_assets.len()
        );

        let binance_8h = normalize_to_8h(
            premium_index
                .into_iter()
                .map(|p| (p.symbol, p.last_funding_rate)),
            &intervals,
        );

        let spreads = HyperliquidClient::calculate_funding_spreads(
            &hl_assets,
            &binance_8h,
            self.min_spread_8h,
        );

        info!(
            "Found {} cross-venue spreads above {:.4}%",
            spreads.len(),
            self.min_spread_8h * Decimal::from(100)
        );

        Ok(spreads)
    }
}

/// Scale per-period rates to an 8h period using each symbol's interval.
fn normalize_to_8h(
    rates: impl IntoIterator<Item = (String, Decimal)>,
    intervals: &HashMap<String, u32>,
) -> HashMap<String, Decimal> {
    rates
        .into_iter()
        .map(|(symbol, rate)| {
            let hours = intervals
                .get(&symbol)
                .copied()
                .filter(|h| *h > 0)
                .unwrap_or(DEFAULT_FUNDING_INTERVAL_HOURS);
            let rate_8h = rate * Decimal::from(8) / Decimal::from(hours);
            (symbol, rate_8h)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinanceConfig, HyperliquidConfig};
    use crate::exchange::rate_limit::RetryPolicy;
    use crate::exchange::SpreadDirection;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_to_8h() {
        let mut intervals = HashMap::new();
        intervals.insert("ENAUSDT".to_string(), 4);

        let rates = normalize_to_8h(
            vec![
                ("ENAUSDT".to_string(), dec!(0.0001)),
                ("BTCUSDT".to_string(), dec!(0.0001)),
            ],
            &intervals,
        );
        assert_eq!(rates["ENAUSDT"], dec!(0.0002));
        assert_eq!(rates["BTCUSDT"], dec!(0.0001));
    }

    #[tokio::test]
    async fn test_scan_ranks_spreads() {
        let binance_server = MockServer::start().await;
        let hl_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fapi/v1/premiumIndex"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "markPrice": "60000", "indexPrice": "60010",
                 "lastFundingRate": "0.0001", "nextFundingTime": 1, "time": 1},
                {"symbol": "ENAUSDT", "markPrice": "0.5", "indexPrice": "0.5",
                 "lastFundingRate": "-0.0002", "nextFundingTime": 1, "time": 1}
            ])))
            .mount(&binance_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/fundingInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "ENAUSDT", "adjustedFundingRateCap": "0.02",
                 "adjustedFundingRateFloor": "-0.02", "fundingIntervalHours": 4,
                 "disclaimer": false}
            ])))
            .mount(&binance_server)
            .await;

        let ctx = |funding: &str| {
            json!({
                "funding": funding, "openInterest": "1000", "prevDayPx": "1",
                "dayNtlVlm": "1000", "premium": "0", "oraclePx": "1",
                "markPx": "1", "midPx": "1"
            })
        };
        Mock::given(method("POST"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"universe": [
                    {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
                    {"name": "ENA", "szDecimals": 0, "maxLeverage": 10}
                ]},
                [ctx("0.0000125"), ctx("0.00005")]
            ])))
            .mount(&hl_server)
            .await;

        let binance = BinanceClient::with_base_url(
            &BinanceConfig {
                requests_per_minute: 0,
                ..Default::default()
            },
            &binance_server.uri(),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::new(0));
        let hyperliquid = HyperliquidClient::with_base_url(
            &HyperliquidConfig {
                requests_per_minute: 0,
                ..Default::default()
            },
            &hl_server.uri(),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::new(0).with_backoff(Duration::ZERO));

        let spreads = CrossVenueScanner::new(dec!(0.0001))
            .scan(&binance, &hyperliquid)
            .await
            .unwrap();

        // BTC: 0.0001 - 0.0001 = 0, filtered out.
        // ENA: 0.0004 - (-0.0004) = 0.0008
        assert_eq!(spreads.len(), 1);
        assert_eq!(spreads[0].hl_coin, "ENA");
        assert_eq!(spreads[0].other_funding_8h, dec!(-0.0004));
        assert_eq!(spreads[0].spread_8h, dec!(0.0008));
        assert_eq!(
            spreads[0].recommended_direction,
            Some(SpreadDirection::ShortHlLongOther)
        );
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_cross_venue_scan_live() {
        let binance = BinanceClient::new(&Default::default()).unwrap();
        let hyperliquid = HyperliquidClient::new(&Default::default()).unwrap();
        let scanner = CrossVenueScanner::new(Decimal::new(1, 4));

        let spreads = scanner.scan(&binance, &hyperliquid).await.unwrap();

        println!("Found {} cross-venue spreads", spreads.len());
        for spread in spreads.iter().take(10) {
            println!(
                "{}: HL {:.4}% vs BN {:.4}% = spread {:.4}% ({:.1}% APR)",
                spread.hl_coin,
                spread.hl_funding_8h * Decimal::from(100),
                spread.other_funding_8h * Decimal::from(100),
                spread.spread_8h * Decimal::from(100),
                spread.spread_annualized_pct,
            );
        }
    }
}
