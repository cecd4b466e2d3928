//! Historical funding comparison between Hyperliquid and Binance.
//!
//! Hyperliquid settles hourly while Binance settles every `multiplier` hours,
//! so Hyperliquid's rate is scaled by `multiplier` before the difference is
//! taken. Records are paired by a two-pointer walk over both time-sorted
//! series, accepting pairs whose timestamps are within `tolerance_ms`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::exchange::{ExchangeConnector, FundingRecord};
use crate::utils::{annualized_pct, now_ms, to_f64, DAY_MS};

/// Default tolerance when matching funding timestamps across venues.
pub const DEFAULT_TIME_TOLERANCE_MS: i64 = 300_000;

/// One matched funding period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadRecord {
    pub hyperliquid_time_ms: i64,
    pub binance_time_ms: i64,
    /// Hourly Hyperliquid rate
    pub hyperliquid_rate: Decimal,
    /// Hyperliquid rate scaled to the Binance period
    pub hyperliquid_adjusted: Decimal,
    pub binance_rate: Decimal,
    /// `hyperliquid_adjusted - binance_rate`
    pub diff_rate: Decimal,
    pub annualized_diff_pct: Decimal,
}

/// Pair Hyperliquid and Binance records and compute the annualized difference.
///
/// Both inputs must be sorted by time. Each record is used at most once.
pub fn compare_funding_rates(
    hyperliquid: &[FundingRecord],
    binance: &[FundingRecord],
    multiplier: u32,
    tolerance_ms: i64,
) -> Result<Vec<SpreadRecord>> {
    anyhow::ensure!(multiplier > 0, "multiplier must be positive");

    let scale = Decimal::from(multiplier);
    let mut results = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < hyperliquid.len() && j < binance.len() {
        let hl = &hyperliquid[i];
        let bn = &binance[j];

        if (hl.time_ms - bn.time_ms).abs() <= tolerance_ms {
            let adjusted = hl.rate * scale;
            let diff = adjusted - bn.rate;
            results.push(SpreadRecord {
                hyperliquid_time_ms: hl.time_ms,
                binance_time_ms: bn.time_ms,
                hyperliquid_rate: hl.rate,
                hyperliquid_adjusted: adjusted,
                binance_rate: bn.rate,
                diff_rate: diff,
                annualized_diff_pct: annualized_pct(diff, multiplier),
            });
            i += 1;
            j += 1;
        } else if hl.time_ms < bn.time_ms {
            i += 1;
        } else {
            j += 1;
        }
    }

    Ok(results)
}

/// Fetch the last `days` of funding from both venues and compare them.
#[instrument(skip(hyperliquid, binance))]
pub async fn compare_funding_rates_over_time(
    hyperliquid: &dyn ExchangeConnector,
    binance: &dyn ExchangeConnector,
    hl_coin: &str,
    bn_symbol: &str,
    days: u32,
    multiplier: u32,
    tolerance_ms: i64,
) -> Result<Vec<SpreadRecord>> {
    let end = now_ms();
    let start = end - i64::from(days) * DAY_MS;

    let (hl_records, bn_records) = tokio::try_join!(
        hyperliquid.get_historical_funding_rates(hl_coin, start, end),
        binance.get_historical_funding_rates(bn_symbol, start, end),
    )
    .with_context(|| format!("Failed to fetch funding history for {}/{}", hl_coin, bn_symbol))?;

    let records = compare_funding_rates(&hl_records, &bn_records, multiplier, tolerance_ms)?;
    info!(
        hl = hl_records.len(),
        binance = bn_records.len(),
        matched = records.len(),
        "Compared funding histories"
    );
    Ok(records)
}

/// Summary statistics over a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadSummary {
    pub count: usize,
    pub mean_apr: f64,
    pub min_apr: f64,
    pub max_apr: f64,
    pub std_dev_apr: f64,
    /// Share of periods where Hyperliquid paid more (0.0-1.0)
    pub hyperliquid_higher_share: f64,
}

impl SpreadSummary {
    /// `None` for an empty comparison.
    pub fn from_records(records: &[SpreadRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let values: Vec<f64> = records.iter().map(|r| to_f64(r.annualized_diff_pct)).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let higher = records.iter().filter(|r| r.diff_rate > Decimal::ZERO).count();

        Some(Self {
            count: records.len(),
            mean_apr: mean,
            min_apr: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max_apr: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            std_dev_apr: variance.sqrt(),
            hyperliquid_higher_share: higher as f64 / n,
        })
    }
}
