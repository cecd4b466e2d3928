//! Historical and live market data collection.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::dataset::{kline_file_name, write_csv};
use crate::config::{ExchangesConfig, PairConfig};
use crate::exchange::{
    BinanceClient, ExchangeConnector, FundingRecord, HyperliquidClient, Kline, KlineInterval,
    Venue,
};
use crate::persistence::PersistenceManager;
use crate::utils::now_ms;

/// Build the REST connector for a venue.
pub fn connector_for(venue: Venue, config: &ExchangesConfig) -> Result<Arc<dyn ExchangeConnector>> {
    let connector: Arc<dyn ExchangeConnector> = match venue {
        Venue::Binance => Arc::new(BinanceClient::new(&config.binance)?),
        Venue::Hyperliquid => Arc::new(HyperliquidClient::new(&config.hyperliquid)?),
    };
    Ok(connector)
}

/// Candles fetched for one base asset from both venues.
#[derive(Debug, Clone)]
pub struct HistoricalData {
    pub base: String,
    pub interval: KlineInterval,
    pub binance: Vec<Kline>,
    pub hyperliquid: Vec<Kline>,
}

impl HistoricalData {
    /// Store both series, returning the number of new rows.
    pub fn store(&self, persistence: &PersistenceManager) -> Result<usize> {
        let pair = PairConfig::from_base(&self.base);
        let inserted = persistence.store_klines(Venue::Binance, &pair.binance, self.interval, &self.binance)?
            + persistence.store_klines(
                Venue::Hyperliquid,
                &pair.hyperliquid,
                self.interval,
                &self.hyperliquid,
            )?;
        Ok(inserted)
    }
}

/// Paginated historical downloads from both venues.
pub struct HistoricalCollector {
    binance: Arc<dyn ExchangeConnector>,
    hyperliquid: Arc<dyn ExchangeConnector>,
}

impl HistoricalCollector {
    pub fn new(binance: Arc<dyn ExchangeConnector>, hyperliquid: Arc<dyn ExchangeConnector>) -> Self {
        Self {
            binance,
            hyperliquid,
        }
    }

    pub fn from_config(config: &ExchangesConfig) -> Result<Self> {
        Ok(Self::new(
            connector_for(Venue::Binance, config)?,
            connector_for(Venue::Hyperliquid, config)?,
        ))
    }

    pub fn connector(&self, venue: Venue) -> &Arc<dyn ExchangeConnector> {
        match venue {
            Venue::Binance => &self.binance,
            Venue::Hyperliquid => &self.hyperliquid,
        }
    }

    /// Funding history for one symbol in `[start_ms, end_ms]`.
    #[instrument(skip(self))]
    pub async fn fetch_funding(
        &self,
        venue: Venue,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<FundingRecord>> {
        let records = self
            .connector(venue)
            .get_historical_funding_rates(symbol, start_ms, end_ms)
            .await
            .with_context(|| format!("Failed to fetch {} funding history for {}", venue, symbol))?;

        info!(%venue, %symbol, count = records.len(), "Fetched funding history");
        Ok(records)
    }

    /// Candles for one symbol in `[start_ms, end_ms]`.
    #[instrument(skip(self))]
    pub async fn fetch_prices(
        &self,
        venue: Venue,
        symbol: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>> {
        let klines = self
            .connector(venue)
            .get_historical_prices(symbol, interval, start_ms, end_ms)
            .await
            .with_context(|| format!("Failed to fetch {} candles for {}", venue, symbol))?;

        info!(%venue, %symbol, %interval, count = klines.len(), "Fetched candles");
        Ok(klines)
    }

    /// Candles for `<BASE>USDT` on Binance and `<BASE>` on Hyperliquid,
    /// written to `save_dir` as CSV when given.
    pub async fn fetch_historical_data(
        &self,
        base: &str,
        interval: KlineInterval,
        start_ms: i64,
        end_ms: i64,
        save_dir: Option<&Path>,
    ) -> Result<HistoricalData> {
        let pair = PairConfig::from_base(base);

        let (binance, hyperliquid) = tokio::try_join!(
            self.fetch_prices(Venue::Binance, &pair.binance, interval, start_ms, end_ms),
            self.fetch_prices(Venue::Hyperliquid, &pair.hyperliquid, interval, start_ms, end_ms),
        )?;

        let data = HistoricalData {
            base: pair.hyperliquid.clone(),
            interval,
            binance,
            hyperliquid,
        };

        if let Some(dir) = save_dir {
            for (venue, klines) in [
                (Venue::Binance, &data.binance),
                (Venue::Hyperliquid, &data.hyperliquid),
            ] {
                if klines.is_empty() {
                    warn!(%venue, base = %data.base, "No candles returned, skipping export");
                    continue;
                }
                let path = dir.join(kline_file_name(venue, &data.base, interval));
                write_csv(&path, klines)?;
                info!(%venue, path = %path.display(), rows = klines.len(), "Saved candles");
            }
        }

        Ok(data)
    }
}

/// Periodic snapshot of current funding rates and mark prices.
pub struct LiveCollector {
    collector: HistoricalCollector,
    pairs: Vec<PairConfig>,
    interval: Duration,
}

impl LiveCollector {
    pub fn new(collector: HistoricalCollector, pairs: Vec<PairConfig>, interval: Duration) -> Self {
        Self {
            collector,
            pairs,
            interval,
        }
    }

    /// Current rate of one symbol stamped with the collection time.
    async fn snapshot(&self, venue: Venue, symbol: &str, time_ms: i64) -> Result<FundingRecord> {
        let connector = self.collector.connector(venue);
        let (rate, mark) = tokio::try_join!(
            connector.get_funding_rate(symbol),
            connector.get_mark_price(symbol),
        )
        .with_context(|| format!("Failed to poll {} {}", venue, symbol))?;

        Ok(FundingRecord {
            venue,
            symbol: symbol.to_string(),
            time_ms,
            rate,
            premium: None,
            mark_price: Some(mark),
        })
    }

    /// Poll every configured pair on both venues. Failed symbols are logged
    /// and left out.
    pub async fn poll_once(&self) -> Vec<FundingRecord> {
        let time_ms = now_ms();
        let mut records = Vec::with_capacity(self.pairs.len() * 2);

        for pair in &self.pairs {
            let (binance, hyperliquid) = tokio::join!(
                self.snapshot(Venue::Binance, &pair.binance, time_ms),
                self.snapshot(Venue::Hyperliquid, &pair.hyperliquid, time_ms),
            );
            for result in [binance, hyperliquid] {
                match result {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(pair = %pair.hyperliquid, error = %e, "Live poll failed"),
                }
            }
        }

        records
    }

    /// Poll and store until `shutdown` flips to `true`.
    pub async fn run(
        &self,
        persistence: &PersistenceManager,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            pairs = self.pairs.len(),
            interval_secs = self.interval.as_secs(),
            "Starting live collection"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Live collection stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let records = self.poll_once().await;
                    match persistence.store_funding_records(&records) {
                        Ok(inserted) => debug!(polled = records.len(), inserted, "Stored live rates"),
                        Err(e) => error!(error = %e, "Failed to store live rates"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read_csv;
    use crate::error::ExchangeError;
    use crate::exchange::MockExchangeConnector;
    use rust_decimal_macros::dec;

    fn kline(open_time_ms: i64) -> Kline {
        Kline {
            open_time_ms,
            open: dec!(0.5),
            high: dec!(0.52),
            low: dec!(0.49),
            close: dec!(0.51),
            volume: dec!(1000),
        }
    }

    fn mock(venue: Venue) -> MockExchangeConnector {
        let mut mock = MockExchangeConnector::new();
        mock.expect_venue().return_const(venue);
        mock
    }

    #[tokio::test]
    async fn test_fetch_historical_data_uses_venue_symbols() {
        let mut binance = mock(Venue::Binance);
        binance
            .expect_get_historical_prices()
            .withf(|symbol, interval, _, _| symbol == "ENAUSDT" && *interval == KlineInterval::H1)
            .times(1)
            .returning(|_, _, _, _| Ok(vec![kline(0), kline(3_600_000)]));

        let mut hyperliquid = mock(Venue::Hyperliquid);
        hyperliquid
            .expect_get_historical_prices()
            .withf(|symbol, _, _, _| symbol == "ENA")
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));

        let dir = std::env::temp_dir().join(format!("fra-collector-{}", std::process::id()));
        let collector = HistoricalCollector::new(Arc::new(binance), Arc::new(hyperliquid));
        let data = collector
            .fetch_historical_data("ena", KlineInterval::H1, 0, 7_200_000, Some(&dir))
            .await
            .unwrap();

        assert_eq!(data.base, "ENA");
        assert_eq!(data.binance.len(), 2);
        assert!(data.hyperliquid.is_empty());

        let saved: Vec<Kline> = read_csv(dir.join("binance_ENA_1h.csv")).unwrap();
        assert_eq!(saved, data.binance);
        // Empty series are not exported
        assert!(!dir.join("hyperliquid_ENA_1h.csv").exists());

        let persistence = PersistenceManager::in_memory().unwrap();
        assert_eq!(data.store(&persistence).unwrap(), 2);
        assert_eq!(data.store(&persistence).unwrap(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_funding_adds_context() {
        let binance = mock(Venue::Binance);
        let mut hyperliquid = mock(Venue::Hyperliquid);
        hyperliquid
            .expect_get_historical_funding_rates()
            .returning(|_, _, _| Err(ExchangeError::InvalidRequest("bad coin".to_string())));

        let collector = HistoricalCollector::new(Arc::new(binance), Arc::new(hyperliquid));
        let err = collector
            .fetch_funding(Venue::Hyperliquid, "NOPE", 0, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Hyperliquid funding history for NOPE"));
    }

    #[tokio::test]
    async fn test_poll_once_skips_failed_symbols() {
        let mut binance = mock(Venue::Binance);
        binance.expect_get_funding_rate().returning(|_| Ok(dec!(0.0001)));
        binance.expect_get_mark_price().returning(|_| Ok(dec!(0.51)));

        let mut hyperliquid = mock(Venue::Hyperliquid);
        hyperliquid.expect_get_funding_rate().returning(|_| {
            Err(ExchangeError::RateLimited {
                venue: Venue::Hyperliquid,
                retry_after: None,
            })
        });
        hyperliquid.expect_get_mark_price().returning(|_| Ok(dec!(0.51)));

        let live = LiveCollector::new(
            HistoricalCollector::new(Arc::new(binance), Arc::new(hyperliquid)),
            vec![PairConfig::from_base("ENA")],
            Duration::from_secs(60),
        );

        let records = live.poll_once().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].venue, Venue::Binance);
        assert_eq!(records[0].symbol, "ENAUSDT");
        assert_eq!(records[0].mark_price, Some(dec!(0.51)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut binance = mock(Venue::Binance);
        binance.expect_get_funding_rate().returning(|_| Ok(dec!(0.0001)));
        binance.expect_get_mark_price().returning(|_| Ok(dec!(100)));
        let mut hyperliquid = mock(Venue::Hyperliquid);
        hyperliquid.expect_get_funding_rate().returning(|_| Ok(dec!(0.00001)));
        hyperliquid.expect_get_mark_price().returning(|_| Ok(dec!(100)));

        let live = LiveCollector::new(
            HistoricalCollector::new(Arc::new(binance), Arc::new(hyperliquid)),
            vec![PairConfig::from_base("BTC")],
            Duration::from_secs(3600),
        );
        let persistence = PersistenceManager::in_memory().unwrap();
        let (tx, rx) = watch::channel(false);

        let run = live.run(&persistence, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        let (result, _) = tokio::join!(run, stop);
        result.unwrap();

        // The first tick fires immediately
        let stored = persistence
            .load_funding_records(Venue::Binance, "BTCUSDT", 0, i64::MAX)
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
