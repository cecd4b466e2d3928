//! Live monitoring and paper trading loop.
//!
//! Market data comes from the real venues; orders fill on one paper exchange
//! per venue. Hyperliquid funding settles on every hour boundary and Binance
//! funding on every funding-interval boundary, both at the latest polled
//! rate and mark.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, PairConfig};
use crate::exchange::{
    BinanceClient, ExchangeConnector, FundingRecord, HyperliquidClient, OrderAck, PaperExchange,
    SpreadDirection, Venue,
};
use crate::exchange::binance::DEFAULT_FUNDING_INTERVAL_HOURS;
use crate::notify::{MultiNotifier, Notification, Notifier};
use crate::persistence::{PersistedPair, PersistenceManager, TradeRecord};
use crate::risk::{DrawdownTracker, RiskManager};
use crate::strategy::{
    compare_funding_rates, ExitReason, PairExecutor, PairPosition, Signal, SpreadRecord,
    ThresholdStrategy,
};
use crate::utils::{now_ms, HOUR_MS};

/// Latest market view of one pair.
#[derive(Debug, Clone, Copy)]
struct Quote {
    hl_rate: Decimal,
    hl_mark: Decimal,
    bn_rate: Decimal,
    bn_mark: Decimal,
    interval_hours: u32,
}

/// Last settled boundary per venue, as whole periods since the epoch.
#[derive(Debug, Clone, Copy)]
struct SettlementClock {
    hl_hour: i64,
    bn_period: i64,
}

pub struct ArbTrader {
    config: Config,
    hl_market: Arc<dyn ExchangeConnector>,
    bn_market: Arc<dyn ExchangeConnector>,
    funding_intervals: HashMap<String, u32>,
    hl_paper: Arc<PaperExchange>,
    bn_paper: Arc<PaperExchange>,
    executor: PairExecutor,
    strategy: ThresholdStrategy,
    risk: RiskManager,
    drawdown: DrawdownTracker,
    notifier: Box<dyn Notifier>,
    persistence: Option<PersistenceManager>,
    positions: HashMap<String, PairPosition>,
    clocks: HashMap<String, SettlementClock>,
}

impl ArbTrader {
    /// Paper accounts start with half of `initial_balance` each.
    pub fn new(
        config: Config,
        hl_market: Arc<dyn ExchangeConnector>,
        bn_market: Arc<dyn ExchangeConnector>,
        funding_intervals: HashMap<String, u32>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let t = &config.trading;
        let per_venue = t.initial_balance / Decimal::TWO;
        let paper_slippage = t.slippage_tolerance / Decimal::TWO;

        let hl_paper = Arc::new(PaperExchange::new(Venue::Hyperliquid, per_venue, t.taker_fee, paper_slippage));
        let bn_paper = Arc::new(PaperExchange::new(Venue::Binance, per_venue, t.taker_fee, paper_slippage));
        let executor = PairExecutor::new(
            hl_paper.clone(),
            bn_paper.clone(),
            t.leverage,
            t.slippage_tolerance,
        );

        Self {
            strategy: ThresholdStrategy::from_config(t),
            risk: RiskManager::new(config.risk.clone(), t.max_leverage),
            drawdown: DrawdownTracker::new(config.risk.max_drawdown, t.initial_balance),
            config,
            hl_market,
            bn_market,
            funding_intervals,
            hl_paper,
            bn_paper,
            executor,
            notifier,
            persistence: None,
            positions: HashMap::new(),
            clocks: HashMap::new(),
        }
    }

    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Live clients, notification channels and persisted paper state from
    /// `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let binance = BinanceClient::new(&config.exchanges.binance)?;
        let hyperliquid = HyperliquidClient::new(&config.exchanges.hyperliquid)?;

        let funding_intervals = match binance.get_funding_intervals().await {
            Ok(intervals) => intervals,
            Err(e) => {
                warn!(error = %e, "Failed to load Binance funding intervals, assuming {}h", DEFAULT_FUNDING_INTERVAL_HOURS);
                HashMap::new()
            }
        };

        let notifier = MultiNotifier::from_config(&config.notifications)?;
        let persistence = PersistenceManager::new(&config.data.database_path)
            .with_context(|| format!("Failed to open {}", config.data.database_path))?;

        let mut trader = Self::new(
            config,
            Arc::new(hyperliquid),
            Arc::new(binance),
            funding_intervals,
            Box::new(notifier),
        )
        .with_persistence(persistence);
        trader.restore().await?;
        Ok(trader)
    }

    /// Reload paper accounts and open pairs from persistence.
    pub async fn restore(&mut self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        for paper in [&self.hl_paper, &self.bn_paper] {
            if let Some(account) = persistence.load_account(paper.venue())? {
                paper.restore_state(account).await;
            }
        }

        self.positions = persistence
            .load_pairs()?
            .into_iter()
            .map(|p| (p.hyperliquid.clone(), PairPosition::from(p)))
            .collect();

        let equity = self.equity().await;
        self.drawdown = DrawdownTracker::new(self.config.risk.max_drawdown, equity);

        if !self.positions.is_empty() {
            info!(pairs = self.positions.len(), %equity, "Restored open pairs");
        }
        Ok(())
    }

    pub fn open_pairs(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, hl_coin: &str) -> Option<&PairPosition> {
        self.positions.get(hl_coin)
    }

    /// Combined paper equity across both venues.
    pub async fn equity(&self) -> Decimal {
        self.hl_paper.equity().await + self.bn_paper.equity().await
    }

    /// Poll, settle, trade and persist every `poll_interval_secs` until
    /// `shutdown` flips. Open pairs are closed on exit when `close_on_exit`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, close_on_exit: bool) -> Result<()> {
        let interval = Duration::from_secs(self.config.data.poll_interval_secs);
        info!(
            pairs = self.config.trading.pairs.len(),
            interval_secs = interval.as_secs(),
            entry_apr = %self.strategy.entry_threshold_apr,
            exit_apr = %self.strategy.exit_threshold_apr,
            "Starting paper trader"
        );

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(now_ms()).await {
                        error!(error = %e, "Trading cycle failed");
                        self.notify(Notification::Error {
                            context: "trading cycle".to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    }
                }
            }
        }

        info!("Shutdown signal received");
        if close_on_exit {
            self.close_all(ExitReason::Shutdown).await;
        }
        self.persist().await;

        let equity = self.equity().await;
        info!(%equity, open_pairs = self.positions.len(), "Paper trader stopped");
        Ok(())
    }

    /// One trading cycle at `now`.
    pub async fn tick(&mut self, now: i64) -> Result<()> {
        for pair in self.config.trading.pairs.clone() {
            if let Err(e) = self.process_pair(&pair, now).await {
                warn!(pair = %pair.hyperliquid, error = %e, "Pair cycle failed");
                self.notify(Notification::Error {
                    context: pair.hyperliquid.clone(),
                    message: format!("{:#}", e),
                })
                .await;
            }
        }

        let equity = self.equity().await;
        if self.drawdown.update(equity) {
            self.notify(Notification::RiskHalt {
                drawdown: self.drawdown.current_drawdown(),
                limit: self.config.risk.max_drawdown,
            })
            .await;
        }

        self.persist().await;

        info!(
            %equity,
            open_pairs = self.positions.len(),
            drawdown = %self.drawdown.current_drawdown().round_dp(4),
            max_drawdown = %self.drawdown.session_mdd().round_dp(4),
            halted = self.drawdown.is_halted(),
            "Cycle complete"
        );
        Ok(())
    }

    #[instrument(skip(self, pair), fields(pair = %pair.hyperliquid))]
    async fn process_pair(&mut self, pair: &PairConfig, now: i64) -> Result<()> {
        let quote = self.fetch_quote(pair).await?;
        let spread = live_spread(pair, &quote, now)?;

        self.hl_paper.set_mark_price(&pair.hyperliquid, quote.hl_mark).await;
        self.hl_paper.set_funding_rate(&pair.hyperliquid, quote.hl_rate).await;
        self.bn_paper.set_mark_price(&pair.binance, quote.bn_mark).await;
        self.bn_paper.set_funding_rate(&pair.binance, quote.bn_rate).await;

        self.settle_funding(pair, &quote, now).await;
        self.refresh_unrealized(pair).await;

        debug!(
            hl_rate = %quote.hl_rate,
            bn_rate = %quote.bn_rate,
            interval_hours = quote.interval_hours,
            apr = %spread.annualized_diff_pct.round_dp(2),
            "Spread updated"
        );

        let signal = self.strategy.evaluate(&spread, self.positions.get(&pair.hyperliquid));
        match signal {
            Signal::Enter(direction) => self.enter(pair, direction, &spread, now).await,
            Signal::Exit(reason) => self.exit(&pair.hyperliquid, reason).await,
            Signal::Wait | Signal::Hold => Ok(()),
        }
    }

    async fn fetch_quote(&self, pair: &PairConfig) -> Result<Quote> {
        let (hl_rate, hl_mark, bn_rate, bn_mark) = tokio::try_join!(
            self.hl_market.get_funding_rate(&pair.hyperliquid),
            self.hl_market.get_mark_price(&pair.hyperliquid),
            self.bn_market.get_funding_rate(&pair.binance),
            self.bn_market.get_mark_price(&pair.binance),
        )
        .with_context(|| format!("Failed to fetch market data for {}", pair.hyperliquid))?;

        Ok(Quote {
            hl_rate,
            hl_mark,
            bn_rate,
            bn_mark,
            interval_hours: self
                .funding_intervals
                .get(&pair.binance)
                .copied()
                .unwrap_or(DEFAULT_FUNDING_INTERVAL_HOURS),
        })
    }

    /// Apply funding for every boundary crossed since the previous poll.
    async fn settle_funding(&mut self, pair: &PairConfig, quote: &Quote, now: i64) {
        let hour = now / HOUR_MS;
        let period = now / (i64::from(quote.interval_hours) * HOUR_MS);

        let clock = self
            .clocks
            .entry(pair.hyperliquid.clone())
            .or_insert(SettlementClock {
                hl_hour: hour,
                bn_period: period,
            });
        let settle_hl = hour > clock.hl_hour;
        let settle_bn = period > clock.bn_period;
        clock.hl_hour = hour;
        clock.bn_period = period;

        if !self.positions.contains_key(&pair.hyperliquid) {
            return;
        }

        let mut received = Decimal::ZERO;
        if settle_hl {
            let amount = self.hl_paper.settle_funding(&pair.hyperliquid, quote.hl_rate).await;
            self.record_funding(Venue::Hyperliquid, &pair.hyperliquid, quote.hl_rate, amount);
            received += amount;
        }
        if settle_bn {
            let amount = self.bn_paper.settle_funding(&pair.binance, quote.bn_rate).await;
            self.record_funding(Venue::Binance, &pair.binance, quote.bn_rate, amount);
            received += amount;
        }

        if let Some(position) = self.positions.get_mut(&pair.hyperliquid) {
            position.funding_collected += received;
            if settle_bn {
                position.periods_held += 1;
            }
            if settle_hl || settle_bn {
                info!(
                    %received,
                    total = %position.funding_collected,
                    periods = position.periods_held,
                    "Funding settled"
                );
            }
        }
    }

    async fn refresh_unrealized(&mut self, pair: &PairConfig) {
        if !self.positions.contains_key(&pair.hyperliquid) {
            return;
        }

        let (hl, bn) = tokio::join!(
            self.hl_paper.get_position(&pair.hyperliquid),
            self.bn_paper.get_position(&pair.binance),
        );
        let mut unrealized = Decimal::ZERO;
        for (venue, result) in [(Venue::Hyperliquid, hl), (Venue::Binance, bn)] {
            match result {
                Ok(Some(snapshot)) => unrealized += snapshot.unrealized_pnl,
                Ok(None) => {}
                Err(e) => warn!(%venue, error = %e, "Failed to read paper position"),
            }
        }

        if let Some(position) = self.positions.get_mut(&pair.hyperliquid) {
            position.unrealized_pnl = unrealized;
        }
    }

    async fn enter(
        &mut self,
        pair: &PairConfig,
        direction: SpreadDirection,
        spread: &SpreadRecord,
        now: i64,
    ) -> Result<()> {
        if self.drawdown.is_halted() {
            debug!("Entry skipped, drawdown halt active");
            return Ok(());
        }

        let t = &self.config.trading;
        let notional = t.position_size * Decimal::from(t.leverage);
        let leverage = t.leverage;
        let equity = self.equity().await;

        if let Err(rejection) = self
            .risk
            .check_order(notional, leverage, equity, self.positions.len())
        {
            info!(%rejection, "Entry rejected by risk limits");
            return Ok(());
        }

        let entry = self.executor.open_pair(pair, direction, notional).await?;

        let margin = Decimal::TWO * notional / Decimal::from(leverage);
        let mut position = PairPosition::new(
            pair.clone(),
            direction,
            notional,
            margin,
            now,
            spread.annualized_diff_pct,
        );
        position.hl_quantity = entry.hl_quantity();
        position.binance_quantity = entry.binance_quantity();
        position.fees_paid = entry.fees();

        self.record_fill(&entry.hyperliquid, "entry");
        self.record_fill(&entry.binance, "entry");

        self.notify(Notification::PositionOpened {
            pair: format!("{}/{}", pair.hyperliquid, pair.binance),
            direction,
            notional,
            apr: spread.annualized_diff_pct.round_dp(2),
        })
        .await;

        self.positions.insert(pair.hyperliquid.clone(), position);
        Ok(())
    }

    async fn exit(&mut self, hl_coin: &str, reason: ExitReason) -> Result<()> {
        let Some(mut position) = self.positions.remove(hl_coin) else {
            return Ok(());
        };

        let exit = match self.executor.close_pair(&position.pair).await {
            Ok(exit) => exit,
            Err(partial) => {
                // Book the legs that did close; the rest is retried next cycle
                position.fees_paid += partial.closed.fees();
                for ack in partial.closed.fills() {
                    self.record_fill(ack, reason.as_str());
                }
                self.positions.insert(hl_coin.to_string(), position);
                return Err(partial.error);
            }
        };

        position.fees_paid += exit.fees();
        for ack in exit.fills() {
            self.record_fill(ack, reason.as_str());
        }

        info!(
            pair = %position.pair.hyperliquid,
            %reason,
            funding = %position.funding_collected,
            fees = %position.fees_paid,
            pnl = %position.pnl(),
            "Pair closed"
        );

        self.notify(Notification::PositionClosed {
            pair: format!("{}/{}", position.pair.hyperliquid, position.pair.binance),
            reason: reason.to_string(),
            pnl: position.pnl().round_dp(4),
        })
        .await;
        Ok(())
    }

    /// Close every open pair, logging failures.
    pub async fn close_all(&mut self, reason: ExitReason) {
        let coins: Vec<String> = self.positions.keys().cloned().collect();
        for coin in coins {
            if let Err(e) = self.exit(&coin, reason).await {
                error!(pair = %coin, error = %e, "Failed to close pair");
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        self.notifier.notify(&notification).await;
    }

    fn record_fill(&self, ack: &OrderAck, reason: &str) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let trade = TradeRecord {
            venue: ack.venue,
            symbol: ack.symbol.clone(),
            side: ack.side,
            quantity: ack.filled_qty,
            price: ack.avg_price,
            fee: ack.fee,
            reason: reason.to_string(),
        };
        if let Err(e) = persistence.record_trade(&trade) {
            warn!(error = %e, "Failed to record trade");
        }
    }

    fn record_funding(&self, venue: Venue, symbol: &str, rate: Decimal, amount: Decimal) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.record_funding_event(venue, symbol, rate, amount) {
                warn!(error = %e, "Failed to record funding event");
            }
        }
    }

    async fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let (hl_account, bn_account) =
            tokio::join!(self.hl_paper.export_state(), self.bn_paper.export_state());
        let pairs: Vec<PersistedPair> = self.positions.values().map(PersistedPair::from).collect();
        let unrealized = self.hl_paper.unrealized_pnl().await + self.bn_paper.unrealized_pnl().await;
        let equity = self.equity().await;

        let result = persistence
            .save_account(&hl_account)
            .and_then(|_| persistence.save_account(&bn_account))
            .and_then(|_| persistence.save_pairs(&pairs))
            .and_then(|_| {
                persistence.record_snapshot(
                    equity,
                    unrealized,
                    pairs.len(),
                    self.drawdown.current_drawdown(),
                )
            });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist paper state");
        }
    }
}

/// Current spread of one pair through the same matching as the history
/// comparison.
fn live_spread(pair: &PairConfig, quote: &Quote, now: i64) -> Result<SpreadRecord> {
    let record = |venue, symbol: &str, rate| FundingRecord {
        venue,
        symbol: symbol.to_string(),
        time_ms: now,
        rate,
        premium: None,
        mark_price: None,
    };
    compare_funding_rates(
        &[record(Venue::Hyperliquid, &pair.hyperliquid, quote.hl_rate)],
        &[record(Venue::Binance, &pair.binance, quote.bn_rate)],
        quote.interval_hours,
        0,
    )?
    .pop()
    .context("Live rates did not produce a spread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::exchange::MockExchangeConnector;
    use crate::notify::LogNotifier;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// One minute past an 8h boundary.
    const T0: i64 = 1_700_006_400_000 + 60_000;

    fn config() -> Config {
        let mut config = Config::default();
        config.trading.pairs = vec![PairConfig::from_base("ENA")];
        config.trading.min_holding_periods = 0;
        config
    }

    fn market(rate: Arc<Mutex<Decimal>>, mark: Decimal) -> MockExchangeConnector {
        let mut mock = MockExchangeConnector::new();
        mock.expect_get_funding_rate()
            .returning(move |_| Ok(*rate.lock().unwrap()));
        mock.expect_get_mark_price().returning(move |_| Ok(mark));
        mock
    }

    fn trader(config: Config, hl_rate: Arc<Mutex<Decimal>>) -> ArbTrader {
        let bn_rate = Arc::new(Mutex::new(dec!(0.0001)));
        ArbTrader::new(
            config,
            Arc::new(market(hl_rate, dec!(1))),
            Arc::new(market(bn_rate, dec!(1))),
            HashMap::new(),
            Box::new(LogNotifier),
        )
        .with_persistence(PersistenceManager::in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_opens_settles_and_closes_pair() {
        // Hourly 0.0001 on HL is 0.0008 per 8h against 0.0001 on Binance
        let hl_rate = Arc::new(Mutex::new(dec!(0.0001)));
        let mut trader = trader(config(), hl_rate.clone());

        trader.tick(T0).await.unwrap();
        let position = trader.position("ENA").unwrap();
        assert_eq!(position.direction, SpreadDirection::ShortHlLongOther);
        assert_eq!(position.hl_quantity, dec!(-2000));
        assert_eq!(position.binance_quantity, dec!(2000));
        assert!(position.fees_paid > Decimal::ZERO);

        // Next hour: Hyperliquid settles, Binance does not
        trader.tick(T0 + HOUR_MS).await.unwrap();
        assert_eq!(trader.position("ENA").unwrap().funding_collected, dec!(0.2));
        assert_eq!(trader.position("ENA").unwrap().periods_held, 0);

        // Spread collapses to zero
        *hl_rate.lock().unwrap() = dec!(0.0000125);
        trader.tick(T0 + 2 * HOUR_MS).await.unwrap();
        assert_eq!(trader.open_pairs(), 0);

        let persistence = trader.persistence.as_ref().unwrap();
        let stats = persistence.get_funding_stats().unwrap();
        assert_eq!(stats["hyperliquid:ENA"], dec!(0.225));
        let counts: HashMap<_, _> = persistence.table_counts().unwrap().into_iter().collect();
        assert_eq!(counts["trades"], 4);
        assert_eq!(counts["open_pairs"], 0);
        assert_eq!(counts["equity_snapshots"], 3);
    }

    #[tokio::test]
    async fn test_unrealized_follows_marks() {
        let hl_mark = Arc::new(Mutex::new(dec!(1)));
        let mut hl = MockExchangeConnector::new();
        hl.expect_get_funding_rate().returning(|_| Ok(dec!(0.0001)));
        let mark = hl_mark.clone();
        hl.expect_get_mark_price()
            .returning(move |_| Ok(*mark.lock().unwrap()));
        let bn = market(Arc::new(Mutex::new(dec!(0.0001))), dec!(1));

        let mut trader = ArbTrader::new(
            config(),
            Arc::new(hl),
            Arc::new(bn),
            HashMap::new(),
            Box::new(LogNotifier),
        );
        trader.tick(T0).await.unwrap();
        assert_eq!(trader.position("ENA").unwrap().unrealized_pnl, Decimal::ZERO);

        // Short 2000 filled at 0.99975, long 2000 filled at 1.00025
        *hl_mark.lock().unwrap() = dec!(1.01);
        trader.tick(T0 + 60_000).await.unwrap();
        assert_eq!(trader.position("ENA").unwrap().unrealized_pnl, dec!(-21));
    }

    #[tokio::test]
    async fn test_binance_boundary_counts_a_period() {
        let hl_rate = Arc::new(Mutex::new(dec!(0.0001)));
        let mut trader = trader(config(), hl_rate);

        trader.tick(T0 + 7 * HOUR_MS).await.unwrap();
        trader.tick(T0 + 8 * HOUR_MS).await.unwrap();

        let position = trader.position("ENA").unwrap();
        assert_eq!(position.periods_held, 1);
        // Short HL receives 0.2, long Binance pays 2000 * 0.0001
        assert_eq!(position.funding_collected, dec!(0));
    }

    #[tokio::test]
    async fn test_risk_limits_block_entry() {
        let mut config = config();
        config.risk.max_open_positions = 0;
        let mut trader = trader(config, Arc::new(Mutex::new(dec!(0.0001))));

        trader.tick(T0).await.unwrap();
        assert_eq!(trader.open_pairs(), 0);
    }

    #[tokio::test]
    async fn test_market_errors_skip_the_pair() {
        let mut hl = MockExchangeConnector::new();
        hl.expect_get_funding_rate()
            .returning(|_| Err(ExchangeError::InvalidRequest("Unknown Hyperliquid coin: ENA".to_string())));
        hl.expect_get_mark_price().returning(|_| Ok(dec!(1)));
        let bn = market(Arc::new(Mutex::new(dec!(0.0001))), dec!(1));

        let mut trader = ArbTrader::new(
            config(),
            Arc::new(hl),
            Arc::new(bn),
            HashMap::new(),
            Box::new(LogNotifier),
        );
        trader.tick(T0).await.unwrap();
        assert_eq!(trader.open_pairs(), 0);
        assert_eq!(trader.equity().await, dec!(10000));
    }

    #[tokio::test]
    async fn test_close_all_and_restore() {
        let hl_rate = Arc::new(Mutex::new(dec!(0.0001)));
        let mut trader = trader(config(), hl_rate);
        trader.tick(T0).await.unwrap();

        let stored = trader.persistence.as_ref().unwrap().load_pairs().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].direction, SpreadDirection::ShortHlLongOther);

        trader.close_all(ExitReason::Shutdown).await;
        assert_eq!(trader.open_pairs(), 0);

        trader.restore().await.unwrap();
        // Restore reads the last persisted cycle, which still had the pair
        assert_eq!(trader.open_pairs(), 1);
    }
}
