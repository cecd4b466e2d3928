//! Backtesting simulation engine.
//!
//! Replays a historical spread series through the threshold strategy, one
//! Binance funding period per record.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backtest::metrics::{describe_point, BacktestMetrics, EquityPoint};
use crate::backtest::BacktestConfig;
use crate::config::{Config, PairConfig};
use crate::data::write_csv;
use crate::exchange::SpreadDirection;
use crate::risk::{DrawdownTracker, RiskManager};
use crate::strategy::{ExitReason, PairPosition, Signal, SpreadRecord, ThresholdStrategy};
use crate::utils::format_timestamp;

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub direction: SpreadDirection,
    pub entry_time_ms: i64,
    pub exit_time_ms: i64,
    pub periods_held: u32,
    pub funding: Decimal,
    /// Entry and exit fill costs
    pub fees: Decimal,
    pub pnl: Decimal,
    pub exit_reason: ExitReason,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub backtest_config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<ClosedTrade>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    /// Entries refused by the risk limits or the drawdown halt
    pub rejected_entries: usize,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        write_csv(path, &self.equity_curve)
    }

    /// Export closed trades to CSV.
    pub fn trades_to_csv(&self, path: &str) -> Result<()> {
        write_csv(path, &self.trades)
    }

    pub fn final_equity(&self) -> Decimal {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.backtest_config.initial_balance)
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nBacktest Period: {} to {}\nFinal Equity: ${:.2}\nRejected Entries: {}",
            self.metrics.summary(),
            format_timestamp(self.start_time_ms),
            format_timestamp(self.end_time_ms),
            self.final_equity(),
            self.rejected_entries,
        )
    }
}

/// The backtesting simulation engine.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    strategy: ThresholdStrategy,
    risk: RiskManager,
    max_drawdown: Decimal,
    pair: PairConfig,
}

impl BacktestEngine {
    pub fn new(
        config: BacktestConfig,
        strategy: ThresholdStrategy,
        risk: RiskManager,
        max_drawdown: Decimal,
    ) -> Self {
        Self {
            config,
            strategy,
            risk,
            max_drawdown,
            pair: PairConfig::from_base("BTC"),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let engine = Self::new(
            BacktestConfig::from_config(config),
            ThresholdStrategy::from_config(&config.trading),
            RiskManager::new(config.risk.clone(), config.trading.max_leverage),
            config.risk.max_drawdown,
        );
        match config.trading.pairs.first() {
            Some(pair) => engine.with_pair(pair.clone()),
            None => engine,
        }
    }

    /// Label positions with `pair`.
    pub fn with_pair(mut self, pair: PairConfig) -> Self {
        self.pair = pair;
        self
    }

    pub fn with_config(mut self, config: BacktestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_strategy(mut self, strategy: ThresholdStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn strategy(&self) -> &ThresholdStrategy {
        &self.strategy
    }

    /// Run the simulation over time-ordered spread records.
    pub fn run(&self, records: &[SpreadRecord]) -> Result<BacktestResult> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            anyhow::bail!("No spread records to backtest");
        };

        info!(
            periods = records.len(),
            from = %format_timestamp(first.binance_time_ms),
            to = %format_timestamp(last.binance_time_ms),
            entry_apr = %self.strategy.entry_threshold_apr,
            exit_apr = %self.strategy.exit_threshold_apr,
            leverage = self.config.leverage,
            "Starting backtest"
        );

        let notional = self.config.notional();
        let margin = self.config.margin();
        let fill_cost = self.config.fill_cost();

        let mut balance = self.config.initial_balance;
        let mut tracker = DrawdownTracker::new(self.max_drawdown, balance);
        let mut position: Option<PairPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(records.len());
        let mut rejected_entries = 0;

        for record in records {
            let time_ms = record.binance_time_ms;

            if let Some(pos) = position.as_mut() {
                let funding = pos.funding_for(record.diff_rate);
                pos.funding_collected += funding;
                pos.periods_held += 1;
                balance += funding;
            }

            match self.strategy.evaluate(record, position.as_ref()) {
                Signal::Enter(direction) => {
                    if tracker.is_halted() {
                        rejected_entries += 1;
                        debug!(time = %format_timestamp(time_ms), "Entry skipped, drawdown halt active");
                    } else if margin > balance {
                        rejected_entries += 1;
                        debug!(%margin, %balance, "Entry skipped, insufficient balance");
                    } else if let Err(rejection) =
                        self.risk
                            .check_order(notional, self.config.leverage, balance, 0)
                    {
                        rejected_entries += 1;
                        debug!(%rejection, "Entry rejected by risk limits");
                    } else {
                        let mut pos = PairPosition::new(
                            self.pair.clone(),
                            direction,
                            notional,
                            margin,
                            time_ms,
                            record.annualized_diff_pct,
                        );
                        pos.fees_paid = fill_cost;
                        balance -= fill_cost;
                        debug!(
                            time = %format_timestamp(time_ms),
                            direction = direction.as_str(),
                            apr = %record.annualized_diff_pct,
                            "Entered pair"
                        );
                        position = Some(pos);
                    }
                }
                Signal::Exit(reason) => {
                    if let Some(pos) = position.take() {
                        balance -= fill_cost;
                        trades.push(close_trade(pos, fill_cost, time_ms, reason));
                    }
                }
                Signal::Wait | Signal::Hold => {}
            }

            tracker.update(balance);
            let point = EquityPoint::new(time_ms, balance, tracker.peak_equity(), position.is_some());
            debug!(point = %describe_point(&point), "Period processed");
            equity_curve.push(point);
        }

        if let Some(pos) = position.take() {
            balance -= fill_cost;
            trades.push(close_trade(pos, fill_cost, last.binance_time_ms, ExitReason::EndOfData));
            tracker.update(balance);
            if let Some(point) = equity_curve.last_mut() {
                *point = EquityPoint::new(point.time_ms, balance, tracker.peak_equity(), false);
            }
        }

        let metrics = BacktestMetrics::calculate(
            &equity_curve,
            self.config.initial_balance,
            &trades,
            self.config.period_hours,
        );

        info!(
            trades = trades.len(),
            return_pct = %metrics.total_return_pct.round_dp(2),
            sharpe = format!("{:.3}", metrics.sharpe_ratio),
            max_dd = %metrics.max_drawdown.round_dp(4),
            "Backtest complete"
        );

        Ok(BacktestResult {
            backtest_config: self.config.clone(),
            metrics,
            equity_curve,
            trades,
            start_time_ms: first.binance_time_ms,
            end_time_ms: last.binance_time_ms,
            rejected_entries,
        })
    }
}

fn close_trade(
    mut pos: PairPosition,
    fill_cost: Decimal,
    exit_time_ms: i64,
    reason: ExitReason,
) -> ClosedTrade {
    pos.fees_paid += fill_cost;
    debug!(
        time = %format_timestamp(exit_time_ms),
        reason = %reason,
        pnl = %pos.pnl(),
        "Exited pair"
    );
    ClosedTrade {
        direction: pos.direction,
        entry_time_ms: pos.entry_time_ms,
        exit_time_ms,
        periods_held: pos.periods_held,
        funding: pos.funding_collected,
        fees: pos.fees_paid,
        pnl: pos.pnl(),
        exit_reason: reason,
    }
}
