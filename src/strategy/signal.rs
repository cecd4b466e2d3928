//! Threshold entry/exit rules on the annualized funding spread.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::spread::SpreadRecord;
use crate::config::{PairConfig, TradingConfig};
use crate::exchange::SpreadDirection;
use crate::persistence::PersistedPair;
use crate::risk::{StopRules, StopTrigger};

/// An open arbitrage across both venues.
#[derive(Debug, Clone, PartialEq)]
pub struct PairPosition {
    pub pair: PairConfig,
    pub direction: SpreadDirection,
    /// Notional per leg in USD
    pub notional: Decimal,
    /// Margin committed across both legs
    pub margin: Decimal,
    /// Signed Hyperliquid leg size
    pub hl_quantity: Decimal,
    /// Signed Binance leg size
    pub binance_quantity: Decimal,
    pub entry_time_ms: i64,
    /// Annualized spread at entry, in %
    pub entry_apr: Decimal,
    pub funding_collected: Decimal,
    pub fees_paid: Decimal,
    /// Price PnL of both legs at the last mark (zero in backtests)
    pub unrealized_pnl: Decimal,
    pub periods_held: u32,
}

impl PairPosition {
    pub fn new(
        pair: PairConfig,
        direction: SpreadDirection,
        notional: Decimal,
        margin: Decimal,
        entry_time_ms: i64,
        entry_apr: Decimal,
    ) -> Self {
        Self {
            pair,
            direction,
            notional,
            margin,
            hl_quantity: Decimal::ZERO,
            binance_quantity: Decimal::ZERO,
            entry_time_ms,
            entry_apr,
            funding_collected: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            periods_held: 0,
        }
    }

    /// Net PnL: funding minus fees plus price PnL.
    pub fn pnl(&self) -> Decimal {
        self.funding_collected - self.fees_paid + self.unrealized_pnl
    }

    /// Funding earned over one period with rate difference `diff`.
    pub fn funding_for(&self, diff: Decimal) -> Decimal {
        self.notional * diff * self.direction.funding_sign()
    }
}

impl From<&PairPosition> for PersistedPair {
    fn from(p: &PairPosition) -> Self {
        Self {
            hyperliquid: p.pair.hyperliquid.clone(),
            binance: p.pair.binance.clone(),
            direction: p.direction,
            notional: p.notional,
            margin: p.margin,
            hl_quantity: p.hl_quantity,
            binance_quantity: p.binance_quantity,
            entry_time_ms: p.entry_time_ms,
            entry_apr: p.entry_apr,
            funding_collected: p.funding_collected,
            fees_paid: p.fees_paid,
            periods_held: p.periods_held,
        }
    }
}

impl From<PersistedPair> for PairPosition {
    fn from(p: PersistedPair) -> Self {
        Self {
            pair: PairConfig {
                hyperliquid: p.hyperliquid,
                binance: p.binance,
            },
            direction: p.direction,
            notional: p.notional,
            margin: p.margin,
            hl_quantity: p.hl_quantity,
            binance_quantity: p.binance_quantity,
            entry_time_ms: p.entry_time_ms,
            entry_apr: p.entry_apr,
            funding_collected: p.funding_collected,
            fees_paid: p.fees_paid,
            unrealized_pnl: Decimal::ZERO,
            periods_held: p.periods_held,
        }
    }
}

/// Why a pair is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SpreadFlipped,
    BelowExitThreshold,
    StopLoss,
    TakeProfit,
    EndOfData,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SpreadFlipped => "spread_flipped",
            ExitReason::BelowExitThreshold => "below_exit_threshold",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StopTrigger> for ExitReason {
    fn from(trigger: StopTrigger) -> Self {
        match trigger {
            StopTrigger::StopLoss => ExitReason::StopLoss,
            StopTrigger::TakeProfit => ExitReason::TakeProfit,
        }
    }
}

/// Strategy decision for one funding period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Flat and nothing to do
    Wait,
    Enter(SpreadDirection),
    Hold,
    Exit(ExitReason),
}

/// Enter on a wide spread, exit when it narrows, flips or hits a stop.
#[derive(Debug, Clone)]
pub struct ThresholdStrategy {
    /// Minimum |annualized spread| to enter, in %
    pub entry_threshold_apr: Decimal,
    /// Exit once |annualized spread| drops below this, in %
    pub exit_threshold_apr: Decimal,
    pub stops: StopRules,
    /// Periods before threshold and take-profit exits apply
    pub min_holding_periods: u32,
}

impl ThresholdStrategy {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            entry_threshold_apr: config.entry_threshold_apr,
            exit_threshold_apr: config.exit_threshold_apr,
            stops: StopRules::from_config(config),
            min_holding_periods: config.min_holding_periods,
        }
    }

    pub fn with_thresholds(mut self, entry_apr: Decimal, exit_apr: Decimal) -> Self {
        self.entry_threshold_apr = entry_apr;
        self.exit_threshold_apr = exit_apr;
        self
    }

    pub fn evaluate(&self, spread: &SpreadRecord, position: Option<&PairPosition>) -> Signal {
        let apr = spread.annualized_diff_pct.abs();

        let Some(position) = position else {
            return match SpreadDirection::from_spread(spread.diff_rate) {
                Some(direction) if apr >= self.entry_threshold_apr => Signal::Enter(direction),
                _ => Signal::Wait,
            };
        };

        let pnl = position.pnl();
        if self.stops.is_stop_loss(pnl, position.margin) {
            return Signal::Exit(ExitReason::StopLoss);
        }

        if let Some(current) = SpreadDirection::from_spread(spread.diff_rate) {
            if current != position.direction {
                return Signal::Exit(ExitReason::SpreadFlipped);
            }
        }

        if position.periods_held < self.min_holding_periods {
            return Signal::Hold;
        }

        if let Some(trigger) = self.stops.check(pnl, position.margin) {
            return Signal::Exit(trigger.into());
        }

        if apr < self.exit_threshold_apr {
            return Signal::Exit(ExitReason::BelowExitThreshold);
        }

        Signal::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> ThresholdStrategy {
        ThresholdStrategy {
            entry_threshold_apr: dec!(20),
            exit_threshold_apr: dec!(5),
            stops: StopRules {
                stop_loss_pct: dec!(0.05),
                take_profit_pct: dec!(0.10),
            },
            min_holding_periods: 3,
        }
    }

    /// Spread row for a given annualized difference on an 8h period.
    fn spread(apr: Decimal) -> SpreadRecord {
        let diff = apr / dec!(109500);
        SpreadRecord {
            hyperliquid_time_ms: 0,
            binance_time_ms: 0,
            hyperliquid_rate: Decimal::ZERO,
            hyperliquid_adjusted: diff,
            binance_rate: Decimal::ZERO,
            diff_rate: diff,
            annualized_diff_pct: apr,
        }
    }

    fn position(direction: SpreadDirection, periods_held: u32) -> PairPosition {
        let mut p = PairPosition::new(
            PairConfig::from_base("ENA"),
            direction,
            dec!(2000),
            dec!(2000),
            0,
            dec!(25),
        );
        p.periods_held = periods_held;
        p
    }

    #[test]
    fn test_entry_threshold_and_direction() {
        let s = strategy();
        assert_eq!(s.evaluate(&spread(dec!(19.9)), None), Signal::Wait);
        assert_eq!(
            s.evaluate(&spread(dec!(20)), None),
            Signal::Enter(SpreadDirection::ShortHlLongOther)
        );
        assert_eq!(
            s.evaluate(&spread(dec!(-35)), None),
            Signal::Enter(SpreadDirection::LongHlShortOther)
        );
    }

    #[test]
    fn test_exit_below_threshold_after_min_hold() {
        let s = strategy();
        let young = position(SpreadDirection::ShortHlLongOther, 1);
        assert_eq!(s.evaluate(&spread(dec!(2)), Some(&young)), Signal::Hold);

        let old = position(SpreadDirection::ShortHlLongOther, 3);
        assert_eq!(
            s.evaluate(&spread(dec!(2)), Some(&old)),
            Signal::Exit(ExitReason::BelowExitThreshold)
        );
        assert_eq!(s.evaluate(&spread(dec!(10)), Some(&old)), Signal::Hold);
    }

    #[test]
    fn test_flip_exits_regardless_of_age() {
        let s = strategy();
        let p = position(SpreadDirection::ShortHlLongOther, 0);
        assert_eq!(
            s.evaluate(&spread(dec!(-30)), Some(&p)),
            Signal::Exit(ExitReason::SpreadFlipped)
        );
        // A zero spread is not a flip
        assert_eq!(s.evaluate(&spread(Decimal::ZERO), Some(&p)), Signal::Hold);
    }

    #[test]
    fn test_stop_loss_and_take_profit() {
        let s = strategy();

        let mut losing = position(SpreadDirection::LongHlShortOther, 0);
        losing.fees_paid = dec!(100);
        assert_eq!(
            s.evaluate(&spread(dec!(-30)), Some(&losing)),
            Signal::Exit(ExitReason::StopLoss)
        );

        let mut winning = position(SpreadDirection::LongHlShortOther, 1);
        winning.funding_collected = dec!(250);
        // Take-profit waits for the minimum holding period
        assert_eq!(s.evaluate(&spread(dec!(-30)), Some(&winning)), Signal::Hold);
        winning.periods_held = 5;
        assert_eq!(
            s.evaluate(&spread(dec!(-30)), Some(&winning)),
            Signal::Exit(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn test_funding_sign_by_direction() {
        let short_hl = position(SpreadDirection::ShortHlLongOther, 0);
        assert_eq!(short_hl.funding_for(dec!(0.0001)), dec!(0.2));
        let long_hl = position(SpreadDirection::LongHlShortOther, 0);
        assert_eq!(long_hl.funding_for(dec!(-0.0001)), dec!(0.2));
    }

    #[test]
    fn test_persisted_round_trip_keeps_direction() {
        let mut p = position(SpreadDirection::LongHlShortOther, 4);
        p.unrealized_pnl = dec!(12);
        let restored = PairPosition::from(PersistedPair::from(&p));
        assert_eq!(restored.direction, SpreadDirection::LongHlShortOther);
        assert_eq!(restored.periods_held, 4);
        assert_eq!(restored.unrealized_pnl, Decimal::ZERO);
    }
}
