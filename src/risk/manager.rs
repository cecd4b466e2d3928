//! Pre-trade limits and pair exit rules.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::config::{RiskConfig, TradingConfig};

/// Why an entry was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("leverage {leverage}x exceeds maximum {max}x")]
    LeverageTooHigh { leverage: u8, max: u8 },

    #[error("margin {margin} exceeds {limit} ({pct} of equity)")]
    PositionTooLarge {
        margin: Decimal,
        limit: Decimal,
        pct: Decimal,
    },

    #[error("{open} pairs already open (max {max})")]
    TooManyPositions { open: usize, max: usize },

    #[error("margin {margin} exceeds available equity {equity}")]
    InsufficientEquity { margin: Decimal, equity: Decimal },
}

/// Account-level entry limits.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    max_leverage: u8,
}

impl RiskManager {
    pub fn new(config: RiskConfig, max_leverage: u8) -> Self {
        Self {
            config,
            max_leverage,
        }
    }

    /// Check a new pair with `notional` per leg at `leverage`.
    ///
    /// The pair commits `2 * notional / leverage` of margin across both venues.
    pub fn check_order(
        &self,
        notional: Decimal,
        leverage: u8,
        equity: Decimal,
        open_pairs: usize,
    ) -> Result<(), RiskRejection> {
        if leverage == 0 || leverage > self.max_leverage {
            return Err(RiskRejection::LeverageTooHigh {
                leverage,
                max: self.max_leverage,
            });
        }

        if open_pairs >= self.config.max_open_positions {
            return Err(RiskRejection::TooManyPositions {
                open: open_pairs,
                max: self.config.max_open_positions,
            });
        }

        let margin = Decimal::TWO * notional / Decimal::from(leverage);
        if margin > equity {
            return Err(RiskRejection::InsufficientEquity { margin, equity });
        }

        let limit = equity * self.config.max_position_pct;
        if margin > limit {
            return Err(RiskRejection::PositionTooLarge {
                margin,
                limit,
                pct: self.config.max_position_pct,
            });
        }

        debug!(%notional, leverage, %margin, %equity, open_pairs, "Risk check passed");
        Ok(())
    }
}

/// Which exit rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    StopLoss,
    TakeProfit,
}

/// Stop-loss and take-profit thresholds as fractions of pair margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopRules {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl StopRules {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        }
    }

    pub fn is_stop_loss(&self, pnl: Decimal, margin: Decimal) -> bool {
        pnl <= -self.stop_loss_pct * margin
    }

    pub fn is_take_profit(&self, pnl: Decimal, margin: Decimal) -> bool {
        pnl >= self.take_profit_pct * margin
    }

    /// Stop-loss wins when both would fire (zero margin).
    pub fn check(&self, pnl: Decimal, margin: Decimal) -> Option<StopTrigger> {
        if self.is_stop_loss(pnl, margin) {
            Some(StopTrigger::StopLoss)
        } else if self.is_take_profit(pnl, margin) {
            Some(StopTrigger::TakeProfit)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        RiskManager::new(
            RiskConfig {
                max_drawdown: dec!(0.1),
                max_position_pct: dec!(0.4),
                max_open_positions: 2,
            },
            5,
        )
    }

    #[test]
    fn test_accepts_order_within_limits() {
        // 2 legs * 2000 / 2x = 2000 margin vs 4000 limit
        assert!(manager().check_order(dec!(2000), 2, dec!(10000), 0).is_ok());
    }

    #[test]
    fn test_rejects_excess_leverage() {
        assert_eq!(
            manager().check_order(dec!(1000), 10, dec!(10000), 0),
            Err(RiskRejection::LeverageTooHigh { leverage: 10, max: 5 })
        );
    }

    #[test]
    fn test_rejects_oversized_position() {
        let err = manager()
            .check_order(dec!(5000), 2, dec!(10000), 0)
            .unwrap_err();
        assert!(matches!(err, RiskRejection::PositionTooLarge { .. }));

        let err = manager().check_order(dec!(5000), 1, dec!(8000), 0).unwrap_err();
        assert!(matches!(err, RiskRejection::InsufficientEquity { .. }));
    }

    #[test]
    fn test_rejects_too_many_positions() {
        assert_eq!(
            manager().check_order(dec!(100), 2, dec!(10000), 2),
            Err(RiskRejection::TooManyPositions { open: 2, max: 2 })
        );
    }

    #[test]
    fn test_stop_rules() {
        let rules = StopRules {
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.10),
        };
        assert_eq!(rules.check(dec!(-100), dec!(2000)), Some(StopTrigger::StopLoss));
        assert_eq!(rules.check(dec!(-99), dec!(2000)), None);
        assert_eq!(rules.check(dec!(200), dec!(2000)), Some(StopTrigger::TakeProfit));
        assert_eq!(rules.check(dec!(199.99), dec!(2000)), None);
    }
}
