//! Performance metrics calculation for backtesting.
//!
//! Provides Sharpe ratio, Sortino ratio, drawdown analysis, and more.
//! Each equity point is one funding period, so annualization uses
//! `8760 / period_hours` periods per year.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::engine::ClosedTrade;
use crate::utils::{format_timestamp, to_f64, HOUR_MS};

const HOURS_PER_YEAR: f64 = 8760.0;

/// A point on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time_ms: i64,
    pub equity: Decimal,
    /// Drawdown from the running peak (0.0-1.0)
    pub drawdown: Decimal,
    pub in_position: bool,
}

impl EquityPoint {
    pub fn new(time_ms: i64, equity: Decimal, peak_equity: Decimal, in_position: bool) -> Self {
        let drawdown = if peak_equity > Decimal::ZERO && equity < peak_equity {
            (peak_equity - equity) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            time_ms,
            equity,
            drawdown,
            in_position,
        }
    }
}

/// Backtest performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,
    /// Compounded annual return, in %
    pub annualized_return_pct: f64,

    // Risk
    /// Maximum drawdown (0.0-1.0)
    pub max_drawdown: Decimal,
    /// Longest time spent below a previous peak, in hours
    pub max_drawdown_duration_hours: i64,
    /// Annualized volatility of period returns
    pub volatility: f64,

    // Risk-adjusted
    /// Sharpe ratio (assuming 0 risk-free rate)
    pub sharpe_ratio: f64,
    /// Sortino ratio (downside deviation only)
    pub sortino_ratio: f64,
    /// Calmar ratio (annualized return / max drawdown)
    pub calmar_ratio: f64,

    // Strategy-specific
    pub total_funding: Decimal,
    /// Fees and slippage on all fills
    pub total_fees: Decimal,

    // Activity
    /// Closed round trips
    pub total_trades: usize,
    /// Profitable trades / total, in %
    pub win_rate: f64,
    pub avg_holding_periods: f64,

    // Time
    pub periods: usize,
    pub duration_days: f64,
}

impl BacktestMetrics {
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
        trades: &[ClosedTrade],
        period_hours: u32,
    ) -> Self {
        let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
            return Self::empty();
        };

        let duration_days = (last.time_ms - first.time_ms) as f64 / (24 * HOUR_MS) as f64;
        // Each point covers one period, so n points span n periods
        let years = equity_curve.len() as f64 * f64::from(period_hours) / HOURS_PER_YEAR;
        let periods_per_year = if period_hours > 0 {
            HOURS_PER_YEAR / f64::from(period_hours)
        } else {
            0.0
        };

        let total_return = last.equity - initial_balance;
        let total_return_pct = if initial_balance > Decimal::ZERO {
            total_return / initial_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let annualized_return_pct = if years > 0.0 && initial_balance > Decimal::ZERO {
            let growth = to_f64(last.equity) / to_f64(initial_balance);
            if growth > 0.0 {
                (growth.powf(1.0 / years) - 1.0) * 100.0
            } else {
                -100.0
            }
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration_hours) = calculate_max_drawdown(equity_curve);

        let returns = calculate_period_returns(equity_curve, initial_balance);
        let volatility = std_dev(&returns) * periods_per_year.sqrt();
        let sharpe_ratio = calculate_sharpe(&returns, periods_per_year);
        let sortino_ratio = calculate_sortino(&returns, periods_per_year);
        let calmar_ratio = if max_drawdown > Decimal::ZERO {
            annualized_return_pct / (to_f64(max_drawdown) * 100.0)
        } else {
            0.0
        };

        let total_funding = trades.iter().map(|t| t.funding).sum();
        let total_fees = trades.iter().map(|t| t.fees).sum();
        let wins = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let (win_rate, avg_holding_periods) = if trades.is_empty() {
            (0.0, 0.0)
        } else {
            let n = trades.len() as f64;
            let held: u32 = trades.iter().map(|t| t.periods_held).sum();
            (wins as f64 / n * 100.0, f64::from(held) / n)
        };

        Self {
            total_return,
            total_return_pct,
            annualized_return_pct,
            max_drawdown,
            max_drawdown_duration_hours,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            total_funding,
            total_fees,
            total_trades: trades.len(),
            win_rate,
            avg_holding_periods,
            periods: equity_curve.len(),
            duration_days,
        }
    }

    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            annualized_return_pct: 0.0,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_hours: 0,
            volatility: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            total_funding: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            total_trades: 0,
            win_rate: 0.0,
            avg_holding_periods: 0.0,
            periods: 0,
            duration_days: 0.0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({:.1} days, {} periods)
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)
  Annualized:        {:.2}%

RISK
  Max Drawdown:      {:.2}% ({}h)
  Volatility:        {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}
  Calmar Ratio:      {:.3}

FUNDING
  Funding Collected: ${:.2}
  Fees & Slippage:   ${:.2}
  Net:               ${:.2}

ACTIVITY
  Trades:            {}
  Win Rate:          {:.1}%
  Avg Holding:       {:.1} periods
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.periods,
            self.total_return,
            self.total_return_pct,
            self.annualized_return_pct,
            self.max_drawdown * dec!(100),
            self.max_drawdown_duration_hours,
            self.volatility * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.total_funding,
            self.total_fees,
            self.total_funding - self.total_fees,
            self.total_trades,
            self.win_rate,
            self.avg_holding_periods,
        )
    }
}

/// Per-period returns, the first measured against the initial balance.
fn calculate_period_returns(equity_curve: &[EquityPoint], initial_balance: Decimal) -> Vec<f64> {
    let mut prev = to_f64(initial_balance);
    equity_curve
        .iter()
        .map(|point| {
            let equity = to_f64(point.equity);
            let r = if prev > 0.0 { (equity - prev) / prev } else { 0.0 };
            prev = equity;
            r
        })
        .collect()
}

/// Maximum drawdown and the longest underwater stretch in hours.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, i64) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.equity;
    let mut peak_time = first.time_ms;
    let mut max_dd = Decimal::ZERO;
    let mut max_duration_ms = 0;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            peak_time = point.time_ms;
        } else {
            if peak > Decimal::ZERO {
                max_dd = max_dd.max((peak - point.equity) / peak);
            }
            max_duration_ms = max_duration_ms.max(point.time_ms - peak_time);
        }
    }

    (max_dd, max_duration_ms / HOUR_MS)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Annualized Sharpe ratio (assuming 0 risk-free rate).
fn calculate_sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    let sd = std_dev(returns);
    if sd < 1e-12 {
        return 0.0;
    }
    mean(returns) / sd * periods_per_year.sqrt()
}

/// Annualized Sortino ratio, capped at 100 with no losing periods.
fn calculate_sortino(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if mean(returns) > 0.0 { 100.0 } else { 0.0 };
    }

    let downside_deviation =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_deviation < 1e-12 {
        return 100.0;
    }

    mean(returns) / downside_deviation * periods_per_year.sqrt()
}

/// One-line description of an equity point for logs.
pub(crate) fn describe_point(point: &EquityPoint) -> String {
    format!(
        "{} equity={:.2} dd={:.2}%",
        format_timestamp(point.time_ms),
        point.equity,
        point.drawdown * dec!(100)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SpreadDirection;
    use crate::strategy::ExitReason;

    const PERIOD_MS: i64 = 8 * HOUR_MS;

    fn curve(equities: &[Decimal]) -> Vec<EquityPoint> {
        let mut peak = Decimal::ZERO;
        equities
            .iter()
            .enumerate()
            .map(|(i, e)| {
                peak = peak.max(*e);
                EquityPoint::new(i as i64 * PERIOD_MS, *e, peak, true)
            })
            .collect()
    }

    fn trade(pnl: Decimal, periods_held: u32) -> ClosedTrade {
        ClosedTrade {
            direction: SpreadDirection::ShortHlLongOther,
            entry_time_ms: 0,
            exit_time_ms: 0,
            periods_held,
            funding: pnl + dec!(2),
            fees: dec!(2),
            pnl,
            exit_reason: ExitReason::BelowExitThreshold,
        }
    }

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(0, dec!(9500), dec!(10000), false);
        assert_eq!(point.drawdown, dec!(0.05));

        let above_peak = EquityPoint::new(0, dec!(10100), dec!(10000), false);
        assert_eq!(above_peak.drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_calculation() {
        let points = curve(&[dec!(10000), dec!(10500), dec!(9500), dec!(9800), dec!(11000)]);

        let (max_dd, duration) = calculate_max_drawdown(&points);
        // 10500 -> 9500
        assert!(max_dd > dec!(0.095) && max_dd < dec!(0.096));
        // Underwater from period 1 to period 3
        assert_eq!(duration, 16);
    }

    #[test]
    fn test_period_returns() {
        let points = curve(&[dec!(10100), dec!(10100), dec!(9999)]);
        let returns = calculate_period_returns(&points, dec!(10000));
        assert_eq!(returns.len(), 3);
        assert!((returns[0] - 0.01).abs() < 1e-12);
        assert_eq!(returns[1], 0.0);
        assert!((returns[2] + 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_steady_growth_metrics() {
        // +1 per 8h period for 1095 periods = one year
        let equities: Vec<Decimal> = (1..=1095).map(|i| dec!(10000) + Decimal::from(i)).collect();
        let points = curve(&equities);
        let trades = vec![trade(dec!(1095), 1095)];

        let m = BacktestMetrics::calculate(&points, dec!(10000), &trades, 8);

        assert_eq!(m.total_return, dec!(1095));
        assert_eq!(m.total_return_pct, dec!(10.95));
        assert!((m.annualized_return_pct - 10.95).abs() < 1e-6);
        assert_eq!(m.max_drawdown, Decimal::ZERO);
        assert_eq!(m.calmar_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 100.0);
        assert!(m.sharpe_ratio > 100.0);
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.win_rate, 100.0);
        assert_eq!(m.avg_holding_periods, 1095.0);
        assert_eq!(m.total_funding, dec!(1097));
        assert_eq!(m.periods, 1095);
    }

    #[test]
    fn test_losing_trades_and_drawdown() {
        let points = curve(&[dec!(10000), dec!(9900), dec!(9950), dec!(9850)]);
        let trades = vec![trade(dec!(-100), 2), trade(dec!(-50), 1), trade(dec!(20), 3)];

        let m = BacktestMetrics::calculate(&points, dec!(10000), &trades, 8);
        assert_eq!(m.max_drawdown, dec!(0.015));
        assert!(m.sharpe_ratio < 0.0);
        assert!(m.sortino_ratio < 0.0);
        assert!(m.calmar_ratio < 0.0);
        assert!((m.win_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.avg_holding_periods, 2.0);
    }

    #[test]
    fn test_empty_curve() {
        let m = BacktestMetrics::calculate(&[], dec!(10000), &[], 8);
        assert_eq!(m.periods, 0);
        assert!(m.summary().contains("BACKTEST RESULTS"));
    }
}
