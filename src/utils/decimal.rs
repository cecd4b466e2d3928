//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Funding periods per year for a funding period of `period_hours`.
///
/// An 8h period gives `24 / 8 * 365 = 1095`.
pub fn annualization_factor(period_hours: u32) -> Decimal {
    if period_hours == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(24) / Decimal::from(period_hours) * Decimal::from(365)
}

/// Annualize a per-period rate difference, in percent.
pub fn annualized_pct(rate: Decimal, period_hours: u32) -> Decimal {
    rate * annualization_factor(period_hours) * dec!(100)
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

/// Lossy conversion for statistics and charts.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annualization() {
        assert_eq!(annualization_factor(8), dec!(1095));
        assert_eq!(annualization_factor(1), dec!(8760));
        assert_eq!(annualization_factor(0), Decimal::ZERO);
        // 0.01% per 8h = 10.95% APR
        assert_eq!(annualized_pct(dec!(0.0001), 8), dec!(10.95));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![(dec!(100), dec!(2)), (dec!(200), dec!(1))];
        let avg = weighted_average(&values);
        assert!(avg > dec!(133) && avg < dec!(134));
        assert_eq!(weighted_average(&[]), Decimal::ZERO);
    }
}
