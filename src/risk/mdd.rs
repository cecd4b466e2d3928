//! Maximum drawdown tracking.

use rust_decimal::Decimal;
use tracing::warn;

/// Tracks peak equity and drawdown, latching a halt once the limit is hit.
#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    /// Maximum allowed drawdown (e.g., 0.10 for 10%)
    max_drawdown: Decimal,
    /// Peak equity value observed
    peak_equity: Decimal,
    /// Current drawdown from peak
    current_drawdown: Decimal,
    /// Maximum drawdown observed this session
    session_mdd: Decimal,
    /// Set once the limit is breached; blocks new entries for the session
    halted: bool,
}

impl DrawdownTracker {
    pub fn new(max_drawdown: Decimal, initial_equity: Decimal) -> Self {
        Self {
            max_drawdown,
            peak_equity: initial_equity,
            current_drawdown: Decimal::ZERO,
            session_mdd: Decimal::ZERO,
            halted: false,
        }
    }

    /// Update with new equity value.
    ///
    /// Returns true on the update that first breaches the limit.
    pub fn update(&mut self, equity: Decimal) -> bool {
        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.current_drawdown = Decimal::ZERO;
        } else if self.peak_equity > Decimal::ZERO {
            self.current_drawdown = (self.peak_equity - equity) / self.peak_equity;

            if self.current_drawdown > self.session_mdd {
                self.session_mdd = self.current_drawdown;
                warn!(
                    mdd = %self.session_mdd,
                    peak = %self.peak_equity,
                    current = %equity,
                    "New maximum drawdown recorded"
                );
            }
        }

        if !self.halted && self.current_drawdown >= self.max_drawdown {
            self.halted = true;
            warn!(
                drawdown = %self.current_drawdown,
                limit = %self.max_drawdown,
                "Maximum drawdown breached, halting new entries"
            );
            return true;
        }
        false
    }

    /// Current drawdown from peak (0.0-1.0).
    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    /// Worst drawdown this session (0.0-1.0).
    pub fn session_mdd(&self) -> Decimal {
        self.session_mdd
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_drawdown_tracking() {
        let mut tracker = DrawdownTracker::new(dec!(0.05), dec!(10000));

        assert!(!tracker.update(dec!(10500)));
        assert_eq!(tracker.peak_equity(), dec!(10500));
        assert_eq!(tracker.current_drawdown(), Decimal::ZERO);

        // (10500 - 10000) / 10500 ≈ 4.76%
        assert!(!tracker.update(dec!(10000)));
        assert!(tracker.current_drawdown() > dec!(0.04));
        assert!(!tracker.is_halted());

        assert!(tracker.update(dec!(9900)));
        assert!(tracker.is_halted());
        // Breach is reported once
        assert!(!tracker.update(dec!(9800)));
    }

    #[test]
    fn test_halt_latches() {
        let mut tracker = DrawdownTracker::new(dec!(0.10), dec!(1000));
        tracker.update(dec!(880));
        assert!(tracker.is_halted());

        // Recovery alone does not clear the halt
        tracker.update(dec!(990));
        assert!(tracker.is_halted());
        assert_eq!(tracker.session_mdd(), dec!(0.12));
        assert_eq!(tracker.peak_equity(), dec!(1000));
    }
}
