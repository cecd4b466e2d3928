//! Risk management for cross-venue funding arbitrage.
//!
//! - Entry limits on leverage, pair size and open pair count
//! - Stop-loss / take-profit rules on pair PnL
//! - Maximum drawdown tracking with an entry halt

mod manager;
mod mdd;

pub use manager::{RiskManager, RiskRejection, StopRules, StopTrigger};
pub use mdd::DrawdownTracker;
