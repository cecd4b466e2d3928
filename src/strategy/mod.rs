//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Matching historical funding between venues
//! - Scanning current cross-venue spreads
//! - Threshold entry/exit signals
//! - Two-leg order execution

mod executor;
mod scanner;
mod signal;
mod spread;

pub use executor::{PairEntry, PairExecutor, PairExit};
pub use scanner::CrossVenueScanner;
pub use signal::{ExitReason, PairPosition, Signal, ThresholdStrategy};
pub use spread::{
    compare_funding_rates, compare_funding_rates_over_time, SpreadRecord, SpreadSummary,
    DEFAULT_TIME_TOLERANCE_MS,
};
