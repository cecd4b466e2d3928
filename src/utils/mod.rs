//! Shared helpers for decimal arithmetic and timestamps.

mod decimal;
mod time;

pub use decimal::*;
pub use time::*;
