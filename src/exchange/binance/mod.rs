//! Binance USDⓈ-M Futures integration.
//!
//! Public market data (premium index, funding history, klines) plus signed
//! order placement, leverage and position queries.
//!
//! Funding settles every `fundingIntervalHours` (8h unless `fundingInfo`
//! lists the symbol with a shorter period).

mod client;
mod types;

pub use client::{sign_query, BinanceClient, DEFAULT_FUNDING_INTERVAL_HOURS};
pub use types::*;
