//! Hyperliquid exchange integration.
//!
//! Market data, funding history, candles and read-only positions through the
//! `/info` endpoint. Order placement needs wallet signatures and is not
//! available through this client.
//!
//! # Funding Rate Notes
//!
//! Hyperliquid funding is paid **hourly** at 1/8th of the computed 8-hour rate.
//! This differs from Binance which pays every 8 hours (4h on some symbols).
//!
//! When comparing rates:
//! - Hyperliquid hourly rate × funding period hours = equivalent period rate
//! - Funding cap on HL is 4%/hour (vs tighter caps on CEXs)

mod client;
mod types;

pub use client::HyperliquidClient;
pub use types::*;
