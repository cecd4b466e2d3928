//! Exchange integrations for cross-venue funding rate arbitrage.
//!
//! ## Binance
//! REST and WebSocket connectivity for:
//! - Market data (premium index, funding history, klines)
//! - Account operations (orders, leverage, positions)
//!
//! ## Hyperliquid
//! `/info` access for funding rates, funding history, candles and positions.
//!
//! ## Paper
//! Simulated fills against live mark prices for either venue.

pub mod binance;
pub mod hyperliquid;
mod paper;
pub mod rate_limit;
mod traits;
mod types;
mod websocket;

pub use binance::BinanceClient;
pub use hyperliquid::HyperliquidClient;
pub use paper::{PaperAccount, PaperExchange, PaperPosition};
pub use traits::{ExchangeConnector, Venue};
pub use types::*;
pub use websocket::{BinanceMarkPriceStream, MarkPriceUpdate, WsEvent};

#[cfg(test)]
pub use traits::MockExchangeConnector;
