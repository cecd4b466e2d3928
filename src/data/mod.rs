//! Market data collection and CSV datasets.
//!
//! - `collector`: paginated historical fetches and live funding polling
//! - `dataset`: CSV read/write for spread, funding and candle series

mod collector;
mod dataset;

pub use collector::{connector_for, HistoricalCollector, HistoricalData, LiveCollector};
pub use dataset::{kline_file_name, read_csv, write_csv};
