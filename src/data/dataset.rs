//! CSV datasets.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use tracing::debug;

use crate::exchange::{KlineInterval, Venue};

/// File name for a candle export, e.g. `binance_BTC_1h.csv`.
pub fn kline_file_name(venue: Venue, base: &str, interval: KlineInterval) -> String {
    format!("{}_{}_{}.csv", venue.as_str(), base, interval)
}

/// Write rows with a header line, creating parent directories.
pub fn write_csv<T: Serialize, P: AsRef<Path>>(path: P, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut wtr = csv::Writer::from_writer(file);
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("Failed to write row to {:?}", path))?;
    }
    wtr.flush()?;

    debug!(path = ?path, rows = rows.len(), "CSV written");
    Ok(())
}

/// Read all rows of a CSV file with a header line.
pub fn read_csv<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;

    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Invalid row {} in {:?}", i + 1, path)))
        .collect()
}
