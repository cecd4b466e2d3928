//! Funding-difference chart and text summaries.

use anyhow::{anyhow, Result};
use plotters::prelude::*;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::strategy::{SpreadRecord, SpreadSummary};
use crate::utils::{format_timestamp, ms_to_datetime, to_f64, HOUR_MS};

const CHART_SIZE: (u32, u32) = (1200, 600);

/// Draw the annualized funding difference over time as an SVG line chart.
pub fn plot_funding_rate_difference<P: AsRef<Path>>(
    records: &[SpreadRecord],
    path: P,
    title: &str,
) -> Result<()> {
    let path = path.as_ref();
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        anyhow::bail!("No records to plot");
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let points: Vec<(f64, f64)> = records
        .iter()
        .map(|r| (r.binance_time_ms as f64, to_f64(r.annualized_diff_pct)))
        .collect();

    let x_start = first.binance_time_ms as f64;
    let mut x_end = last.binance_time_ms as f64;
    if x_end <= x_start {
        x_end = x_start + HOUR_MS as f64;
    }

    let (y_min, y_max) = points
        .iter()
        .fold((0.0f64, 0.0f64), |(lo, hi), (_, y)| (lo.min(*y), hi.max(*y)));
    let pad = ((y_max - y_min) * 0.1).max(1.0);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("Failed to draw chart: {}", e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_start..x_end, (y_min - pad)..(y_max + pad))
        .map_err(|e| anyhow!("Failed to build chart: {}", e))?;

    chart
        .configure_mesh()
        .x_desc("Time (UTC)")
        .y_desc("Annualized difference (%)")
        .x_labels(8)
        .x_label_formatter(&|x| {
            ms_to_datetime(*x as i64)
                .map(|dt| dt.format("%m-%d %H:%M").to_string())
                .unwrap_or_default()
        })
        .y_label_formatter(&|y| format!("{:.1}", y))
        .draw()
        .map_err(|e| anyhow!("Failed to draw mesh: {}", e))?;

    chart
        .draw_series(LineSeries::new(vec![(x_start, 0.0), (x_end, 0.0)], &BLACK))
        .map_err(|e| anyhow!("Failed to draw zero line: {}", e))?;

    chart
        .draw_series(LineSeries::new(points, &BLUE))
        .map_err(|e| anyhow!("Failed to draw series: {}", e))?;

    root.present()
        .map_err(|e| anyhow!("Failed to write {:?}: {}", path, e))?;

    info!(path = ?path, points = records.len(), "Chart written");
    Ok(())
}

/// Multi-line text summary of a comparison.
pub fn summary_report(records: &[SpreadRecord]) -> String {
    let (Some(summary), Some(first), Some(last)) =
        (SpreadSummary::from_records(records), records.first(), records.last())
    else {
        return "No matched funding periods".to_string();
    };

    format!(
        "Funding comparison: {} periods from {} to {}\n\
         Annualized difference (HL - Binance):\n  \
         mean {:.2}%  min {:.2}%  max {:.2}%  std-dev {:.2}%\n\
         Hyperliquid paid more in {:.1}% of periods",
        summary.count,
        format_timestamp(first.binance_time_ms),
        format_timestamp(last.binance_time_ms),
        summary.mean_apr,
        summary.min_apr,
        summary.max_apr,
        summary.std_dev_apr,
        summary.hyperliquid_higher_share * 100.0,
    )
}

/// Fixed-width table of the most recent `limit` rows.
pub fn comparison_table(records: &[SpreadRecord], limit: usize) -> String {
    let mut out = format!(
        "{:<20} {:>14} {:>14} {:>14} {:>12}\n",
        "time", "hl_adjusted", "binance", "diff", "apr_%"
    );
    let skip = records.len().saturating_sub(limit);
    for r in records.iter().skip(skip) {
        out.push_str(&format!(
            "{:<20} {:>14.8} {:>14.8} {:>14.8} {:>12.2}\n",
            format_timestamp(r.binance_time_ms),
            r.hyperliquid_adjusted,
            r.binance_rate,
            r.diff_rate,
            r.annualized_diff_pct,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::annualized_pct;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn records() -> Vec<SpreadRecord> {
        [dec!(0.0001), dec!(-0.00005), dec!(0.0002)]
            .into_iter()
            .enumerate()
            .map(|(i, diff)| {
                let t = 1_700_000_000_000 + i as i64 * 8 * HOUR_MS;
                SpreadRecord {
                    hyperliquid_time_ms: t,
                    binance_time_ms: t,
                    hyperliquid_rate: diff / dec!(8),
                    hyperliquid_adjusted: diff,
                    binance_rate: Decimal::ZERO,
                    diff_rate: diff,
                    annualized_diff_pct: annualized_pct(diff, 8),
                }
            })
            .collect()
    }

    #[test]
    fn test_plot_writes_svg() {
        let path = std::env::temp_dir()
            .join(format!("funding-rate-arb-report-{}", std::process::id()))
            .join("diff.svg");

        plot_funding_rate_difference(&records(), &path, "BTC funding difference").unwrap();

        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("polyline"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_plot_rejects_empty() {
        let path = std::env::temp_dir().join("funding-rate-arb-empty.svg");
        assert!(plot_funding_rate_difference(&[], &path, "empty").is_err());
    }

    #[test]
    fn test_summary_and_table() {
        let rows = records();
        let text = summary_report(&rows);
        assert!(text.contains("3 periods"));
        assert!(text.contains("max 21.90%"));

        let table = comparison_table(&rows, 2);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().nth(2).unwrap().contains("21.90"));

        assert_eq!(summary_report(&[]), "No matched funding periods");
    }
}
