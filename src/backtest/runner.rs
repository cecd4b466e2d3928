//! Parameter sweep runner for backtesting optimization.
//!
//! Allows testing multiple threshold and leverage combinations in parallel.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::backtest::{BacktestEngine, BacktestResult};
use crate::data::write_csv;
use crate::strategy::SpreadRecord;
use crate::utils::to_f64;

/// Defines the parameter space to explore during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    /// Entry thresholds, annualized %
    pub entry_threshold_apr: Vec<Decimal>,
    /// Exit thresholds, annualized %
    pub exit_threshold_apr: Vec<Decimal>,
    pub leverage: Vec<u8>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            entry_threshold_apr: vec![dec!(10), dec!(20), dec!(30), dec!(50)],
            exit_threshold_apr: vec![dec!(0), dec!(5), dec!(10)],
            leverage: vec![1, 2, 3],
        }
    }
}

/// One parameter combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    pub entry_threshold_apr: Decimal,
    pub exit_threshold_apr: Decimal,
    pub leverage: u8,
}

impl SweepParams {
    pub fn describe(&self) -> String {
        format!(
            "entry≥{}% exit<{}% lev={}x",
            self.entry_threshold_apr, self.exit_threshold_apr, self.leverage
        )
    }
}

impl ParameterSpace {
    /// Create a minimal parameter space for quick testing.
    pub fn minimal() -> Self {
        Self {
            entry_threshold_apr: vec![dec!(20)],
            exit_threshold_apr: vec![dec!(5)],
            leverage: vec![2],
        }
    }

    /// All combinations where the exit threshold does not exceed the entry
    /// threshold and leverage is non-zero.
    pub fn combinations(&self) -> Vec<SweepParams> {
        let mut combos = Vec::new();
        for &entry_threshold_apr in &self.entry_threshold_apr {
            for &exit_threshold_apr in &self.exit_threshold_apr {
                if exit_threshold_apr > entry_threshold_apr {
                    continue;
                }
                for &leverage in &self.leverage {
                    if leverage == 0 {
                        continue;
                    }
                    combos.push(SweepParams {
                        entry_threshold_apr,
                        exit_threshold_apr,
                        leverage,
                    });
                }
            }
        }
        combos
    }
}

/// Flat CSV row for one sweep run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRow {
    pub entry_threshold_apr: Decimal,
    pub exit_threshold_apr: Decimal,
    pub leverage: u8,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown_pct: Decimal,
    pub total_funding: Decimal,
    pub total_fees: Decimal,
    pub trades: usize,
    pub win_rate: f64,
}

impl SweepRow {
    fn new(params: &SweepParams, result: &BacktestResult) -> Self {
        let m = &result.metrics;
        Self {
            entry_threshold_apr: params.entry_threshold_apr,
            exit_threshold_apr: params.exit_threshold_apr,
            leverage: params.leverage,
            total_return_pct: m.total_return_pct,
            annualized_return_pct: m.annualized_return_pct,
            sharpe_ratio: m.sharpe_ratio,
            sortino_ratio: m.sortino_ratio,
            calmar_ratio: m.calmar_ratio,
            max_drawdown_pct: m.max_drawdown * dec!(100),
            total_funding: m.total_funding,
            total_fees: m.total_fees,
            trades: m.total_trades,
            win_rate: m.win_rate,
        }
    }
}

/// Results from a parameter sweep.
#[derive(Debug, Clone)]
pub struct SweepResults {
    /// All individual run results
    pub runs: Vec<(SweepParams, BacktestResult)>,

    /// Best run by Sharpe ratio
    pub best_by_sharpe: Option<usize>,

    /// Best run by total return
    pub best_by_return: Option<usize>,

    /// Best run by Calmar ratio (return/drawdown)
    pub best_by_calmar: Option<usize>,

    /// Total combinations tested
    pub total_combinations: usize,

    pub failed_runs: usize,
}

impl SweepResults {
    fn from_runs(
        runs: Vec<(SweepParams, BacktestResult)>,
        total_combinations: usize,
        failed_runs: usize,
    ) -> Self {
        let best_by_sharpe = best_by(&runs, |r| r.metrics.sharpe_ratio);
        let best_by_return = best_by(&runs, |r| to_f64(r.metrics.total_return_pct));
        let best_by_calmar = best_by(&runs, |r| r.metrics.calmar_ratio);

        Self {
            runs,
            best_by_sharpe,
            best_by_return,
            best_by_calmar,
            total_combinations,
            failed_runs,
        }
    }

    pub fn successful_runs(&self) -> usize {
        self.runs.len()
    }

    /// Get the best result by Sharpe ratio.
    pub fn best_sharpe(&self) -> Option<&(SweepParams, BacktestResult)> {
        self.best_by_sharpe.and_then(|i| self.runs.get(i))
    }

    /// Get the best result by total return.
    pub fn best_return(&self) -> Option<&(SweepParams, BacktestResult)> {
        self.best_by_return.and_then(|i| self.runs.get(i))
    }

    /// Get the best result by Calmar ratio.
    pub fn best_calmar(&self) -> Option<&(SweepParams, BacktestResult)> {
        self.best_by_calmar.and_then(|i| self.runs.get(i))
    }

    pub fn rows(&self) -> Vec<SweepRow> {
        self.runs
            .iter()
            .map(|(params, result)| SweepRow::new(params, result))
            .collect()
    }

    /// Export results to CSV.
    pub fn to_csv(&self, path: &str) -> Result<()> {
        write_csv(path, &self.rows())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("PARAMETER SWEEP RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Total: {} | Successful: {} | Failed: {}\n\n",
            self.total_combinations,
            self.successful_runs(),
            self.failed_runs
        ));

        if let Some((params, result)) = self.best_sharpe() {
            s.push_str("BEST BY SHARPE RATIO:\n");
            s.push_str(&format!("  Params: {}\n", params.describe()));
            s.push_str(&format!(
                "  Sharpe: {:.3} | Return: {:.2}% | MaxDD: {:.2}%\n\n",
                result.metrics.sharpe_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        if let Some((params, result)) = self.best_return() {
            s.push_str("BEST BY RETURN:\n");
            s.push_str(&format!("  Params: {}\n", params.describe()));
            s.push_str(&format!(
                "  Return: {:.2}% | Sharpe: {:.3} | MaxDD: {:.2}%\n\n",
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        if let Some((params, result)) = self.best_calmar() {
            s.push_str("BEST BY CALMAR RATIO:\n");
            s.push_str(&format!("  Params: {}\n", params.describe()));
            s.push_str(&format!(
                "  Calmar: {:.3} | Return: {:.2}% | MaxDD: {:.2}%\n",
                result.metrics.calmar_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

fn best_by(
    runs: &[(SweepParams, BacktestResult)],
    key: impl Fn(&BacktestResult) -> f64,
) -> Option<usize> {
    runs.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            key(&a.1)
                .partial_cmp(&key(&b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Parameter sweep runner for parallel backtesting.
pub struct SweepRunner {
    parameter_space: ParameterSpace,
    base: BacktestEngine,
    parallelism: usize,
}

impl SweepRunner {
    /// Create a new sweep runner; each combination overrides `base`.
    pub fn new(parameter_space: ParameterSpace, base: BacktestEngine, parallelism: usize) -> Self {
        Self {
            parameter_space,
            base,
            parallelism: parallelism.max(1),
        }
    }

    fn engine_for(&self, params: &SweepParams) -> BacktestEngine {
        let mut config = self.base.config().clone();
        config.leverage = params.leverage;
        let strategy = self
            .base
            .strategy()
            .clone()
            .with_thresholds(params.entry_threshold_apr, params.exit_threshold_apr);
        self.base.clone().with_config(config).with_strategy(strategy)
    }

    /// Run the parameter sweep.
    pub async fn run(&self, records: Arc<Vec<SpreadRecord>>) -> Result<SweepResults> {
        let combos = self.parameter_space.combinations();
        let total_combinations = combos.len();
        anyhow::ensure!(total_combinations > 0, "Parameter space has no valid combinations");

        info!(
            combinations = total_combinations,
            parallelism = self.parallelism,
            "Starting parameter sweep"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(total_combinations);

        for (i, params) in combos.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let engine = self.engine_for(&params);
            let records = records.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                info!("[{}/{}] Testing: {}", i + 1, total_combinations, params.describe());

                match engine.run(&records) {
                    Ok(result) => {
                        info!(
                            "[{}/{}] Complete: Sharpe={:.3} Return={:.2}%",
                            i + 1,
                            total_combinations,
                            result.metrics.sharpe_ratio,
                            result.metrics.total_return_pct
                        );
                        Some((params, result))
                    }
                    Err(e) => {
                        warn!("[{}/{}] Failed: {}", i + 1, total_combinations, e);
                        None
                    }
                }
            });

            handles.push(handle);
        }

        // Collect results
        let mut runs = Vec::new();
        let mut failed_runs = 0;

        for handle in handles {
            match handle.await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => failed_runs += 1,
                Err(e) => {
                    warn!("Task panicked: {}", e);
                    failed_runs += 1;
                }
            }
        }

        Ok(SweepResults::from_runs(runs, total_combinations, failed_runs))
    }
}
