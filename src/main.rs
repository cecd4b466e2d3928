//! Funding Rate Arb - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use funding_rate_arb::backtest::{load_spread_records, BacktestEngine, ParameterSpace, SweepRunner};
use funding_rate_arb::config::{Config, LoggingConfig, PairConfig};
use funding_rate_arb::data::{connector_for, write_csv, HistoricalCollector, LiveCollector};
use funding_rate_arb::exchange::{
    BinanceClient, BinanceMarkPriceStream, HyperliquidClient, KlineInterval, Venue, WsEvent,
};
use funding_rate_arb::persistence::PersistenceManager;
use funding_rate_arb::report::{comparison_table, plot_funding_rate_difference, summary_report};
use funding_rate_arb::strategy::{compare_funding_rates_over_time, CrossVenueScanner};
use funding_rate_arb::trader::ArbTrader;
use funding_rate_arb::utils::{format_timestamp, now_ms, parse_time_ms, DAY_MS};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Funding Rate Arb CLI
#[derive(Parser)]
#[command(name = "funding-rate-arb")]
#[command(version, about = "Funding rate arbitrage between Binance and Hyperliquid")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, global = true, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare historical funding rates of one asset across both venues
    Compare {
        /// Base asset (e.g. BTC)
        base: String,

        /// History window in days (default: data.history_days)
        #[arg(short, long)]
        days: Option<u32>,

        /// CSV output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// SVG chart path
        #[arg(long)]
        chart: Option<PathBuf>,

        /// Rows to print from the end of the comparison
        #[arg(long, default_value = "20")]
        rows: usize,
    },

    /// Download historical candles and funding for one or more assets
    Fetch {
        /// Base assets (default: configured pairs)
        bases: Vec<String>,

        /// Candle interval (1m, 5m, 1h, 4h, 1d, ...)
        #[arg(short, long, default_value = "1h")]
        interval: String,

        /// Start date (YYYY-MM-DD or RFC 3339)
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD or RFC 3339)
        #[arg(short, long)]
        end: Option<String>,

        /// Directory for CSV files (default: data.export_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also store the downloads in the SQLite database
        #[arg(long)]
        store: bool,
    },

    /// Poll current funding rates for the configured pairs into SQLite
    Collect,

    /// Rank current funding spreads across every listed asset
    Scan {
        /// Minimum absolute 8h spread
        #[arg(short, long, default_value = "0.0001")]
        min_spread: f64,

        /// Maximum rows to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Stream Binance mark prices and funding rates
    Monitor {
        /// Binance symbols to show (default: configured pairs)
        symbols: Vec<String>,
    },

    /// Run a backtest over an exported funding comparison
    Backtest {
        /// CSV produced by `compare`
        #[arg(short, long)]
        data: PathBuf,

        /// Entry threshold override (APR %)
        #[arg(long)]
        entry: Option<f64>,

        /// Exit threshold override (APR %)
        #[arg(long)]
        exit: Option<f64>,

        /// Leverage override
        #[arg(long)]
        leverage: Option<u8>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run a parameter sweep over an exported funding comparison
    Sweep {
        /// CSV produced by `compare`
        #[arg(short, long)]
        data: PathBuf,

        /// Number of parallel backtests
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,

        /// Use minimal parameter space (faster, for testing)
        #[arg(long)]
        minimal: bool,
    },

    /// Run the paper-trading loop
    Run {
        /// Close every open pair on shutdown
        #[arg(long)]
        close_on_exit: bool,

        /// Discard persisted paper accounts and open pairs before starting
        #[arg(long)]
        reset: bool,
    },

    /// Show persisted paper-trading state
    Status {
        /// Path to SQLite database (default: data.database_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Show funding breakdown and equity history
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config)?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Compare {
            base,
            days,
            output,
            chart,
            rows,
        } => run_compare(&config, &base, days, output, chart, rows).await,
        Commands::Fetch {
            bases,
            interval,
            start,
            end,
            output,
            store,
        } => run_fetch(&config, bases, &interval, start, end, output, store).await,
        Commands::Collect => run_collect(&config).await,
        Commands::Scan { min_spread, limit } => run_scan(&config, min_spread, limit).await,
        Commands::Monitor { symbols } => run_monitor(&config, symbols).await,
        Commands::Backtest {
            data,
            entry,
            exit,
            leverage,
            output,
        } => run_backtest(config, &data, entry, exit, leverage, output.as_deref()),
        Commands::Sweep {
            data,
            parallelism,
            output,
            minimal,
        } => run_sweep(&config, &data, parallelism, output.as_deref(), minimal).await,
        Commands::Run {
            close_on_exit,
            reset,
        } => run_trader(config, close_on_exit, reset).await,
        Commands::Status { db, verbose } => {
            let db = db.unwrap_or_else(|| config.data.database_path.clone());
            show_status(&db, verbose)
        }
    }
}

/// Console plus daily rolling file output.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("Failed to create log directory {}", config.directory))?;

    let file_appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    if config.json {
        builder.json().init();
    } else {
        builder
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    Ok(())
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                let _ = tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                tx.closed().await;
            }
        }
    });
    rx
}

fn to_decimal(value: f64, name: &str) -> Result<Decimal> {
    Decimal::try_from(value).with_context(|| format!("Invalid {}: {}", name, value))
}

async fn run_compare(
    config: &Config,
    base: &str,
    days: Option<u32>,
    output: Option<PathBuf>,
    chart: Option<PathBuf>,
    rows: usize,
) -> Result<()> {
    let pair = PairConfig::from_base(base);
    let days = days.unwrap_or(config.data.history_days);
    let hyperliquid = connector_for(Venue::Hyperliquid, &config.exchanges)?;
    let binance = connector_for(Venue::Binance, &config.exchanges)?;

    info!(
        hl = %pair.hyperliquid,
        binance = %pair.binance,
        days,
        multiplier = config.trading.funding_multiplier,
        "Comparing funding rates"
    );

    let records = compare_funding_rates_over_time(
        hyperliquid.as_ref(),
        binance.as_ref(),
        &pair.hyperliquid,
        &pair.binance,
        days,
        config.trading.funding_multiplier,
        config.data.time_tolerance_ms,
    )
    .await?;

    println!("\n{}\n", summary_report(&records));
    if records.is_empty() {
        warn!("No funding periods matched within tolerance, nothing to export");
        return Ok(());
    }
    println!("{}", comparison_table(&records, rows));

    let export_dir = Path::new(&config.data.export_dir);
    let csv_path = output.unwrap_or_else(|| {
        export_dir.join(format!("{}_funding_comparison.csv", pair.hyperliquid))
    });
    write_csv(&csv_path, &records)?;
    info!(path = %csv_path.display(), rows = records.len(), "Comparison saved");

    let chart_path = chart.unwrap_or_else(|| {
        export_dir.join(format!("{}_funding_difference.svg", pair.hyperliquid))
    });
    let title = format!(
        "{}: Hyperliquid x{} vs Binance funding (annualized %)",
        pair.hyperliquid, config.trading.funding_multiplier
    );
    plot_funding_rate_difference(&records, &chart_path, &title)?;

    Ok(())
}

async fn run_fetch(
    config: &Config,
    bases: Vec<String>,
    interval: &str,
    start: Option<String>,
    end: Option<String>,
    output: Option<PathBuf>,
    store: bool,
) -> Result<()> {
    let interval: KlineInterval = interval.parse()?;
    let end_ms = end.as_deref().map(parse_time_ms).transpose()?.unwrap_or_else(now_ms);
    let start_ms = match start.as_deref() {
        Some(s) => parse_time_ms(s)?,
        None => end_ms - i64::from(config.data.history_days) * DAY_MS,
    };
    anyhow::ensure!(start_ms < end_ms, "start must be before end");

    let bases = if bases.is_empty() {
        config
            .trading
            .pairs
            .iter()
            .map(|p| p.hyperliquid.clone())
            .collect()
    } else {
        bases
    };

    let save_dir = output.unwrap_or_else(|| PathBuf::from(&config.data.export_dir));
    let persistence = if store {
        Some(PersistenceManager::new(&config.data.database_path)?)
    } else {
        None
    };

    info!(
        assets = bases.len(),
        %interval,
        start = %format_timestamp(start_ms),
        end = %format_timestamp(end_ms),
        "Fetching historical data"
    );

    let collector = HistoricalCollector::from_config(&config.exchanges)?;
    for base in &bases {
        let pair = PairConfig::from_base(base);

        let data = collector
            .fetch_historical_data(base, interval, start_ms, end_ms, Some(&save_dir))
            .await?;

        let (bn_funding, hl_funding) = tokio::try_join!(
            collector.fetch_funding(Venue::Binance, &pair.binance, start_ms, end_ms),
            collector.fetch_funding(Venue::Hyperliquid, &pair.hyperliquid, start_ms, end_ms),
        )?;

        for (venue, records) in [(Venue::Binance, &bn_funding), (Venue::Hyperliquid, &hl_funding)] {
            if records.is_empty() {
                continue;
            }
            let path = save_dir.join(format!("{}_{}_funding.csv", venue.as_str(), pair.hyperliquid));
            write_csv(&path, records)?;
            info!(%venue, path = %path.display(), rows = records.len(), "Saved funding history");
        }

        if let Some(persistence) = &persistence {
            let klines = data.store(persistence)?;
            let funding = persistence.store_funding_records(&bn_funding)?
                + persistence.store_funding_records(&hl_funding)?;
            info!(base = %pair.hyperliquid, klines, funding, "Stored historical data");
        }

        println!(
            "{:<8} candles: binance {:>6}  hyperliquid {:>6}   funding: binance {:>5}  hyperliquid {:>5}",
            pair.hyperliquid,
            data.binance.len(),
            data.hyperliquid.len(),
            bn_funding.len(),
            hl_funding.len()
        );
    }

    Ok(())
}

async fn run_collect(config: &Config) -> Result<()> {
    let persistence = PersistenceManager::new(&config.data.database_path)?;
    let collector = LiveCollector::new(
        HistoricalCollector::from_config(&config.exchanges)?,
        config.trading.pairs.clone(),
        Duration::from_secs(config.data.collection_interval_secs),
    );

    collector.run(&persistence, shutdown_signal()).await
}

async fn run_scan(config: &Config, min_spread: f64, limit: usize) -> Result<()> {
    let binance = BinanceClient::new(&config.exchanges.binance)?;
    let hyperliquid = HyperliquidClient::new(&config.exchanges.hyperliquid)?;
    let scanner = CrossVenueScanner::new(to_decimal(min_spread, "min spread")?);

    let spreads = scanner.scan(&binance, &hyperliquid).await?;
    info!(found = spreads.len(), "Scan complete");

    // Quoted spread on the Binance leg, in basis points
    let books: HashMap<String, Decimal> = match binance.get_book_tickers().await {
        Ok(tickers) => tickers
            .into_iter()
            .filter(|t| t.bid_price > Decimal::ZERO)
            .map(|t| {
                let mid = (t.bid_price + t.ask_price) / Decimal::TWO;
                (t.symbol, (t.ask_price - t.bid_price) / mid * Decimal::from(10_000))
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to fetch book tickers");
            HashMap::new()
        }
    };

    println!(
        "\n{:<10} {:<14} {:>12} {:>12} {:>12} {:>10} {:>8}  {}",
        "coin", "symbol", "hl_8h", "binance_8h", "spread_8h", "apr_%", "bn_bps", "direction"
    );
    for spread in spreads.iter().take(limit) {
        let book_bps = books
            .get(&spread.symbol)
            .map(|bps| format!("{:.2}", bps))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<14} {:>12.6} {:>12.6} {:>12.6} {:>10.2} {:>8}  {}",
            spread.hl_coin,
            spread.symbol,
            spread.hl_funding_8h,
            spread.other_funding_8h,
            spread.spread_8h,
            spread.spread_annualized_pct,
            book_bps,
            spread
                .recommended_direction
                .map(|d| d.as_str())
                .unwrap_or("-"),
        );
    }
    if spreads.len() > limit {
        println!("... {} more", spreads.len() - limit);
    }
    println!();
    Ok(())
}

async fn run_monitor(config: &Config, symbols: Vec<String>) -> Result<()> {
    let symbols: HashSet<String> = if symbols.is_empty() {
        config.trading.pairs.iter().map(|p| p.binance.clone()).collect()
    } else {
        symbols.into_iter().map(|s| s.to_uppercase()).collect()
    };

    let (tx, mut rx) = mpsc::channel(1024);
    let shutdown = shutdown_signal();
    let handle = BinanceMarkPriceStream::new(config.exchanges.binance.testnet).spawn(tx, shutdown);

    info!(symbols = symbols.len(), "Monitoring Binance mark prices, Ctrl-C to stop");

    while let Some(event) = rx.recv().await {
        match event {
            WsEvent::MarkPrice(update) if symbols.contains(&update.symbol) => {
                println!(
                    "{}  {:<12} mark {:>14.4}  funding {:>11.8}  next {}",
                    format_timestamp(now_ms()),
                    update.symbol,
                    update.mark_price,
                    update.funding_rate,
                    format_timestamp(update.next_funding_time),
                );
            }
            WsEvent::MarkPrice(_) => {}
            WsEvent::Connected => info!("Stream connected"),
            WsEvent::Disconnected => warn!("Stream disconnected, reconnecting"),
        }
    }

    handle.await.context("Stream task failed")?;
    Ok(())
}

fn run_backtest(
    mut config: Config,
    data: &Path,
    entry: Option<f64>,
    exit: Option<f64>,
    leverage: Option<u8>,
    output_dir: Option<&str>,
) -> Result<()> {
    if let Some(entry) = entry {
        config.trading.entry_threshold_apr = to_decimal(entry, "entry threshold")?;
    }
    if let Some(exit) = exit {
        config.trading.exit_threshold_apr = to_decimal(exit, "exit threshold")?;
    }
    if let Some(leverage) = leverage {
        config.trading.leverage = leverage;
    }
    config.validate()?;

    info!("Loading spreads from: {}", data.display());
    let records = load_spread_records(data)?;
    info!(periods = records.len(), "Loaded funding comparison");

    let engine = BacktestEngine::from_config(&config);
    let result = engine.run(&records)?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("Equity curve saved to: {}", equity_path);

        let trades_path = format!("{}/trades.csv", dir);
        result.trades_to_csv(&trades_path)?;
        info!("Trades saved to: {}", trades_path);
    }

    Ok(())
}

async fn run_sweep(
    config: &Config,
    data: &Path,
    parallelism: usize,
    output_dir: Option<&str>,
    minimal: bool,
) -> Result<()> {
    info!("Loading spreads from: {}", data.display());
    let records = Arc::new(load_spread_records(data)?);

    let space = if minimal {
        ParameterSpace::minimal()
    } else {
        ParameterSpace::default()
    };

    let runner = SweepRunner::new(space, BacktestEngine::from_config(config), parallelism);
    let results = runner.run(records).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let results_path = format!("{}/sweep_results.csv", dir);
        results.to_csv(&results_path)?;
        info!("Sweep results saved to: {}", results_path);

        if let Some((params, best)) = results.best_sharpe() {
            let equity_path = format!("{}/best_sharpe_equity.csv", dir);
            best.equity_to_csv(&equity_path)?;
            info!("Best Sharpe equity curve ({}) saved to: {}", params.describe(), equity_path);
        }
    }

    Ok(())
}

async fn run_trader(config: Config, close_on_exit: bool, reset: bool) -> Result<()> {
    info!(
        "Funding Rate Arb v{} - paper trading {} pairs",
        env!("CARGO_PKG_VERSION"),
        config.trading.pairs.len()
    );
    log_config(&config);

    if reset {
        PersistenceManager::new(&config.data.database_path)?.clear_trading_state()?;
        warn!("Persisted paper state cleared");
    }

    let mut trader = ArbTrader::from_config(config).await?;
    trader.run(shutdown_signal(), close_on_exit).await
}

fn log_config(config: &Config) {
    let t = &config.trading;
    info!("Configuration:");
    for pair in &t.pairs {
        info!("   Pair: {} / {}", pair.hyperliquid, pair.binance);
    }
    info!("   Position size: ${} x{} (max x{})", t.position_size, t.leverage, t.max_leverage);
    info!(
        "   Entry/exit: {}% / {}% APR, min hold {} periods",
        t.entry_threshold_apr, t.exit_threshold_apr, t.min_holding_periods
    );
    info!(
        "   Stop loss {}%, take profit {}%",
        t.stop_loss_pct * Decimal::ONE_HUNDRED,
        t.take_profit_pct * Decimal::ONE_HUNDRED
    );
    info!(
        "   Risk: max drawdown {}%, max {} open pairs",
        config.risk.max_drawdown * Decimal::ONE_HUNDRED,
        config.risk.max_open_positions
    );
    info!("   Database: {}", config.data.database_path);
}

fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PAPER TRADING STATUS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\nDatabase not found: {}", db_path);
        println!("   The trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let mut total_initial = Decimal::ZERO;
    let mut total_balance = Decimal::ZERO;
    for venue in [Venue::Hyperliquid, Venue::Binance] {
        let Some(account) = persistence.load_account(venue)? else {
            println!("\n{}: no saved account", venue);
            continue;
        };
        total_initial += account.initial_balance;
        total_balance += account.balance;

        println!("\n{} account", venue);
        println!("   ├─ Initial Balance:  ${:.2}", account.initial_balance);
        println!("   ├─ Balance:          ${:.2}", account.balance);
        println!("   ├─ Funding:          ${:.4}", account.total_funding);
        println!("   ├─ Fees:             ${:.4}", account.total_fees);
        println!("   ├─ Realized PnL:     ${:.4}", account.realized_pnl);
        println!("   ├─ Orders:           {}", account.order_count);
        println!("   └─ Last Updated:     {}", account.last_saved.format("%Y-%m-%d %H:%M:%S UTC"));

        for (symbol, pos) in &account.positions {
            println!(
                "       {} {} @ ${:.4} (funding ${:.4})",
                symbol, pos.quantity, pos.entry_price, pos.funding_received
            );
        }
    }

    if total_initial > Decimal::ZERO {
        let pnl = total_balance - total_initial;
        println!(
            "\nCombined balance ${:.2}, PnL ${:.2} ({:+.2}%)",
            total_balance,
            pnl,
            pnl / total_initial * Decimal::ONE_HUNDRED
        );
    }

    let pairs = persistence.load_pairs()?;
    println!("\nOpen pairs: {}", pairs.len());
    for pair in &pairs {
        println!("   ┌─ {} / {}", pair.hyperliquid, pair.binance);
        println!("   ├─ Direction: {}", pair.direction.as_str());
        println!("   ├─ Notional:  ${:.2} per leg", pair.notional);
        println!("   ├─ Entry APR: {:.2}%", pair.entry_apr);
        println!(
            "   ├─ Funding:   ${:.4} over {} periods",
            pair.funding_collected, pair.periods_held
        );
        println!("   ├─ Fees:      ${:.4}", pair.fees_paid);
        println!("   └─ Opened:    {}", format_timestamp(pair.entry_time_ms));
    }

    if verbose {
        let stats = persistence.get_funding_stats()?;
        if !stats.is_empty() {
            let mut stats: Vec<_> = stats.into_iter().collect();
            stats.sort();
            println!("\nFunding by symbol");
            for (key, total) in &stats {
                println!("   ├─ {}: ${:.4}", key, total);
            }
        }

        let snapshots = persistence.get_recent_snapshots(10)?;
        if !snapshots.is_empty() {
            println!("\nRecent equity snapshots");
            for (ts, equity) in &snapshots {
                println!("   ├─ {}: ${:.2}", ts.format("%Y-%m-%d %H:%M"), equity);
            }
        }

        println!("\nTables");
        for (table, count) in persistence.table_counts()? {
            println!("   ├─ {:<18} {}", table, count);
        }
    }

    println!();
    Ok(())
}
