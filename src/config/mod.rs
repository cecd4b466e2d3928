//! Configuration management for the funding rate arbitrage system.
//!
//! Loads settings from `config.yaml` (optional), a `.env` file and
//! `FRA__*` environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange credentials and request budgets
    #[serde(default)]
    pub exchanges: ExchangesConfig,
    /// Trading parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Account-level risk limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Data collection settings
    #[serde(default)]
    pub data: DataConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Notification channels
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangesConfig {
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub hyperliquid: HyperliquidConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret used to sign requests
    #[serde(default)]
    pub api_secret: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Request budget (Binance weight limit is 2400/min, we stay well below)
    #[serde(default = "default_binance_rpm")]
    pub requests_per_minute: u32,
    /// Retries per request before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperliquidConfig {
    /// Wallet address used for read-only position queries
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Request budget (info endpoint allows ~1200 weight/min)
    #[serde(default = "default_hyperliquid_rpm")]
    pub requests_per_minute: u32,
    /// Retries per request before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// A Hyperliquid coin and its Binance perpetual counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Hyperliquid coin (e.g., "ENA")
    pub hyperliquid: String,
    /// Binance symbol (e.g., "ENAUSDT")
    pub binance: String,
}

impl PairConfig {
    /// Build a pair from a base asset using the `<BASE>USDT` convention.
    pub fn from_base(base: &str) -> Self {
        let base = base.to_uppercase();
        Self {
            binance: format!("{}USDT", base),
            hyperliquid: base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Pairs to monitor and trade
    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairConfig>,
    /// Margin committed per leg in USD
    #[serde(default = "default_position_size")]
    pub position_size: Decimal,
    /// Leverage applied to each leg
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Maximum leverage allowed
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u8,
    /// Close when pair PnL <= -stop_loss_pct * margin (0.0-1.0)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Close when pair PnL >= take_profit_pct * margin (0.0-1.0)
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    /// Slippage assumed per fill and tolerated on live fills (0.0-1.0)
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    /// Enter when |annualized difference| reaches this (in %, e.g. 20 = 20% APR)
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold_apr: Decimal,
    /// Exit when |annualized difference| falls below this (in %)
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold_apr: Decimal,
    /// Hours in the Binance funding period used to scale Hyperliquid's hourly rate
    #[serde(default = "default_funding_multiplier")]
    pub funding_multiplier: u32,
    /// Taker fee per fill (0.0-1.0)
    #[serde(default = "default_taker_fee")]
    pub taker_fee: Decimal,
    /// Funding periods to hold before threshold exits are considered
    #[serde(default = "default_min_holding_periods")]
    pub min_holding_periods: u32,
    /// Starting balance for paper trading and backtests
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum allowable drawdown before new entries halt (0.0-1.0)
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    /// Maximum margin of a single pair as a share of equity (0.0-1.0)
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,
    /// Maximum concurrently open pairs
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Live collector polling interval
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    /// Trading loop polling interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Default history window for comparisons
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Directory for CSV and chart exports
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    /// Tolerance when matching funding timestamps across venues
    #[serde(default = "default_time_tolerance_ms")]
    pub time_tolerance_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for rolling log files
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

// Default value functions
fn default_binance_rpm() -> u32 {
    1200
}

fn default_hyperliquid_rpm() -> u32 {
    600
}

fn default_max_retries() -> u32 {
    5
}

fn default_pairs() -> Vec<PairConfig> {
    vec![PairConfig::from_base("BTC"), PairConfig::from_base("ETH")]
}

fn default_position_size() -> Decimal {
    Decimal::new(1000, 0) // $1000 margin per leg
}

fn default_leverage() -> u8 {
    2
}

fn default_max_leverage() -> u8 {
    5
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(5, 4) // 0.0005 (0.05%)
}

fn default_entry_threshold() -> Decimal {
    Decimal::new(20, 0) // 20% APR
}

fn default_exit_threshold() -> Decimal {
    Decimal::new(5, 0) // 5% APR
}

fn default_funding_multiplier() -> u32 {
    8
}

fn default_taker_fee() -> Decimal {
    Decimal::new(4, 4) // 0.0004 (0.04%)
}

fn default_min_holding_periods() -> u32 {
    3 // one day of 8h periods
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10000, 0)
}

fn default_max_drawdown() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_position_pct() -> Decimal {
    Decimal::new(40, 2) // 0.40
}

fn default_max_open_positions() -> usize {
    3
}

fn default_collection_interval() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    60
}

fn default_history_days() -> u32 {
    14
}

fn default_database_path() -> String {
    "data/funding.db".to_string()
}

fn default_export_dir() -> String {
    "data/historical".to_string()
}

fn default_time_tolerance_ms() -> i64 {
    300_000 // 5 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "funding-arb.log".to_string()
}

impl Config {
    /// Load `path` (extension optional, may be missing), `.env` and `FRA__*`
    /// environment overrides.
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::default()
                    .prefix("FRA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;

        anyhow::ensure!(!t.pairs.is_empty(), "trading.pairs must not be empty");

        anyhow::ensure!(
            t.position_size > Decimal::ZERO,
            "position_size must be positive"
        );

        anyhow::ensure!(
            t.leverage >= 1 && t.leverage <= t.max_leverage,
            "leverage must be >= 1 and <= max_leverage"
        );

        anyhow::ensure!(
            t.stop_loss_pct > Decimal::ZERO && t.stop_loss_pct <= Decimal::ONE,
            "stop_loss_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            t.take_profit_pct > Decimal::ZERO,
            "take_profit_pct must be positive"
        );

        anyhow::ensure!(
            t.slippage_tolerance >= Decimal::ZERO && t.slippage_tolerance < Decimal::ONE,
            "slippage_tolerance must be between 0 and 1"
        );

        anyhow::ensure!(
            t.exit_threshold_apr >= Decimal::ZERO
                && t.exit_threshold_apr <= t.entry_threshold_apr,
            "exit_threshold_apr must be >= 0 and <= entry_threshold_apr"
        );

        anyhow::ensure!(
            t.funding_multiplier > 0 && t.funding_multiplier <= 24,
            "funding_multiplier must be between 1 and 24 hours"
        );

        anyhow::ensure!(
            self.risk.max_drawdown > Decimal::ZERO && self.risk.max_drawdown <= Decimal::ONE,
            "max_drawdown must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.max_position_pct > Decimal::ZERO
                && self.risk.max_position_pct <= Decimal::ONE,
            "max_position_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.data.poll_interval_secs > 0 && self.data.collection_interval_secs > 0,
            "polling intervals must be positive"
        );

        anyhow::ensure!(
            self.data.time_tolerance_ms >= 0,
            "time_tolerance_ms must not be negative"
        );

        let telegram = &self.notifications.telegram;
        anyhow::ensure!(
            !telegram.enabled || (!telegram.bot_token.is_empty() && !telegram.chat_id.is_empty()),
            "telegram notifications require bot_token and chat_id"
        );

        if self.notifications.email.enabled {
            warn!("Email notifications are configured but not delivered; use telegram instead");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: ExchangesConfig::default(),
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
            data: DataConfig::default(),
            logging: LoggingConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: false,
            requests_per_minute: default_binance_rpm(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            wallet_address: None,
            testnet: false,
            requests_per_minute: default_hyperliquid_rpm(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            pairs: default_pairs(),
            position_size: default_position_size(),
            leverage: default_leverage(),
            max_leverage: default_max_leverage(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            slippage_tolerance: default_slippage_tolerance(),
            entry_threshold_apr: default_entry_threshold(),
            exit_threshold_apr: default_exit_threshold(),
            funding_multiplier: default_funding_multiplier(),
            taker_fee: default_taker_fee(),
            min_holding_periods: default_min_holding_periods(),
            initial_balance: default_initial_balance(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown: default_max_drawdown(),
            max_position_pct: default_max_position_pct(),
            max_open_positions: default_max_open_positions(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval(),
            poll_interval_secs: default_poll_interval(),
            history_days: default_history_days(),
            database_path: default_database_path(),
            export_dir: default_export_dir(),
            time_tolerance_ms: default_time_tolerance_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_log_prefix(),
            json: false,
        }
    }
}
