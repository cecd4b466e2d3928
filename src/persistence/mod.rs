//! SQLite persistence for collected market data and paper trading state.
//!
//! Stores:
//! - Funding rate records and candles from both venues
//! - Paper account balances and positions per venue
//! - Open arbitrage pairs
//! - Funding and trade history
//! - Periodic equity snapshots

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::exchange::{FundingRecord, Kline, KlineInterval, OrderSide, SpreadDirection, Venue};

/// Persisted paper position on one venue.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPosition {
    pub symbol: String,
    /// Signed size: positive = long
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub funding_received: Decimal,
}

/// Persisted paper account for one venue.
#[derive(Debug, Clone)]
pub struct PersistedAccount {
    pub venue: Venue,
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
    pub positions: HashMap<String, PersistedPosition>,
    pub last_saved: DateTime<Utc>,
}

/// Persisted open arbitrage pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPair {
    pub hyperliquid: String,
    pub binance: String,
    pub direction: SpreadDirection,
    pub notional: Decimal,
    pub margin: Decimal,
    pub hl_quantity: Decimal,
    pub binance_quantity: Decimal,
    pub entry_time_ms: i64,
    pub entry_apr: Decimal,
    pub funding_collected: Decimal,
    pub fees_paid: Decimal,
    pub periods_held: u32,
}

/// Executed fill for the trade history.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub venue: Venue,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Why the trade happened (entry, exit reason, rollback)
    pub reason: String,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open (or create) the database, initializing the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    /// In-memory database.
    pub fn in_memory() -> Result<Self> {
        let manager = Self {
            conn: Connection::open_in_memory().context("Failed to open in-memory database")?,
        };
        manager.init_schema()?;
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS funding_rates (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                time_ms INTEGER NOT NULL,
                rate TEXT NOT NULL,
                premium TEXT,
                mark_price TEXT,
                PRIMARY KEY (venue, symbol, time_ms)
            );

            CREATE TABLE IF NOT EXISTS klines (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time_ms INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (venue, symbol, interval, open_time_ms)
            );

            -- Paper account per venue
            CREATE TABLE IF NOT EXISTS paper_accounts (
                venue TEXT PRIMARY KEY,
                initial_balance TEXT NOT NULL,
                balance TEXT NOT NULL,
                total_fees TEXT NOT NULL,
                total_funding TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                order_count INTEGER NOT NULL,
                last_saved TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paper_positions (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                funding_received TEXT NOT NULL,
                PRIMARY KEY (venue, symbol)
            );

            CREATE TABLE IF NOT EXISTS open_pairs (
                hyperliquid TEXT PRIMARY KEY,
                binance TEXT NOT NULL,
                direction TEXT NOT NULL,
                notional TEXT NOT NULL,
                margin TEXT NOT NULL,
                hl_quantity TEXT NOT NULL,
                binance_quantity TEXT NOT NULL,
                entry_time_ms INTEGER NOT NULL,
                entry_apr TEXT NOT NULL,
                funding_collected TEXT NOT NULL,
                fees_paid TEXT NOT NULL,
                periods_held INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS funding_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                rate TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_funding_events_symbol ON funding_events(symbol);

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                fee TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);

            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_equity TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                open_pairs INTEGER NOT NULL,
                drawdown TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON equity_snapshots(timestamp);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ==================== Market data ====================

    /// Insert funding records, ignoring ones already stored. Returns rows inserted.
    pub fn store_funding_records(&self, records: &[FundingRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO funding_rates (venue, symbol, time_ms, rate, premium, mark_price)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for r in records {
                inserted += stmt.execute(params![
                    r.venue.as_str(),
                    r.symbol,
                    r.time_ms,
                    r.rate.to_string(),
                    r.premium.map(|v| v.to_string()),
                    r.mark_price.map(|v| v.to_string()),
                ])?;
            }
        }
        tx.commit()?;

        debug!(count = records.len(), inserted, "Stored funding records");
        Ok(inserted)
    }

    /// Funding records in `[start_ms, end_ms]`, sorted by time.
    pub fn load_funding_records(
        &self,
        venue: Venue,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<FundingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT time_ms, rate, premium, mark_price
            FROM funding_rates
            WHERE venue = ?1 AND symbol = ?2 AND time_ms BETWEEN ?3 AND ?4
            ORDER BY time_ms
            "#,
        )?;

        let records = stmt
            .query_map(params![venue.as_str(), symbol, start_ms, end_ms], |row| {
                Ok(FundingRecord {
                    venue,
                    symbol: symbol.to_string(),
                    time_ms: row.get(0)?,
                    rate: parse_decimal(&row.get::<_, String>(1)?),
                    premium: row.get::<_, Option<String>>(2)?.map(|s| parse_decimal(&s)),
                    mark_price: row.get::<_, Option<String>>(3)?.map(|s| parse_decimal(&s)),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Insert candles, ignoring ones already stored. Returns rows inserted.
    pub fn store_klines(
        &self,
        venue: Venue,
        symbol: &str,
        interval: KlineInterval,
        klines: &[Kline],
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO klines (venue, symbol, interval, open_time_ms, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for k in klines {
                inserted += stmt.execute(params![
                    venue.as_str(),
                    symbol,
                    interval.as_str(),
                    k.open_time_ms,
                    k.open.to_string(),
                    k.high.to_string(),
                    k.low.to_string(),
                    k.close.to_string(),
                    k.volume.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Stored candles for a series, sorted by open time.
    pub fn load_klines(
        &self,
        venue: Venue,
        symbol: &str,
        interval: KlineInterval,
    ) -> Result<Vec<Kline>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT open_time_ms, open, high, low, close, volume
            FROM klines
            WHERE venue = ?1 AND symbol = ?2 AND interval = ?3
            ORDER BY open_time_ms
            "#,
        )?;

        let klines = stmt
            .query_map(params![venue.as_str(), symbol, interval.as_str()], |row| {
                Ok(Kline {
                    open_time_ms: row.get(0)?,
                    open: parse_decimal(&row.get::<_, String>(1)?),
                    high: parse_decimal(&row.get::<_, String>(2)?),
                    low: parse_decimal(&row.get::<_, String>(3)?),
                    close: parse_decimal(&row.get::<_, String>(4)?),
                    volume: parse_decimal(&row.get::<_, String>(5)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(klines)
    }

    /// Stored row counts per table for status output.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let tables = ["funding_rates", "klines", "open_pairs", "trades", "equity_snapshots"];
        tables
            .iter()
            .map(|table| -> Result<(&'static str, i64)> {
                let count: i64 = self.conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                )?;
                Ok((*table, count))
            })
            .collect()
    }

    // ==================== Paper trading state ====================

    /// Save a venue's paper account, replacing its positions.
    pub fn save_account(&self, account: &PersistedAccount) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let venue = account.venue.as_str();

        tx.execute(
            r#"
            INSERT INTO paper_accounts (venue, initial_balance, balance, total_fees, total_funding,
                                        realized_pnl, order_count, last_saved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(venue) DO UPDATE SET
                initial_balance = ?2,
                balance = ?3,
                total_fees = ?4,
                total_funding = ?5,
                realized_pnl = ?6,
                order_count = ?7,
                last_saved = ?8
            "#,
            params![
                venue,
                account.initial_balance.to_string(),
                account.balance.to_string(),
                account.total_fees.to_string(),
                account.total_funding.to_string(),
                account.realized_pnl.to_string(),
                account.order_count,
                account.last_saved.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM paper_positions WHERE venue = ?1", params![venue])?;

        for pos in account.positions.values() {
            tx.execute(
                r#"
                INSERT INTO paper_positions (venue, symbol, quantity, entry_price, opened_at, funding_received)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    venue,
                    pos.symbol,
                    pos.quantity.to_string(),
                    pos.entry_price.to_string(),
                    pos.opened_at.to_rfc3339(),
                    pos.funding_received.to_string(),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            venue,
            balance = %account.balance,
            positions = account.positions.len(),
            "Paper account saved"
        );
        Ok(())
    }

    /// Load a venue's paper account.
    pub fn load_account(&self, venue: Venue) -> Result<Option<PersistedAccount>> {
        let row: Option<(String, String, String, String, String, u64, String)> = self
            .conn
            .query_row(
                r#"
                SELECT initial_balance, balance, total_fees, total_funding, realized_pnl,
                       order_count, last_saved
                FROM paper_accounts WHERE venue = ?1
                "#,
                params![venue.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((initial_balance, balance, fees, funding, realized, order_count, last_saved)) = row
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol, quantity, entry_price, opened_at, funding_received
            FROM paper_positions WHERE venue = ?1
            "#,
        )?;

        let positions: HashMap<String, PersistedPosition> = stmt
            .query_map(params![venue.as_str()], |row| {
                let symbol: String = row.get(0)?;
                Ok((
                    symbol.clone(),
                    PersistedPosition {
                        symbol,
                        quantity: parse_decimal(&row.get::<_, String>(1)?),
                        entry_price: parse_decimal(&row.get::<_, String>(2)?),
                        opened_at: parse_datetime(&row.get::<_, String>(3)?),
                        funding_received: parse_decimal(&row.get::<_, String>(4)?),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let account = PersistedAccount {
            venue,
            initial_balance: parse_decimal(&initial_balance),
            balance: parse_decimal(&balance),
            total_fees: parse_decimal(&fees),
            total_funding: parse_decimal(&funding),
            realized_pnl: parse_decimal(&realized),
            order_count,
            positions,
            last_saved: parse_datetime(&last_saved),
        };

        info!(
            venue = %venue,
            balance = %account.balance,
            positions = account.positions.len(),
            last_saved = %account.last_saved,
            "Loaded paper account from database"
        );

        Ok(Some(account))
    }

    /// Replace the set of open pairs.
    pub fn save_pairs(&self, pairs: &[PersistedPair]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM open_pairs", [])?;

        for p in pairs {
            tx.execute(
                r#"
                INSERT INTO open_pairs (hyperliquid, binance, direction, notional, margin, hl_quantity,
                                        binance_quantity, entry_time_ms, entry_apr, funding_collected,
                                        fees_paid, periods_held)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    p.hyperliquid,
                    p.binance,
                    p.direction.as_str(),
                    p.notional.to_string(),
                    p.margin.to_string(),
                    p.hl_quantity.to_string(),
                    p.binance_quantity.to_string(),
                    p.entry_time_ms,
                    p.entry_apr.to_string(),
                    p.funding_collected.to_string(),
                    p.fees_paid.to_string(),
                    p.periods_held,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load open pairs. Rows with an unknown direction are skipped.
    pub fn load_pairs(&self) -> Result<Vec<PersistedPair>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT hyperliquid, binance, direction, notional, margin, hl_quantity, binance_quantity,
                   entry_time_ms, entry_apr, funding_collected, fees_paid, periods_held
            FROM open_pairs
            ORDER BY entry_time_ms
            "#,
        )?;

        let pairs = stmt
            .query_map([], |row| {
                let direction: String = row.get(2)?;
                Ok((
                    direction,
                    PersistedPair {
                        hyperliquid: row.get(0)?,
                        binance: row.get(1)?,
                        direction: SpreadDirection::ShortHlLongOther,
                        notional: parse_decimal(&row.get::<_, String>(3)?),
                        margin: parse_decimal(&row.get::<_, String>(4)?),
                        hl_quantity: parse_decimal(&row.get::<_, String>(5)?),
                        binance_quantity: parse_decimal(&row.get::<_, String>(6)?),
                        entry_time_ms: row.get(7)?,
                        entry_apr: parse_decimal(&row.get::<_, String>(8)?),
                        funding_collected: parse_decimal(&row.get::<_, String>(9)?),
                        fees_paid: parse_decimal(&row.get::<_, String>(10)?),
                        periods_held: row.get(11)?,
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(direction, mut pair)| match direction.parse() {
                Ok(d) => {
                    pair.direction = d;
                    Some(pair)
                }
                Err(e) => {
                    warn!(pair = %pair.hyperliquid, error = %e, "Skipping stored pair");
                    None
                }
            })
            .collect();

        Ok(pairs)
    }

    // ==================== History ====================

    /// Record a funding payment (positive = received).
    pub fn record_funding_event(
        &self,
        venue: Venue,
        symbol: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO funding_events (timestamp, venue, symbol, rate, amount)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                Utc::now().to_rfc3339(),
                venue.as_str(),
                symbol,
                rate.to_string(),
                amount.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Record an executed fill.
    pub fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trades (timestamp, venue, symbol, side, quantity, price, fee, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                Utc::now().to_rfc3339(),
                trade.venue.as_str(),
                trade.symbol,
                trade.side.as_str(),
                trade.quantity.to_string(),
                trade.price.to_string(),
                trade.fee.to_string(),
                trade.reason,
            ],
        )?;
        Ok(())
    }

    /// Record an equity snapshot.
    pub fn record_snapshot(
        &self,
        total_equity: Decimal,
        unrealized_pnl: Decimal,
        open_pairs: usize,
        drawdown: Decimal,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO equity_snapshots (timestamp, total_equity, unrealized_pnl, open_pairs, drawdown)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                Utc::now().to_rfc3339(),
                total_equity.to_string(),
                unrealized_pnl.to_string(),
                open_pairs,
                drawdown.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Total funding received keyed by `venue:symbol`.
    pub fn get_funding_stats(&self) -> Result<HashMap<String, Decimal>> {
        let mut stmt = self.conn.prepare(
            "SELECT venue, symbol, amount FROM funding_events",
        )?;

        let mut stats: HashMap<String, Decimal> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for (venue, symbol, amount) in rows.filter_map(|r| r.ok()) {
            *stats.entry(format!("{}:{}", venue, symbol)).or_default() += parse_decimal(&amount);
        }

        Ok(stats)
    }

    /// Most recent equity snapshots, newest first.
    pub fn get_recent_snapshots(&self, limit: usize) -> Result<Vec<(DateTime<Utc>, Decimal)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, total_equity
            FROM equity_snapshots
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let snapshots = stmt
            .query_map([limit], |row| {
                let ts: String = row.get(0)?;
                let equity: String = row.get(1)?;
                Ok((parse_datetime(&ts), parse_decimal(&equity)))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(snapshots)
    }

    /// Clear paper trading state and history, keeping market data.
    pub fn clear_trading_state(&self) -> Result<()> {
        warn!("Clearing paper trading state");
        self.conn.execute_batch(
            r#"
            DELETE FROM paper_accounts;
            DELETE FROM paper_positions;
            DELETE FROM open_pairs;
            DELETE FROM funding_events;
            DELETE FROM trades;
            DELETE FROM equity_snapshots;
            "#,
        )?;
        Ok(())
    }
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
