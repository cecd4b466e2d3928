//! Paper trading exchange for simulated execution against live prices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::traits::{ExchangeConnector, Venue};
use super::types::*;
use crate::error::{ExchangeError, ExchangeResult};
use crate::persistence::{PersistedAccount, PersistedPosition};
use crate::utils::weighted_average;

/// Simulated position on one symbol.
#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub symbol: String,
    /// Signed size: positive = long
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Funding received while open (negative = paid)
    pub funding_received: Decimal,
}

/// Simulated account state.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    pub initial_balance: Decimal,
    /// Cash balance: realized PnL, fees and funding applied
    pub balance: Decimal,
    pub positions: HashMap<String, PaperPosition>,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
}

impl PaperAccount {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: HashMap::new(),
            total_fees: Decimal::ZERO,
            total_funding: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_count: 0,
        }
    }
}

/// Simulated connector for one venue.
///
/// Market orders fill at the mark price moved against the taker by the
/// configured slippage, and pay the taker fee on notional.
pub struct PaperExchange {
    venue: Venue,
    state: RwLock<PaperAccount>,
    mark_prices: RwLock<HashMap<String, Decimal>>,
    funding_rates: RwLock<HashMap<String, Decimal>>,
    order_id_counter: AtomicU64,
    fee_rate: Decimal,
    slippage: Decimal,
}

impl PaperExchange {
    pub fn new(venue: Venue, initial_balance: Decimal, fee_rate: Decimal, slippage: Decimal) -> Self {
        Self {
            venue,
            state: RwLock::new(PaperAccount::new(initial_balance)),
            mark_prices: RwLock::new(HashMap::new()),
            funding_rates: RwLock::new(HashMap::new()),
            order_id_counter: AtomicU64::new(1),
            fee_rate,
            slippage,
        }
    }

    /// Update the simulated mark price (call this with live data).
    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.mark_prices
            .write()
            .await
            .insert(symbol.to_string(), price);
    }

    /// Update the simulated current funding rate.
    pub async fn set_funding_rate(&self, symbol: &str, rate: Decimal) {
        self.funding_rates
            .write()
            .await
            .insert(symbol.to_string(), rate);
    }

    /// Copy of the current account state.
    pub async fn account(&self) -> PaperAccount {
        self.state.read().await.clone()
    }

    /// Unrealized PnL at current mark prices.
    pub async fn unrealized_pnl(&self) -> Decimal {
        let state = self.state.read().await;
        let marks = self.mark_prices.read().await;

        state
            .positions
            .values()
            .filter_map(|p| {
                marks
                    .get(&p.symbol)
                    .map(|mark| p.quantity * (*mark - p.entry_price))
            })
            .sum()
    }

    /// Balance plus unrealized PnL.
    pub async fn equity(&self) -> Decimal {
        let balance = self.state.read().await.balance;
        balance + self.unrealized_pnl().await
    }

    /// Apply a funding payment to the position in `symbol`.
    ///
    /// Longs pay positive rates; shorts receive them. Returns the amount
    /// received (negative when paid), zero when flat or without a mark price.
    pub async fn settle_funding(&self, symbol: &str, rate: Decimal) -> Decimal {
        let mark = self.mark_prices.read().await.get(symbol).copied();
        let mut state = self.state.write().await;

        let Some(mark) = mark else {
            return Decimal::ZERO;
        };
        let Some(position) = state.positions.get_mut(symbol) else {
            return Decimal::ZERO;
        };

        let payment = -position.quantity * mark * rate;
        position.funding_received += payment;
        let position_total = position.funding_received;

        state.balance += payment;
        state.total_funding += payment;

        debug!(
            venue = %self.venue,
            %symbol,
            funding_rate = %rate,
            payment = %payment,
            position_total = %position_total,
            "Paper funding settled"
        );

        payment
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Export current state for persistence.
    pub async fn export_state(&self) -> PersistedAccount {
        let state = self.state.read().await;

        PersistedAccount {
            venue: self.venue,
            initial_balance: state.initial_balance,
            balance: state.balance,
            total_fees: state.total_fees,
            total_funding: state.total_funding,
            realized_pnl: state.realized_pnl,
            order_count: state.order_count,
            positions: state
                .positions
                .iter()
                .map(|(symbol, p)| {
                    (
                        symbol.clone(),
                        PersistedPosition {
                            symbol: p.symbol.clone(),
                            quantity: p.quantity,
                            entry_price: p.entry_price,
                            opened_at: p.opened_at,
                            funding_received: p.funding_received,
                        },
                    )
                })
                .collect(),
            last_saved: Utc::now(),
        }
    }

    /// Restore state from persistence.
    pub async fn restore_state(&self, persisted: PersistedAccount) {
        let mut state = self.state.write().await;

        state.initial_balance = persisted.initial_balance;
        state.balance = persisted.balance;
        state.total_fees = persisted.total_fees;
        state.total_funding = persisted.total_funding;
        state.realized_pnl = persisted.realized_pnl;
        state.order_count = persisted.order_count;
        state.positions = persisted
            .positions
            .into_iter()
            .map(|(symbol, p)| {
                (
                    symbol,
                    PaperPosition {
                        symbol: p.symbol,
                        quantity: p.quantity,
                        entry_price: p.entry_price,
                        opened_at: p.opened_at,
                        funding_received: p.funding_received,
                    },
                )
            })
            .collect();

        self.order_id_counter
            .store(persisted.order_count + 1, Ordering::SeqCst);

        info!(
            venue = %self.venue,
            balance = %state.balance,
            positions = state.positions.len(),
            "Paper account restored from persistence"
        );
    }

    async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.mark_prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                ExchangeError::InvalidRequest(format!("No mark price for {} on paper {}", symbol, self.venue))
            })
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.funding_rates
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidRequest(format!("No funding rate for {}", symbol)))
    }

    async fn get_historical_funding_rates(
        &self,
        _symbol: &str,
        _start_ms: i64,
        _end_ms: i64,
    ) -> ExchangeResult<Vec<FundingRecord>> {
        Err(ExchangeError::Unsupported {
            venue: self.venue,
            operation: "paper historical funding",
        })
    }

    async fn get_historical_prices(
        &self,
        _symbol: &str,
        _interval: KlineInterval,
        _start_ms: i64,
        _end_ms: i64,
    ) -> ExchangeResult<Vec<Kline>> {
        Err(ExchangeError::Unsupported {
            venue: self.venue,
            operation: "paper historical prices",
        })
    }

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.mark_price(symbol).await
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck> {
        order.validate()?;
        let mark = self.mark_price(&order.symbol).await?;

        let fill_price = match order.side {
            OrderSide::Buy => mark * (Decimal::ONE + self.slippage),
            OrderSide::Sell => mark * (Decimal::ONE - self.slippage),
        };

        if let (OrderType::Limit, Some(limit)) = (order.order_type, order.price) {
            let marketable = match order.side {
                OrderSide::Buy => limit >= fill_price,
                OrderSide::Sell => limit <= fill_price,
            };
            if !marketable {
                return Err(ExchangeError::InvalidRequest(format!(
                    "paper exchange only fills marketable limit orders ({} {} vs fill {})",
                    order.side.as_str(),
                    limit,
                    fill_price
                )));
            }
        }

        let mut state = self.state.write().await;
        let current = state
            .positions
            .get(&order.symbol)
            .map(|p| p.quantity)
            .unwrap_or_default();

        let mut quantity = order.quantity;
        if order.reduce_only {
            let reduces = current != Decimal::ZERO && current.is_sign_positive() != (order.side == OrderSide::Buy);
            if !reduces {
                return Err(ExchangeError::InvalidRequest(format!(
                    "reduce-only {} order on {} would not reduce the position",
                    order.side.as_str(),
                    order.symbol
                )));
            }
            quantity = quantity.min(current.abs());
        }

        let delta = order.side.sign() * quantity;
        let fee = quantity * fill_price * self.fee_rate;
        let mut realized = Decimal::ZERO;

        let position = state
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| PaperPosition {
                symbol: order.symbol.clone(),
                quantity: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                opened_at: Utc::now(),
                funding_received: Decimal::ZERO,
            });

        let new_quantity = position.quantity + delta;
        if position.quantity == Decimal::ZERO || position.quantity.is_sign_positive() == delta.is_sign_positive() {
            // Opening or increasing
            position.entry_price = weighted_average(&[
                (position.entry_price, position.quantity.abs()),
                (fill_price, quantity),
            ]);
            if position.quantity == Decimal::ZERO {
                position.opened_at = Utc::now();
            }
        } else {
            let closed = quantity.min(position.quantity.abs());
            let direction = if position.quantity.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = closed * (fill_price - position.entry_price) * direction;

            if new_quantity != Decimal::ZERO && new_quantity.is_sign_positive() != position.quantity.is_sign_positive() {
                // Flipped through zero
                position.entry_price = fill_price;
                position.opened_at = Utc::now();
            }
        }
        position.quantity = new_quantity;

        if new_quantity == Decimal::ZERO {
            state.positions.remove(&order.symbol);
        }

        state.balance += realized - fee;
        state.realized_pnl += realized;
        state.total_fees += fee;
        state.order_count += 1;

        let order_id = self.next_order_id();

        info!(
            venue = %self.venue,
            order_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            quantity = %quantity,
            price = %fill_price,
            fee = %fee,
            realized = %realized,
            "Paper order filled"
        );

        Ok(OrderAck {
            venue: self.venue,
            order_id: format!("paper-{}-{}", self.venue.short_code(), order_id),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Filled,
            filled_qty: quantity,
            avg_price: fill_price,
            fee,
        })
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<PositionSnapshot>> {
        let state = self.state.read().await;
        let Some(position) = state.positions.get(symbol) else {
            return Ok(None);
        };

        let mark = self
            .mark_prices
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(position.entry_price);

        Ok(Some(PositionSnapshot {
            venue: self.venue,
            symbol: symbol.to_string(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            mark_price: mark,
            unrealized_pnl: position.quantity * (mark - position.entry_price),
            leverage: 1,
        }))
    }

    async fn close_position(&self, symbol: &str) -> ExchangeResult<Option<OrderAck>> {
        let Some(position) = self.get_position(symbol).await? else {
            return Ok(None);
        };

        let order = OrderRequest::market(symbol, position.closing_side(), position.quantity.abs())
            .reduce_only();
        self.place_order(&order).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn exchange_with_price(price: Decimal) -> PaperExchange {
        let exchange = PaperExchange::new(Venue::Binance, dec!(10000), dec!(0.0004), Decimal::ZERO);
        exchange.set_mark_price("ENAUSDT", price).await;
        exchange
    }

    #[tokio::test]
    async fn test_market_order_charges_fee() {
        let exchange = exchange_with_price(dec!(0.5)).await;

        let ack = exchange
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Sell, dec!(2000)))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_price, dec!(0.5));
        // 2000 * 0.5 * 0.0004
        assert_eq!(ack.fee, dec!(0.4));

        let account = exchange.account().await;
        assert_eq!(account.balance, dec!(9999.6));
        assert_eq!(account.positions["ENAUSDT"].quantity, dec!(-2000));
        assert_eq!(account.order_count, 1);
    }

    #[tokio::test]
    async fn test_slippage_moves_against_taker() {
        let exchange = PaperExchange::new(Venue::Hyperliquid, dec!(1000), Decimal::ZERO, dec!(0.001));
        exchange.set_mark_price("ENA", dec!(100)).await;

        let buy = exchange
            .place_order(&OrderRequest::market("ENA", OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        assert_eq!(buy.avg_price, dec!(100.1));

        let sell = exchange
            .place_order(&OrderRequest::market("ENA", OrderSide::Sell, dec!(1)))
            .await
            .unwrap();
        assert_eq!(sell.avg_price, dec!(99.9));
        assert_eq!(exchange.account().await.realized_pnl, dec!(-0.2));
    }

    #[tokio::test]
    async fn test_weighted_entry_price() {
        let exchange = PaperExchange::new(Venue::Binance, dec!(10000), Decimal::ZERO, Decimal::ZERO);
        exchange.set_mark_price("ENAUSDT", dec!(1)).await;
        exchange
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Buy, dec!(100)))
            .await
            .unwrap();

        exchange.set_mark_price("ENAUSDT", dec!(2)).await;
        exchange
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Buy, dec!(100)))
            .await
            .unwrap();

        let position = exchange.get_position("ENAUSDT").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec!(200));
        assert_eq!(position.entry_price, dec!(1.5));
        assert_eq!(position.unrealized_pnl, dec!(100));
    }

    #[tokio::test]
    async fn test_close_realizes_pnl() {
        let exchange = PaperExchange::new(Venue::Binance, dec!(10000), Decimal::ZERO, Decimal::ZERO);
        exchange.set_mark_price("ENAUSDT", dec!(1)).await;
        exchange
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Sell, dec!(100)))
            .await
            .unwrap();

        exchange.set_mark_price("ENAUSDT", dec!(0.9)).await;
        let ack = exchange.close_position("ENAUSDT").await.unwrap().unwrap();
        assert_eq!(ack.side, OrderSide::Buy);
        assert_eq!(ack.filled_qty, dec!(100));

        let account = exchange.account().await;
        assert_eq!(account.realized_pnl, dec!(10));
        assert_eq!(account.balance, dec!(10010));
        assert!(account.positions.is_empty());
        assert!(exchange.close_position("ENAUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reduce_only_rejected_when_flat() {
        let exchange = exchange_with_price(dec!(0.5)).await;
        let order = OrderRequest::market("ENAUSDT", OrderSide::Buy, dec!(10)).reduce_only();
        assert!(matches!(
            exchange.place_order(&order).await,
            Err(ExchangeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_order_without_mark_price_rejected() {
        let exchange = PaperExchange::new(Venue::Binance, dec!(100), Decimal::ZERO, Decimal::ZERO);
        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1));
        assert!(exchange.place_order(&order).await.is_err());
    }

    #[tokio::test]
    async fn test_funding_sign() {
        let exchange = PaperExchange::new(Venue::Hyperliquid, dec!(1000), Decimal::ZERO, Decimal::ZERO);
        exchange.set_mark_price("ENA", dec!(0.5)).await;
        exchange.set_mark_price("BTC", dec!(50000)).await;

        exchange
            .place_order(&OrderRequest::market("ENA", OrderSide::Sell, dec!(2000)))
            .await
            .unwrap();
        exchange
            .place_order(&OrderRequest::market("BTC", OrderSide::Buy, dec!(0.02)))
            .await
            .unwrap();

        // Short receives positive funding: 2000 * 0.5 * 0.0001
        assert_eq!(exchange.settle_funding("ENA", dec!(0.0001)).await, dec!(0.1));
        // Long pays positive funding: 0.02 * 50000 * 0.0001
        assert_eq!(exchange.settle_funding("BTC", dec!(0.0001)).await, dec!(-0.1));
        // Flat symbol
        assert_eq!(exchange.settle_funding("ETH", dec!(0.0001)).await, Decimal::ZERO);

        let account = exchange.account().await;
        assert_eq!(account.total_funding, Decimal::ZERO);
        assert_eq!(account.positions["ENA"].funding_received, dec!(0.1));
    }

    #[tokio::test]
    async fn test_export_and_restore() {
        let exchange = exchange_with_price(dec!(0.5)).await;
        exchange
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Buy, dec!(100)))
            .await
            .unwrap();

        let exported = exchange.export_state().await;
        assert_eq!(exported.venue, Venue::Binance);

        let restored = PaperExchange::new(Venue::Binance, dec!(1), Decimal::ZERO, Decimal::ZERO);
        restored.restore_state(exported).await;

        let account = restored.account().await;
        assert_eq!(account.initial_balance, dec!(10000));
        assert_eq!(account.positions["ENAUSDT"].quantity, dec!(100));

        restored.set_mark_price("ENAUSDT", dec!(0.5)).await;
        let ack = restored
            .place_order(&OrderRequest::market("ENAUSDT", OrderSide::Sell, dec!(100)))
            .await
            .unwrap();
        assert_eq!(ack.order_id, "paper-BN-2");
    }
}
