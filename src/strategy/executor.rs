//! Two-leg order execution across Hyperliquid and Binance.

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PairConfig;
use crate::exchange::{ExchangeConnector, OrderAck, OrderRequest, SpreadDirection};
use crate::utils::round_down_to_lot;

/// Lot step applied to both legs.
const QUANTITY_STEP: Decimal = dec!(0.0001);

/// Fills of a freshly opened pair.
#[derive(Debug, Clone)]
pub struct PairEntry {
    pub hyperliquid: OrderAck,
    pub binance: OrderAck,
}

impl PairEntry {
    pub fn fees(&self) -> Decimal {
        self.hyperliquid.fee + self.binance.fee
    }

    /// Signed Hyperliquid leg size.
    pub fn hl_quantity(&self) -> Decimal {
        self.hyperliquid.filled_qty * self.hyperliquid.side.sign()
    }

    /// Signed Binance leg size.
    pub fn binance_quantity(&self) -> Decimal {
        self.binance.filled_qty * self.binance.side.sign()
    }
}

/// Fills of a closed pair; `None` for a leg that was already flat.
#[derive(Debug, Clone)]
pub struct PairExit {
    pub hyperliquid: Option<OrderAck>,
    pub binance: Option<OrderAck>,
}

impl PairExit {
    pub fn fees(&self) -> Decimal {
        self.fills().map(|ack| ack.fee).sum()
    }

    /// Legs that actually traded.
    pub fn fills(&self) -> impl Iterator<Item = &OrderAck> {
        [&self.hyperliquid, &self.binance].into_iter().flatten()
    }
}

/// A close where at least one leg failed. `closed` holds the legs that did
/// trade so their fees and fills can still be booked.
#[derive(Debug, Error)]
#[error("{error:#}")]
pub struct PartialExit {
    pub closed: PairExit,
    pub error: anyhow::Error,
}

/// Opens and closes both legs of a pair.
pub struct PairExecutor {
    hyperliquid: Arc<dyn ExchangeConnector>,
    binance: Arc<dyn ExchangeConnector>,
    leverage: u8,
    slippage_tolerance: Decimal,
}

impl PairExecutor {
    pub fn new(
        hyperliquid: Arc<dyn ExchangeConnector>,
        binance: Arc<dyn ExchangeConnector>,
        leverage: u8,
        slippage_tolerance: Decimal,
    ) -> Self {
        Self {
            hyperliquid,
            binance,
            leverage,
            slippage_tolerance,
        }
    }

    /// Open `notional` per leg in `direction`, Hyperliquid leg first.
    ///
    /// Both legs use the same size. If the Binance leg fails the Hyperliquid
    /// fill is unwound with a reduce-only order and the original error is
    /// returned.
    pub async fn open_pair(
        &self,
        pair: &PairConfig,
        direction: SpreadDirection,
        notional: Decimal,
    ) -> Result<PairEntry> {
        let (hl_mark, bn_mark) = tokio::try_join!(
            self.hyperliquid.get_mark_price(&pair.hyperliquid),
            self.binance.get_mark_price(&pair.binance),
        )
        .with_context(|| format!("Failed to fetch mark prices for {}", pair.hyperliquid))?;

        let reference = (hl_mark + bn_mark) / Decimal::TWO;
        anyhow::ensure!(reference > Decimal::ZERO, "No valid mark price for {}", pair.hyperliquid);

        let quantity = round_down_to_lot(notional / reference, QUANTITY_STEP);
        anyhow::ensure!(
            quantity > Decimal::ZERO,
            "Notional {} is below one lot of {}",
            notional,
            pair.hyperliquid
        );

        info!(
            pair = %pair.hyperliquid,
            %direction,
            %notional,
            %quantity,
            "Opening pair"
        );

        let hl_order = OrderRequest::market(&pair.hyperliquid, direction.hyperliquid_side(), quantity)
            .with_leverage(self.leverage);
        let hl_ack = self
            .hyperliquid
            .place_order(&hl_order)
            .await
            .with_context(|| format!("Hyperliquid leg failed for {}", pair.hyperliquid))?;
        self.check_slippage(&hl_ack, hl_mark);

        let bn_order = OrderRequest::market(&pair.binance, direction.other_side(), hl_ack.filled_qty)
            .with_leverage(self.leverage);
        let bn_ack = match self.binance.place_order(&bn_order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(pair = %pair.binance, error = %e, "Binance leg failed, unwinding Hyperliquid leg");
                self.rollback(&hl_ack).await;
                return Err(anyhow::Error::new(e).context(format!("Binance leg failed for {}", pair.binance)));
            }
        };
        self.check_slippage(&bn_ack, bn_mark);

        if bn_ack.filled_qty != hl_ack.filled_qty {
            warn!(
                pair = %pair.hyperliquid,
                hl_qty = %hl_ack.filled_qty,
                binance_qty = %bn_ack.filled_qty,
                "Leg sizes differ"
            );
        }

        Ok(PairEntry {
            hyperliquid: hl_ack,
            binance: bn_ack,
        })
    }

    async fn rollback(&self, ack: &OrderAck) {
        let unwind = OrderRequest::market(&ack.symbol, ack.side.opposite(), ack.filled_qty).reduce_only();
        match self.hyperliquid.place_order(&unwind).await {
            Ok(_) => info!(symbol = %ack.symbol, "Hyperliquid leg unwound"),
            Err(e) => error!(symbol = %ack.symbol, error = %e, "CRITICAL: failed to unwind Hyperliquid leg"),
        }
    }

    /// Close both legs. Both are attempted even if the first fails.
    pub async fn close_pair(&self, pair: &PairConfig) -> Result<PairExit, PartialExit> {
        info!(pair = %pair.hyperliquid, "Closing pair");

        let hl_result = self.hyperliquid.close_position(&pair.hyperliquid).await;
        let bn_result = self.binance.close_position(&pair.binance).await;

        match (hl_result, bn_result) {
            (Ok(hyperliquid), Ok(binance)) => Ok(PairExit {
                hyperliquid,
                binance,
            }),
            (Err(e), Ok(binance)) => Err(PartialExit {
                closed: PairExit {
                    hyperliquid: None,
                    binance,
                },
                error: anyhow::Error::new(e)
                    .context(format!("Hyperliquid leg failed to close for {}", pair.hyperliquid)),
            }),
            (Ok(hyperliquid), Err(e)) => Err(PartialExit {
                closed: PairExit {
                    hyperliquid,
                    binance: None,
                },
                error: anyhow::Error::new(e)
                    .context(format!("Binance leg failed to close for {}", pair.binance)),
            }),
            (Err(hl), Err(bn)) => Err(PartialExit {
                closed: PairExit {
                    hyperliquid: None,
                    binance: None,
                },
                error: anyhow!(
                    "Both legs failed to close for {}: hyperliquid: {}; binance: {}",
                    pair.hyperliquid,
                    hl,
                    bn
                ),
            }),
        }
    }

    /// Warn when a fill is further than `slippage_tolerance` from the mark.
    fn check_slippage(&self, ack: &OrderAck, reference: Decimal) -> bool {
        if reference <= Decimal::ZERO || ack.avg_price <= Decimal::ZERO {
            return true;
        }
        let slippage = ((ack.avg_price - reference) / reference).abs();
        if slippage > self.slippage_tolerance {
            warn!(
                venue = %ack.venue,
                symbol = %ack.symbol,
                %reference,
                fill = %ack.avg_price,
                %slippage,
                "Fill outside slippage tolerance"
            );
            return false;
        }
        true
    }
}
