//! Binance WebSocket mark price stream.

use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Mark price update from `!markPrice@arr@1s`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkPriceUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(rename = "r", with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
    #[serde(rename = "T")]
    pub next_funding_time: i64,
}

/// Stream events.
#[derive(Debug, Clone)]
pub enum WsEvent {
    MarkPrice(MarkPriceUpdate),
    Connected,
    Disconnected,
}

/// All-symbol mark price stream with automatic reconnection.
pub struct BinanceMarkPriceStream {
    url: String,
}

impl BinanceMarkPriceStream {
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            FUTURES_TESTNET_WS_URL
        } else {
            FUTURES_WS_URL
        };
        Self::with_url(format!("{}/ws/!markPrice@arr@1s", base_url))
    }

    pub fn with_url(url: String) -> Self {
        Self { url }
    }

    /// Spawn the reader task. It runs until `shutdown` flips to `true` or the
    /// receiver is dropped, reconnecting with capped exponential backoff.
    pub fn spawn(self, tx: mpsc::Sender<WsEvent>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                if *shutdown.borrow() {
                    return;
                }

                info!("Connecting to WebSocket: {}", self.url);
                match connect_async(self.url.as_str()).await {
                    Ok((ws_stream, _)) => {
                        backoff = INITIAL_BACKOFF;
                        if tx.send(WsEvent::Connected).await.is_err() {
                            return;
                        }

                        let (_write, mut read) = ws_stream.split();
                        loop {
                            tokio::select! {
                                _ = shutdown.changed() => {
                                    info!("Mark price stream shutting down");
                                    return;
                                }
                                msg = read.next() => match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        for update in parse_mark_prices(&text) {
                                            if tx.send(WsEvent::MarkPrice(update)).await.is_err() {
                                                warn!("Event receiver dropped");
                                                return;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        info!("WebSocket closed by server");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("WebSocket error: {}", e);
                                        break;
                                    }
                                    // Pong is handled automatically by tungstenite
                                    Some(Ok(_)) => {}
                                }
                            }
                        }

                        if tx.send(WsEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "WebSocket connect failed");
                    }
                }

                debug!("Reconnecting in {:?}", backoff);
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
            }
        })
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Parse an array payload, skipping malformed messages.
fn parse_mark_prices(text: &str) -> Vec<MarkPriceUpdate> {
    match serde_json::from_str::<Vec<MarkPriceUpdate>>(text) {
        Ok(updates) => updates,
        Err(e) => {
            debug!(error = %e, "Ignoring unparsable mark price message");
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_mark_prices() {
        let text = r#"[
            {"e":"markPriceUpdate","E":1562305380000,"s":"BTCUSDT","p":"11794.15000000","i":"11784.62659091","P":"11784.25641265","r":"0.00038167","T":1562306400000},
            {"e":"markPriceUpdate","E":1562305380000,"s":"ENAUSDT","p":"0.51230000","i":"0.51200000","P":"0.51210000","r":"-0.00002100","T":1562306400000}
        ]"#;

        let updates = parse_mark_prices(text);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].mark_price, dec!(11794.15));
        assert_eq!(updates[1].funding_rate, dec!(-0.000021));
        assert_eq!(updates[1].next_funding_time, 1562306400000);

        assert!(parse_mark_prices("{\"result\":null,\"id\":1}").is_empty());
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, MAX_BACKOFF);
        assert_eq!(next_backoff(Duration::from_secs(2)), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_stream_stops_on_shutdown() {
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Nothing listens here, so the task sits in reconnect backoff
        let handle = BinanceMarkPriceStream::with_url("ws://127.0.0.1:9/ws".to_string())
            .spawn(tx, shutdown_rx);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
