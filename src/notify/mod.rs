//! Trade and risk notifications.
//!
//! Delivery is best effort: a failed send is logged and never interrupts
//! the trading loop.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{NotificationsConfig, TelegramConfig};
use crate::exchange::SpreadDirection;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Events worth telling a human about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PositionOpened {
        pair: String,
        direction: SpreadDirection,
        notional: Decimal,
        apr: Decimal,
    },
    PositionClosed {
        pair: String,
        reason: String,
        pnl: Decimal,
    },
    RiskHalt {
        drawdown: Decimal,
        limit: Decimal,
    },
    Error {
        context: String,
        message: String,
    },
}

impl Notification {
    pub fn is_error(&self) -> bool {
        matches!(self, Notification::Error { .. } | Notification::RiskHalt { .. })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PositionOpened {
                pair,
                direction,
                notional,
                apr,
            } => write!(
                f,
                "Opened {} {} with ${:.2} per leg at {:.2}% APR",
                pair,
                direction.as_str(),
                notional,
                apr
            ),
            Notification::PositionClosed { pair, reason, pnl } => {
                write!(f, "Closed {} ({}), PnL ${:.4}", pair, reason, pnl)
            }
            Notification::RiskHalt { drawdown, limit } => write!(
                f,
                "Drawdown {:.2}% breached limit {:.2}%, new entries halted",
                drawdown * Decimal::ONE_HUNDRED,
                limit * Decimal::ONE_HUNDRED
            ),
            Notification::Error { context, message } => write!(f, "Error in {}: {}", context, message),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        if notification.is_error() {
            warn!(target: "notify", "{}", notification);
        } else {
            info!(target: "notify", "{}", notification);
        }
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

/// Sends notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        Self::with_base_url(config, TELEGRAM_API_URL)
    }

    pub fn with_base_url(config: &TelegramConfig, base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) {
        match self.send(notification.to_string()).await {
            Ok(()) => debug!("Telegram notification sent"),
            Err(e) => error!(error = %e, "Failed to send Telegram notification"),
        }
    }
}

/// Fans a notification out to every configured channel.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// Log channel always, Telegram when enabled.
    pub fn from_config(config: &NotificationsConfig) -> anyhow::Result<Self> {
        let mut multi = Self::new().with(LogNotifier);

        if config.telegram.enabled {
            anyhow::ensure!(
                !config.telegram.bot_token.is_empty() && !config.telegram.chat_id.is_empty(),
                "notifications.telegram requires bot_token and chat_id"
            );
            multi = multi.with(TelegramNotifier::new(&config.telegram)?);
            info!("Telegram notifications enabled");
        }

        if config.email.enabled {
            warn!("Email notifications are configured but not supported, ignoring");
        }

        Ok(multi)
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, notification: &Notification) {
        for notifier in &self.notifiers {
            notifier.notify(notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn telegram_config() -> TelegramConfig {
        TelegramConfig {
            enabled: true,
            bot_token: "123:abc".to_string(),
            chat_id: "42".to_string(),
        }
    }

    #[test]
    fn test_message_format() {
        let opened = Notification::PositionOpened {
            pair: "ENA/ENAUSDT".to_string(),
            direction: SpreadDirection::ShortHlLongOther,
            notional: dec!(2000),
            apr: dec!(31.5),
        };
        assert_eq!(
            opened.to_string(),
            "Opened ENA/ENAUSDT short_hl_long_other with $2000.00 per leg at 31.50% APR"
        );

        let halt = Notification::RiskHalt {
            drawdown: dec!(0.12),
            limit: dec!(0.10),
        };
        assert!(halt.is_error());
        assert!(halt.to_string().contains("12.00%"));
    }

    #[tokio::test]
    async fn test_telegram_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({"chat_id": "42"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_base_url(&telegram_config(), &server.uri()).unwrap();
        notifier
            .send(
                Notification::Error {
                    context: "trader".to_string(),
                    message: "boom".to_string(),
                }
                .to_string(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_telegram_failure_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_base_url(&telegram_config(), &server.uri()).unwrap();
        let err = notifier.send("hello".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("401"));

        // The trait method swallows the error
        let multi = MultiNotifier::new().with(LogNotifier).with(notifier);
        multi
            .notify(&Notification::PositionClosed {
                pair: "BTC/BTCUSDT".to_string(),
                reason: "stop_loss".to_string(),
                pnl: dec!(-10),
            })
            .await;
    }

    #[test]
    fn test_from_config() {
        let mut config = NotificationsConfig::default();
        assert_eq!(MultiNotifier::from_config(&config).unwrap().len(), 1);

        config.telegram = telegram_config();
        assert_eq!(MultiNotifier::from_config(&config).unwrap().len(), 2);

        config.telegram.chat_id.clear();
        assert!(MultiNotifier::from_config(&config).is_err());
    }
}
