//! Typed errors raised by exchange connectors.
//!
//! Connector code returns `ExchangeError` so retry logic can tell transient
//! failures from permanent ones. Application layers wrap these in `anyhow`.

use std::time::Duration;
use thiserror::Error;

use crate::exchange::Venue;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{venue} API error (HTTP {status}): code={code:?} {message}")]
    Api {
        venue: Venue,
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("{venue} rate limit hit")]
    RateLimited {
        venue: Venue,
        retry_after: Option<Duration>,
    },

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed {venue} response: {message}")]
    Malformed { venue: Venue, message: String },

    #[error("{operation} is not supported on {venue}")]
    Unsupported {
        venue: Venue,
        operation: &'static str,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ExchangeError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Http(_) | ExchangeError::RateLimited { .. } => true,
            ExchangeError::Api { status, .. } => *status >= 500,
            ExchangeError::Decode { .. }
            | ExchangeError::Malformed { .. }
            | ExchangeError::Unsupported { .. }
            | ExchangeError::InvalidRequest(_) => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let server = ExchangeError::Api {
            venue: Venue::Binance,
            status: 503,
            code: None,
            message: "unavailable".to_string(),
        };
        assert!(server.is_retryable());

        let client = ExchangeError::Api {
            venue: Venue::Binance,
            status: 400,
            code: Some(-1121),
            message: "Invalid symbol.".to_string(),
        };
        assert!(!client.is_retryable());

        let unsupported = ExchangeError::Unsupported {
            venue: Venue::Hyperliquid,
            operation: "place_order",
        };
        assert!(!unsupported.is_retryable());
        assert_eq!(
            unsupported.to_string(),
            "place_order is not supported on Hyperliquid"
        );

        let limited = ExchangeError::RateLimited {
            venue: Venue::Binance,
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
    }
}
