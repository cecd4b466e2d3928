//! Request pacing and retry policy for venue REST clients.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

use super::Venue;
use crate::error::ExchangeResult;

/// Pause between pages while paginating historical endpoints.
pub const PAGE_PAUSE: Duration = Duration::from_millis(200);

/// Spaces request start times so a venue's per-minute budget is never exceeded.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    /// Pacer allowing `requests_per_minute` evenly spaced requests (0 = unlimited).
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / requests_per_minute
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Minimum spacing between requests.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next request slot is available and claim it.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot - now
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

/// How often and how patiently to retry a failed request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `request` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, venue: Venue, operation: &str, mut request: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = e.retry_after().unwrap_or(self.backoff);
                    warn!(
                        venue = %venue,
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}
