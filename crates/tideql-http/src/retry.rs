use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use tideql_common::error::{Error, Result};

use crate::config::PoolConfig;

/// Transient connection resets are retried at most this many times,
/// independent of the rate-limit budget.
const CONNECT_RETRIES: u32 = 2;

/// Wraps request callables with rate-limit aware retry.
///
/// On `Error::RateLimit` the controller sleeps
/// `max(server hint, base·2^attempt + jitter)` and retries, up to
/// `max_retries` attempts; the final failure surfaces with the last hint
/// attached. Transient connection failures get a small fixed budget; every
/// other error propagates immediately. The synchronous and cooperative
/// forms have identical semantics.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryController {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff_delay(&self, attempt: u32, hint: Option<u64>) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt)) + jitter;
        let hinted = hint.map(Duration::from_secs).unwrap_or(Duration::ZERO);
        exponential.max(hinted)
    }

    fn connect_budget(&self) -> u32 {
        CONNECT_RETRIES.min(self.max_retries)
    }

    pub fn execute<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0u32;
        let mut connect_failures = 0u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(Error::RateLimit {
                    message,
                    retry_after,
                }) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RateLimit {
                            message,
                            retry_after,
                        });
                    }
                    let delay = self.backoff_delay(attempt, retry_after);
                    debug!(
                        "rate limited, attempt {}/{}, sleeping {:?}",
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(Error::Connection(message)) if connect_failures < self.connect_budget() => {
                    connect_failures += 1;
                    debug!(
                        "transient connection failure ({}), retry {}/{}",
                        message,
                        connect_failures,
                        self.connect_budget()
                    );
                    std::thread::sleep(self.base_delay);
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub async fn execute_async<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let mut connect_failures = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(Error::RateLimit {
                    message,
                    retry_after,
                }) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RateLimit {
                            message,
                            retry_after,
                        });
                    }
                    let delay = self.backoff_delay(attempt, retry_after);
                    debug!(
                        "rate limited, attempt {}/{}, sleeping {:?}",
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Error::Connection(message)) if connect_failures < self.connect_budget() => {
                    connect_failures += 1;
                    debug!(
                        "transient connection failure ({}), retry {}/{}",
                        message,
                        connect_failures,
                        self.connect_budget()
                    );
                    tokio::time::sleep(self.base_delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
