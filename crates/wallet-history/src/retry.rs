//! Rate-limit aware retry with exponential backoff
//!
//! [`RetryPolicy`] retries an operation only while it fails with a retryable
//! error (by default: provider rate limiting), sleeping `initial_delay`,
//! then twice that, and so on, until `max_attempts` calls have been made.
//! Any other error is returned immediately.
//!
//! [`RateLimitedClient`] puts every call of a [`ChainDataProvider`] behind a
//! policy, so nothing in the pipeline talks to the provider unguarded.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::constants;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ChainDataProvider, SignatureRecord, TransactionDetails};

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, first attempt included (always >= 1)
    pub max_attempts: u32,
    /// Wait before the first retry
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(constants::RETRY_INITIAL_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Delay slept before retry number `retry` (0-based): `initial_delay * 2^retry`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Run a provider call, retrying only on rate limiting.
    pub async fn call<T, F, Fut>(&self, operation: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.call_if(operation, ProviderError::is_rate_limited).await
    }

    /// Run `operation`, retrying while `is_retryable` accepts the error.
    ///
    /// Returns the first success, the first non-retryable error, or the last
    /// error once `max_attempts` is exhausted.
    pub async fn call_if<T, E, F, Fut, P>(&self, mut operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if is_retryable(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_for_retry(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Provider rate limited, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A [`ChainDataProvider`] whose every call goes through a [`RetryPolicy`]
pub struct RateLimitedClient<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: ChainDataProvider> RateLimitedClient<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ChainDataProvider> ChainDataProvider for RateLimitedClient<P> {
    async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> ProviderResult<Vec<SignatureRecord>> {
        self.policy
            .call(|| self.inner.signatures_for_address(address, limit, before))
            .await
    }

    async fn transaction(&self, signature: &str) -> ProviderResult<Option<TransactionDetails>> {
        self.policy.call(|| self.inner.transaction(signature)).await
    }
}
