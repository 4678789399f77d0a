//! Bounded exponential retry around upstream calls.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{ChainReader, HistoricalPoint, LossReporter, PriceProvider};
use crate::error::OracleResult;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            // 1s, 2s, 4s, 8s between the five attempts
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the `retry`-th failure (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> OracleResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OracleResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry + 1 < attempts => {
                    let delay = self.delay_for(retry);
                    warn!(
                        call = label,
                        attempt = retry + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decorator applying a `RetryPolicy` to any collaborator.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: PriceProvider> PriceProvider for Retrying<P> {
    async fn current_price(&self, provider_id: &str, quote_currency: &str) -> OracleResult<f64> {
        self.policy
            .run("current_price", || {
                self.inner.current_price(provider_id, quote_currency)
            })
            .await
    }

    async fn price_history(
        &self,
        provider_id: &str,
        quote_currency: &str,
        from: i64,
        to: i64,
    ) -> OracleResult<Vec<HistoricalPoint>> {
        self.policy
            .run("price_history", || {
                self.inner
                    .price_history(provider_id, quote_currency, from, to)
            })
            .await
    }
}

#[async_trait]
impl<C: ChainReader> ChainReader for Retrying<C> {
    async fn latest_block_height(&self) -> OracleResult<i64> {
        self.policy
            .run("latest_block_height", || self.inner.latest_block_height())
            .await
    }
}

#[async_trait]
impl<L: LossReporter> LossReporter for Retrying<L> {
    async fn network_losses(&self, topic: &str, block_height: i64) -> OracleResult<Value> {
        self.policy
            .run("network_losses", || {
                self.inner.network_losses(topic, block_height)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(5)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OracleError::Provider("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: OracleResult<()> = RetryPolicy::immediate(3)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OracleError::Chain("refused".into()))
            })
            .await;
        assert!(matches!(result, Err(OracleError::Chain(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_input_not_retried() {
        let calls = AtomicU32::new(0);
        let result: OracleResult<()> = RetryPolicy::immediate(5)
            .run("bad id", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OracleError::InvalidInput("unknown id".into()))
            })
            .await;
        assert!(matches!(result, Err(OracleError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Fails with a chain error until `failures` calls have been made.
    struct FlakyChain {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChainReader for FlakyChain {
        async fn latest_block_height(&self) -> OracleResult<i64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(OracleError::Chain("connection reset".into()))
            } else {
                Ok(4242)
            }
        }
    }

    #[tokio::test]
    async fn test_retrying_chain_reader() {
        let chain = Retrying::new(
            FlakyChain { failures: 2, calls: AtomicU32::new(0) },
            RetryPolicy::immediate(5),
        );
        assert_eq!(chain.latest_block_height().await.unwrap(), 4242);
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 3);

        let chain = Retrying::new(
            FlakyChain { failures: u32::MAX, calls: AtomicU32::new(0) },
            RetryPolicy::immediate(4),
        );
        assert!(matches!(
            chain.latest_block_height().await,
            Err(OracleError::Chain(_))
        ));
        assert_eq!(chain.inner.calls.load(Ordering::SeqCst), 4);
    }
}
