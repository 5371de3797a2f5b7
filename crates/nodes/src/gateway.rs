//! The call gateway: every outbound call from an executor goes through here.
//!
//! Each attempt is admitted in three steps, each bounded by the configured
//! rate-limit wait:
//!
//! 1. a slot under the in-flight cap (a [`Semaphore`]);
//! 2. one request token from the shared [`TokenBucket`];
//! 3. for model calls, the estimated token cost from the optional
//!    tokens-per-minute budget.
//!
//! Failing to be admitted in time is a transient attempt failure. The gateway
//! then makes the call and classifies any [`ProviderError`] by its
//! [`RetryPolicy`]:
//!
//! - retryable errors and admission timeouts are retried with capped
//!   exponential back-off (or the provider's `Retry-After`) up to
//!   `max_retries`, then escalated as [`ExecutorError::Transient`] (or
//!   [`ExecutorError::RateLimitExceeded`] when admission was the last failure);
//! - non-retryable errors escalate immediately as [`ExecutorError::Permanent`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pipeline::{Clock, ExecutorError, ProviderError, RetryConfig, RetryPolicy, TokenBucket};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Shortest sleep between two token checks.
const MIN_TOKEN_POLL: Duration = Duration::from_millis(10);

/// In-flight cap used until [`CallGateway::with_max_concurrent`] says otherwise.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// A [`Clock`] that reads tokio's clock, so a paused test runtime also
/// freezes the rate limiter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Rate limiting, concurrency capping and retry around external calls.
#[derive(Debug, Clone)]
pub struct CallGateway {
    limiter: Arc<TokenBucket>,
    token_budget: Option<Arc<TokenBucket>>,
    in_flight: Arc<Semaphore>,
    retry: RetryConfig,
}

impl CallGateway {
    pub fn new(limiter: Arc<TokenBucket>, retry: RetryConfig) -> Self {
        Self {
            limiter,
            token_budget: None,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            retry,
        }
    }

    /// Charges model calls against a tokens-per-minute budget.
    #[must_use]
    pub fn with_token_budget(mut self, budget: Arc<TokenBucket>) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Caps the number of calls in flight at once (at least one).
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// Runs `call` under the rate limit and retry policy, without a model
    /// token cost.
    ///
    /// `operation` names the call in logs and errors (e.g. `"search"`).
    pub async fn call<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.call_weighted(operation, 0, call).await
    }

    /// Like [`call`](Self::call), also charging `model_tokens` against the
    /// token budget on every attempt.
    pub async fn call_weighted<T, F, Fut>(
        &self,
        operation: &str,
        model_tokens: u32,
        mut call: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let permit = match self.admit(operation, model_tokens).await {
                Ok(permit) => permit,
                Err(err) => {
                    if attempt >= self.retry.max_retries {
                        return Err(err);
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Not admitted in time; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            };

            let result = call().await;
            drop(permit);
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let after = match err.retry_policy() {
                RetryPolicy::NonRetryable => {
                    warn!(operation, error = %err, "External call failed permanently");
                    return Err(ExecutorError::permanent(operation, err.to_string()));
                }
                RetryPolicy::Retryable { after } => after,
            };

            if attempt >= self.retry.max_retries {
                warn!(
                    operation,
                    attempts = attempt + 1,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(ExecutorError::transient(
                    operation,
                    format!("{err} (after {} attempts)", attempt + 1),
                ));
            }

            let max_backoff = Duration::from_millis(self.retry.max_backoff_ms);
            let delay = after
                .map(|d| d.min(max_backoff))
                .unwrap_or_else(|| self.retry.backoff(attempt));
            warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying external call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn admit(&self, operation: &str, model_tokens: u32) -> Result<SemaphorePermit<'_>, ExecutorError> {
        let max_wait = self.retry.max_rate_limit_wait();
        let permit = match tokio::time::timeout(max_wait, self.in_flight.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(ExecutorError::permanent(operation, "call gateway is shut down"));
            }
            Err(_elapsed) => {
                warn!(operation, "Gave up waiting for a free call slot");
                return Err(ExecutorError::RateLimitExceeded {
                    operation: operation.to_string(),
                    waited: max_wait,
                });
            }
        };

        take_tokens(&self.limiter, 1, operation, max_wait).await?;
        if let Some(budget) = self.token_budget.as_ref().filter(|_| model_tokens > 0) {
            // A single request never needs more than a full bucket.
            let cost = model_tokens.min(budget.capacity() as u32);
            take_tokens(budget, cost, operation, max_wait).await?;
        }
        Ok(permit)
    }
}

/// Takes `n` tokens from `bucket`, sleeping on its wait hint for at most `max_wait`.
async fn take_tokens(
    bucket: &TokenBucket,
    n: u32,
    operation: &str,
    max_wait: Duration,
) -> Result<(), ExecutorError> {
    let mut waited = Duration::ZERO;
    loop {
        if bucket.consume(n) {
            return Ok(());
        }
        let Some(hint) = bucket.wait_hint(n) else {
            return Err(ExecutorError::RateLimitExceeded {
                operation: operation.to_string(),
                waited,
            });
        };
        let hint = hint.max(MIN_TOKEN_POLL);
        if waited + hint > max_wait {
            warn!(
                operation,
                tokens = n,
                waited_ms = waited.as_millis() as u64,
                "Gave up waiting for rate-limit tokens"
            );
            return Err(ExecutorError::RateLimitExceeded {
                operation: operation.to_string(),
                waited,
            });
        }
        debug!(operation, tokens = n, wait_ms = hint.as_millis() as u64, "Waiting for rate-limit tokens");
        tokio::time::sleep(hint).await;
        waited += hint;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pipeline::RateLimitConfig;

    use super::*;

    fn gateway(capacity: f64, initial: f64, retry: RetryConfig) -> CallGateway {
        let config = RateLimitConfig {
            capacity,
            refill_per_second: 1.0,
            ..RateLimitConfig::default()
        };
        let bucket = TokenBucket::with_clock(&config, Arc::new(TokioClock))
            .unwrap()
            .with_initial_tokens(initial);
        CallGateway::new(Arc::new(bucket), retry)
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_rate_limit_wait_ms: 5_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let gw = gateway(10.0, 10.0, fast_retry(3));
        let calls = &AtomicU32::new(0);
        let result = gw
            .call("llm.complete", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Unavailable {
                        status: 503,
                        message: "busy".into(),
                    })
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_after_retry_budget() {
        let gw = gateway(10.0, 10.0, fast_retry(2));
        let calls = &AtomicU32::new(0);
        let err = gw
            .call("search", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::Timeout {
                    message: "slow".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Transient { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_unauthorized() {
        let gw = gateway(10.0, 10.0, fast_retry(3));
        let calls = &AtomicU32::new(0);
        let err = gw
            .call("llm.complete", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::Unauthorized {
                    message: "bad key".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Permanent { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_a_token_within_the_bound() {
        let gw = gateway(5.0, 0.0, fast_retry(0));
        let start = tokio::time::Instant::now();
        let value = gw.call("search", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_is_reported() {
        let retry = RetryConfig {
            max_rate_limit_wait_ms: 500,
            ..fast_retry(0)
        };
        let gw = gateway(5.0, 0.0, retry);
        let err = gw.call("search", || async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RateLimitExceeded { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_wait_counts_as_an_attempt() {
        let retry = RetryConfig {
            max_rate_limit_wait_ms: 500,
            ..fast_retry(3)
        };
        // Admission fails at 0, 100 and 300 ms; at 700 ms the token is 0.3 s
        // away, within the bound.
        let gw = gateway(5.0, 0.0, retry);
        let start = tokio::time::Instant::now();
        gw.call("search", || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));

        let retry = RetryConfig {
            max_rate_limit_wait_ms: 500,
            ..fast_retry(1)
        };
        let gw = gateway(5.0, 0.0, retry);
        let err = gw.call("search", || async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RateLimitExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn caps_calls_in_flight() {
        let gw = gateway(10.0, 10.0, fast_retry(0)).with_max_concurrent(1);
        let start = tokio::time::Instant::now();
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), ProviderError>(())
        };
        let (a, b) = tokio::join!(gw.call("llm.complete", slow), gw.call("llm.complete", slow));
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn model_calls_wait_for_the_token_budget() {
        let budget = RateLimitConfig {
            tokens_per_minute: Some(600.0),
            ..RateLimitConfig::default()
        };
        // 600 tokens per minute refills 10 per second.
        let budget = TokenBucket::token_budget(&budget, Arc::new(TokioClock))
            .unwrap()
            .unwrap()
            .with_initial_tokens(0.0);
        let retry = RetryConfig {
            max_rate_limit_wait_ms: 30_000,
            ..fast_retry(0)
        };
        let gw = gateway(10.0, 10.0, retry).with_token_budget(Arc::new(budget));

        let start = tokio::time::Instant::now();
        gw.call_weighted("llm.complete", 50, || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));

        // Plain calls are not charged against the budget.
        let start = tokio::time::Instant::now();
        gw.call("search", || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_is_capped_at_budget_capacity() {
        let budget = RateLimitConfig {
            tokens_per_minute: Some(120.0),
            ..RateLimitConfig::default()
        };
        let budget = TokenBucket::token_budget(&budget, Arc::new(TokioClock)).unwrap().unwrap();
        let gw = gateway(10.0, 10.0, fast_retry(0)).with_token_budget(Arc::new(budget));
        gw.call_weighted("llm.complete", 10_000, || async { Ok(()) }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn honours_provider_retry_after() {
        let gw = gateway(10.0, 10.0, fast_retry(1));
        let calls = &AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        gw.call("llm.complete", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::RateLimited {
                    retry_after: Some(Duration::from_millis(750)),
                })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(750));
    }
}
