//! Concurrency gate and retry policy in front of the model capability.
//!
//! [`RateLimitedProvider`] is the only resource shared across concurrently
//! running rollouts. It caps in-flight model calls with a semaphore that is
//! independent of the worker pool's own cap, applies an optional per-call
//! timeout, and retries transient failures with bounded exponential backoff.
//! Callers block only while waiting for a permit, never across a rollout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::litellm::{GenerationRequest, GenerationResponse, LlmProvider};
use crate::error::LlmError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Handy in tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Counters describing gate activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Calls issued to the inner provider, retries included.
    pub calls: u64,
    /// Retries after a transient failure.
    pub retries: u64,
    /// Calls that exceeded the per-call timeout.
    pub timeouts: u64,
    /// Requests that ultimately failed.
    pub failures: u64,
}

#[derive(Default)]
struct SharedGateStats {
    calls: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

/// Provider wrapper that enforces the model-call concurrency cap.
pub struct RateLimitedProvider {
    inner: Arc<dyn LlmProvider>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
    stats: SharedGateStats,
}

impl RateLimitedProvider {
    /// Wrap `inner` with a cap of `max_concurrent` simultaneous calls.
    pub fn new(inner: Arc<dyn LlmProvider>, max_concurrent: usize, retry: RetryPolicy) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            retry,
            call_timeout: None,
            stats: SharedGateStats::default(),
        }
    }

    /// Sets a wall-clock deadline for each individual call.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Maximum number of concurrent calls.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Returns a snapshot of the gate counters.
    pub fn stats(&self) -> GateStats {
        GateStats {
            calls: self.stats.calls.load(Ordering::SeqCst),
            retries: self.stats.retries.load(Ordering::SeqCst),
            timeouts: self.stats.timeouts.load(Ordering::SeqCst),
            failures: self.stats.failures.load(Ordering::SeqCst),
        }
    }

    async fn call_once(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Cancelled)?;
        self.stats.calls.fetch_add(1, Ordering::SeqCst);

        match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.inner.generate(request)).await {
                Ok(result) => result,
                Err(_) => {
                    self.stats.timeouts.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Timeout {
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => self.inner.generate(request).await,
        }
    }
}

#[async_trait]
impl LlmProvider for RateLimitedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            // The permit is released before any backoff sleep.
            match self.call_once(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM failure, retrying"
                    );
                    self.stats.retries.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    self.stats.failures.fetch_add(1, Ordering::SeqCst);
                    return Err(LlmError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    debug!(error = %e, "Fatal LLM failure, not retrying");
                    self.stats.failures.fetch_add(1, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Fails with the queued errors first, then succeeds.
    struct FlakyProvider {
        failures: Mutex<Vec<LlmError>>,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: Vec<LlmError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.failures.lock().expect("lock").pop();
            match next {
                Some(err) => Err(err),
                None => Ok(GenerationResponse::from_text("stub", "ok")),
            }
        }
    }

    /// Tracks the peak number of concurrent calls.
    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for SlowProvider {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GenerationResponse::from_text("stub", "ok"))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("", vec![Message::user("hi")])
    }

    #[test]
    fn test_retry_delay_is_bounded_exponential() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(FlakyProvider::new(vec![
            LlmError::RateLimited("429".into()),
            LlmError::RequestFailed("reset".into()),
        ]));
        let gate = RateLimitedProvider::new(inner.clone(), 2, fast_retry(3));

        let response = gate.generate(request()).await.expect("third attempt succeeds");
        assert_eq!(response.first_content(), Some("ok"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(gate.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_becomes_fatal() {
        let inner = Arc::new(FlakyProvider::new(vec![
            LlmError::RequestFailed("a".into()),
            LlmError::RequestFailed("b".into()),
        ]));
        let gate = RateLimitedProvider::new(inner, 2, fast_retry(2));

        let err = gate.generate(request()).await.expect_err("exhausted");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
        assert!(!err.is_transient());
        assert_eq!(gate.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let inner = Arc::new(FlakyProvider::new(vec![LlmError::MissingApiKey]));
        let gate = RateLimitedProvider::new(inner.clone(), 2, fast_retry(5));

        let err = gate.generate(request()).await.expect_err("fatal");
        assert!(matches!(err, LlmError::MissingApiKey));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let inner = Arc::new(SlowProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gate = RateLimitedProvider::new(inner, 1, fast_retry(2))
            .with_call_timeout(Some(Duration::from_millis(1)));

        let err = gate.generate(request()).await.expect_err("always too slow");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(gate.stats().timeouts, 2);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_enforced() {
        let inner = Arc::new(SlowProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gate = Arc::new(RateLimitedProvider::new(inner.clone(), 3, fast_retry(1)));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.generate(request()).await })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("call succeeds");
        }

        assert!(inner.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available_permits(), 3);
    }
}
