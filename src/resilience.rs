//! Resilience wrapper for store calls.
//!
//! Every read/write against the backing store is composed through an
//! explicit, imperative guard: a per-call timeout, a bounded retry policy,
//! and a circuit breaker. While the breaker is open, calls short-circuit to
//! [`SessionError::StoreUnavailable`] without touching the store — the
//! authentication path must never hang on a degraded store.
//!
//! # Breaker states
//!
//! - **Closed**: normal operation, failures are counted.
//! - **Open**: failure threshold reached; calls fail immediately until the
//!   cool-down elapses.
//! - **HalfOpen**: cool-down elapsed; probe calls are allowed and the
//!   breaker closes again after enough successes.

use crate::error::{Result, SessionError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Bounded retry with backoff for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled per subsequent retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Set the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial backoff.
    #[must_use]
    pub const fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cool-down before an open circuit allows a half-open probe.
    pub cool_down: Duration,
    /// Successes in half-open state before the circuit closes.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through normally.
    Closed,
    /// Requests fail immediately.
    Open,
    /// Probing whether the store recovered.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker over the session store.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<BreakerConfig>,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Current state.
    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Whether a call may proceed. Transitions Open → HalfOpen when the
    /// cool-down has elapsed.
    pub(crate) async fn can_attempt(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => match inner.last_failure_time {
                Some(last) if last.elapsed() >= self.config.cool_down => {
                    tracing::info!("store circuit breaker transitioning OPEN -> HALF_OPEN");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                }
                _ => false,
            },
        }
    }

    pub(crate) async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed | BreakerState::Open => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        successes = inner.success_count,
                        "store circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure_time = None;
                }
            }
        }
    }

    pub(crate) async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "store circuit breaker transitioning CLOSED -> OPEN"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("store circuit breaker transitioning HALF_OPEN -> OPEN");
                inner.state = BreakerState::Open;
                inner.failure_count = 1;
                inner.success_count = 0;
            }
            BreakerState::Open => {
                inner.failure_count += 1;
            }
        }
    }
}

/// Composition of timeout, retry, and circuit breaker around store calls.
#[derive(Debug, Clone)]
pub struct StoreGuard {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    call_timeout: Duration,
}

impl Default for StoreGuard {
    fn default() -> Self {
        Self::new(
            RetryPolicy::default(),
            BreakerConfig::default(),
            Duration::from_secs(2),
        )
    }
}

impl StoreGuard {
    /// Build a guard from explicit policies.
    #[must_use]
    pub fn new(retry: RetryPolicy, breaker: BreakerConfig, call_timeout: Duration) -> Self {
        Self {
            retry,
            breaker: CircuitBreaker::new(breaker),
            call_timeout,
        }
    }

    /// The breaker, for observability.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run a store operation through timeout, retry, and the breaker.
    ///
    /// Only `StoreUnavailable` outcomes (including timeouts) count as
    /// breaker failures and are retried; logical errors such as
    /// serialization failures propagate immediately.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` when the circuit is open, when every
    /// attempt times out or fails transport, or the operation's own error
    /// otherwise.
    pub async fn execute<F, Fut, T>(&self, op_name: &'static str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.breaker.can_attempt().await {
            tracing::warn!(operation = op_name, "store circuit open, short-circuiting");
            return Err(SessionError::StoreUnavailable(format!(
                "circuit open for {op_name}"
            )));
        }

        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::StoreUnavailable(format!(
                    "{op_name} timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.on_success().await;
                    return Ok(value);
                }
                Err(SessionError::StoreUnavailable(detail)) => {
                    if attempt >= self.retry.max_attempts {
                        self.breaker.on_failure().await;
                        tracing::warn!(
                            operation = op_name,
                            attempts = attempt,
                            error = %detail,
                            "store operation exhausted retry budget"
                        );
                        return Err(SessionError::StoreUnavailable(detail));
                    }
                    tracing::debug!(
                        operation = op_name,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying store operation"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(other) => {
                    // Logical failure, not a transport one. The store answered.
                    self.breaker.on_success().await;
                    return Err(other);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_guard(failure_threshold: u32) -> StoreGuard {
        StoreGuard::new(
            RetryPolicy::default()
                .with_max_attempts(1)
                .with_initial_backoff(Duration::from_millis(1)),
            BreakerConfig {
                failure_threshold,
                cool_down: Duration::from_millis(50),
                success_threshold: 1,
            },
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let guard = fast_guard(3);
        let result = guard.execute("op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
        assert_eq!(guard.breaker().state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let guard = StoreGuard::new(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(1)),
            BreakerConfig::default(),
            Duration::from_millis(200),
        );
        let calls = AtomicU32::new(0);

        let result = guard
            .execute("op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SessionError::StoreUnavailable("transient".to_string()))
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let guard = fast_guard(2);
        for _ in 0..2 {
            let _ = guard
                .execute("op", || async {
                    Err::<(), _>(SessionError::StoreUnavailable("down".to_string()))
                })
                .await;
        }
        assert_eq!(guard.breaker().state().await, BreakerState::Open);

        // Short-circuits without invoking the operation.
        let calls = AtomicU32::new(0);
        let result = guard
            .execute("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_breaker_half_open_probe_closes() {
        let guard = fast_guard(1);
        let _ = guard
            .execute("op", || async {
                Err::<(), _>(SessionError::StoreUnavailable("down".to_string()))
            })
            .await;
        assert_eq!(guard.breaker().state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = guard.execute("op", || async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert_eq!(guard.breaker().state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_logical_errors_do_not_trip_breaker() {
        let guard = fast_guard(1);
        let result = guard
            .execute("op", || async {
                Err::<(), _>(SessionError::Serialization("bad payload".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SessionError::Serialization(_))));
        assert_eq!(guard.breaker().state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_unavailable() {
        let guard = StoreGuard::new(
            RetryPolicy::default()
                .with_max_attempts(1)
                .with_initial_backoff(Duration::from_millis(1)),
            BreakerConfig::default(),
            Duration::from_millis(20),
        );
        let result = guard
            .execute("op", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));
    }
}
