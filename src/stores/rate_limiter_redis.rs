//! Redis-based fixed-window rate limiter.
//!
//! # Algorithm
//!
//! One counter per `(operation, identifier)`, created on first increment
//! with a window-length expiry, then incremented until the window expires.
//! INCR and the conditional EXPIRE run in a single Lua script so two
//! concurrent first-hits cannot leave the counter unexpired.
//!
//! # Fail-open
//!
//! A failed increment is treated as "not limited": denying legitimate
//! traffic because the counter store is unhealthy would turn a cache outage
//! into an authentication outage. The rate limiter bounds abuse; it is not
//! an authentication control.

use crate::config::RateLimitConfig;
use crate::error::{Result, SessionError};
use crate::providers::{RateLimitOperation, RateLimiter};
use crate::resilience::StoreGuard;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Fixed-window counter script: sets the window expiry only on the first
/// increment, so the window end never slides.
const INCR_SCRIPT: &str = r"
    local count = redis.call('INCR', KEYS[1])
    if count == 1 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
    end
    return count
";

/// Redis-backed fixed-window rate limiter.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn_manager: ConnectionManager,
    config: RateLimitConfig,
    guard: StoreGuard,
}

impl RedisRateLimiter {
    /// Create a new rate limiter with default resilience policies.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the connection to Redis fails.
    pub async fn new(redis_url: &str, config: RateLimitConfig) -> Result<Self> {
        Self::with_guard(redis_url, config, StoreGuard::default()).await
    }

    /// Create a rate limiter with explicit resilience policies.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the connection to Redis fails.
    pub async fn with_guard(
        redis_url: &str,
        config: RateLimitConfig,
        guard: StoreGuard,
    ) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            SessionError::StoreUnavailable(format!("failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            SessionError::StoreUnavailable(format!(
                "failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self {
            conn_manager,
            config,
            guard,
        })
    }

    fn counter_key(identifier: &str, operation: RateLimitOperation) -> String {
        format!("ratelimit:{}:{identifier}", operation.as_str())
    }

    const fn threshold(&self, operation: RateLimitOperation) -> u32 {
        match operation {
            RateLimitOperation::SessionCreate => self.config.max_session_creations,
            RateLimitOperation::SessionRequest => self.config.max_session_requests,
        }
    }
}

impl RateLimiter for RedisRateLimiter {
    async fn is_rate_limited(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> Result<bool> {
        let key = Self::counter_key(identifier, operation);
        let window_seconds = self.config.window.as_secs();

        // The guard bounds each increment with a timeout and a breaker so a
        // hung Redis cannot stall the session-creation path.
        let incremented: Result<u64> = self
            .guard
            .execute("rate_limit_incr", || {
                let mut conn = self.conn_manager.clone();
                let key = key.clone();
                async move {
                    redis::Script::new(INCR_SCRIPT)
                        .key(&key)
                        .arg(window_seconds)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| {
                            SessionError::StoreUnavailable(format!(
                                "failed to increment rate limit counter: {e}"
                            ))
                        })
                }
            })
            .await;

        let count = match incremented {
            Ok(count) => count,
            Err(e) => {
                // Fail open: counter trouble must not deny traffic.
                tracing::warn!(
                    identifier = %identifier,
                    operation = operation.as_str(),
                    error = %e,
                    "rate limit increment failed, failing open"
                );
                return Ok(false);
            }
        };

        let limited = count > u64::from(self.threshold(operation));
        if limited {
            tracing::warn!(
                rate_limit_exceeded = true,
                identifier = %identifier,
                operation = operation.as_str(),
                count = count,
                threshold = self.threshold(operation),
                "rate limit exceeded"
            );
        } else {
            tracing::debug!(
                identifier = %identifier,
                operation = operation.as_str(),
                count = count,
                "rate limit check passed"
            );
        }
        Ok(limited)
    }

    async fn current_count(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> Result<u64> {
        let key = Self::counter_key(identifier, operation);
        let count: Option<u64> = self
            .guard
            .execute("rate_limit_read", || {
                let mut conn = self.conn_manager.clone();
                let key = key.clone();
                async move {
                    conn.get(&key).await.map_err(|e| {
                        SessionError::StoreUnavailable(format!(
                            "failed to read rate limit counter: {e}"
                        ))
                    })
                }
            })
            .await?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running Redis instance:
    // docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_limits_after_threshold() {
        let config = RateLimitConfig::default().with_max_session_creations(5);
        let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379", config)
            .await
            .unwrap();
        let id = format!("198.51.100.{}", rand::random::<u8>());

        for i in 1..=5 {
            let limited = limiter
                .is_rate_limited(&id, RateLimitOperation::SessionCreate)
                .await
                .unwrap();
            assert!(!limited, "attempt {i} should pass");
        }

        let limited = limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap();
        assert!(limited, "sixth attempt should be limited");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_window_expires() {
        let config = RateLimitConfig::default()
            .with_max_session_creations(1)
            .with_window(std::time::Duration::from_secs(1));
        let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379", config)
            .await
            .unwrap();
        let id = format!("window-{}", uuid::Uuid::new_v4());

        assert!(!limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap());
        assert!(limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap());

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        assert!(!limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_guarded_increment_times_out_and_fails_open() {
        use crate::resilience::{BreakerConfig, RetryPolicy};

        // A timeout the increment cannot possibly beat: the guard reports
        // StoreUnavailable and the limiter fails open instead of hanging
        // or denying.
        let guard = StoreGuard::new(
            RetryPolicy::default()
                .with_max_attempts(1)
                .with_initial_backoff(std::time::Duration::from_millis(1)),
            BreakerConfig::default(),
            std::time::Duration::from_nanos(1),
        );
        let limiter = RedisRateLimiter::with_guard(
            "redis://127.0.0.1:6379",
            RateLimitConfig::default().with_max_session_creations(0),
            guard,
        )
        .await
        .unwrap();

        let limited = limiter
            .is_rate_limited("timeout-victim", RateLimitOperation::SessionCreate)
            .await
            .unwrap();
        assert!(!limited, "guard timeout should fail open");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_operations_have_independent_counters() {
        let config = RateLimitConfig::default().with_max_session_creations(1);
        let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379", config)
            .await
            .unwrap();
        let id = format!("ops-{}", uuid::Uuid::new_v4());

        assert!(!limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap());
        assert!(limiter
            .is_rate_limited(&id, RateLimitOperation::SessionCreate)
            .await
            .unwrap());

        // Same identifier, different operation: separate counter.
        assert!(!limiter
            .is_rate_limited(&id, RateLimitOperation::SessionRequest)
            .await
            .unwrap());
    }
}
