//! In-memory fixed-window rate limiter.

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::providers::{RateLimitOperation, RateLimiter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
}

/// In-memory [`RateLimiter`] with the same fixed-window semantics as the
/// Redis implementation, including fail-open when marked unavailable.
#[derive(Debug, Clone)]
pub struct MockRateLimiter {
    windows: Arc<Mutex<HashMap<(RateLimitOperation, String), Window>>>,
    config: RateLimitConfig,
    unavailable: Arc<AtomicBool>,
}

impl MockRateLimiter {
    /// Create a limiter with the given policy.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            config,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate counter-store trouble: checks fail open without counting.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    const fn threshold(&self, operation: RateLimitOperation) -> u32 {
        match operation {
            RateLimitOperation::SessionCreate => self.config.max_session_creations,
            RateLimitOperation::SessionRequest => self.config.max_session_requests,
        }
    }
}

impl Default for MockRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter for MockRateLimiter {
    async fn is_rate_limited(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let window = windows
            .entry((operation, identifier.to_string()))
            .or_insert(Window {
                count: 0,
                started: now,
            });
        if now.duration_since(window.started) >= self.config.window {
            window.count = 0;
            window.started = now;
        }
        window.count += 1;
        Ok(window.count > u64::from(self.threshold(operation)))
    }

    async fn current_count(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> Result<u64> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(windows
            .get(&(operation, identifier.to_string()))
            .filter(|w| w.started.elapsed() < self.config.window)
            .map_or(0, |w| w.count))
    }
}
