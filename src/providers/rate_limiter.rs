//! Rate limiter trait.

use crate::error::Result;

/// Security-sensitive operation classes with independent counters and
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitOperation {
    /// Session creation, counted per client IP.
    SessionCreate,
    /// Per-session request volume, counted per session id.
    SessionRequest,
}

impl RateLimitOperation {
    /// Counter key segment for this operation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreate => "session_create",
            Self::SessionRequest => "session_request",
        }
    }
}

/// Fixed-window rate limiter backed by the shared counter store.
///
/// # Fail-open
///
/// Implementations must treat a failed increment as "not limited" rather
/// than denying traffic on counter-store trouble. This is a deliberate
/// availability-over-strictness tradeoff: the counters protect against
/// abuse, they are not an authentication control.
pub trait RateLimiter: Send + Sync {
    /// Atomically increment the window counter for `(operation, identifier)`
    /// and report whether the post-increment count exceeds the operation's
    /// threshold. The first increment of a window sets the window expiry.
    ///
    /// # Errors
    ///
    /// Implementations should swallow transport failures (fail-open) and
    /// reserve errors for misuse.
    fn is_rate_limited(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Current count in the live window, for observability and tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn current_count(
        &self,
        identifier: &str,
        operation: RateLimitOperation,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}
