//! Session subsystem configuration.
//!
//! Configuration values are provided by the application, not hardcoded.
//! All structs follow the builder-with-defaults pattern.

use chrono::Duration;

/// Rate-limit policy for security-sensitive operations.
///
/// Counters are fixed-window: created on first increment, expired at window
/// end. Thresholds are per-operation fixed policy.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window length for all counters.
    ///
    /// Default: 60 seconds
    pub window: std::time::Duration,

    /// Max session-creation attempts per client IP per window.
    ///
    /// Default: 5
    pub max_session_creations: u32,

    /// Max counted requests per session per window.
    ///
    /// Default: 1000
    pub max_session_requests: u32,
}

impl RateLimitConfig {
    /// Set the session-creation cap.
    #[must_use]
    pub const fn with_max_session_creations(mut self, max: u32) -> Self {
        self.max_session_creations = max;
        self
    }

    /// Set the per-session request cap.
    #[must_use]
    pub const fn with_max_session_requests(mut self, max: u32) -> Self {
        self.max_session_requests = max;
        self
    }

    /// Set the counter window.
    #[must_use]
    pub const fn with_window(mut self, window: std::time::Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: std::time::Duration::from_secs(60),
            max_session_creations: 5,
            max_session_requests: 1000,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Access-token (and session record) time-to-live.
    ///
    /// Default: 1 hour
    pub access_ttl: Duration,

    /// Refresh-token time-to-live.
    ///
    /// Default: 24 hours
    pub refresh_ttl: Duration,

    /// Concurrent sessions allowed per (tenant, user) pair. Creating a
    /// session at the cap evicts the oldest.
    ///
    /// Default: 5
    pub max_concurrent_sessions: u32,

    /// Whether a fingerprint mismatch fails refresh. When `false`,
    /// fingerprint verification always passes.
    ///
    /// Default: true
    pub enforce_fingerprint: bool,

    /// Rate-limit policy.
    pub rate_limits: RateLimitConfig,
}

impl SessionConfig {
    /// Set access-token TTL.
    #[must_use]
    pub const fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Set refresh-token TTL.
    #[must_use]
    pub const fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Set the concurrent-session cap.
    #[must_use]
    pub const fn with_max_concurrent_sessions(mut self, max: u32) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    /// Enable or disable fingerprint enforcement.
    #[must_use]
    pub const fn with_fingerprint_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_fingerprint = enforce;
        self
    }

    /// Set the rate-limit policy.
    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::hours(24),
            max_concurrent_sessions: 5,
            enforce_fingerprint: true,
            rate_limits: RateLimitConfig::default(),
        }
    }
}
