//! Production store implementations.
//!
//! Redis-backed session storage and rate limiting. Both share the
//! `ConnectionManager` pooling pattern and route hard-path calls through
//! the resilience guard in [`crate::resilience`]; best-effort writes carry
//! a plain timeout instead, so nothing blocks unboundedly.

mod rate_limiter_redis;
mod session_redis;

pub use rate_limiter_redis::RedisRateLimiter;
pub use session_redis::RedisSessionStore;
