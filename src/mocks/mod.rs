//! In-memory mock providers for testing.
//!
//! Every provider trait has a mock that runs at memory speed, plus failure
//! injection where degraded-store behavior needs exercising. Enabled by the
//! `test-utils` feature (on by default).

mod audit;
mod rate_limiter;
mod session;
mod token;

pub use audit::MockAuditSink;
pub use rate_limiter::MockRateLimiter;
pub use session::MockSessionStore;
pub use token::MockTokenIssuer;
