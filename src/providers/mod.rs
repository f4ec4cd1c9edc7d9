//! Provider traits.
//!
//! These traits abstract over the session subsystem's external
//! collaborators: the TTL key-value store, the rate-limit counters, the
//! token-signing service, and the audit side channel. Production
//! implementations live in [`crate::stores`] and [`crate::audit`];
//! in-memory implementations for tests live in [`crate::mocks`].

mod audit;
mod rate_limiter;
mod session;
mod token;

pub use audit::AuditSink;
pub use rate_limiter::{RateLimitOperation, RateLimiter};
pub use session::SessionStore;
pub use token::{TokenClaims, TokenIssuer};
