//! Multi-tenant session lifecycle and security.
//!
//! Server-side session management for multi-tenant services: creation with
//! per-IP rate limiting and a concurrent-session cap, validation with token
//! blacklisting and device-fingerprint continuity checks, single-use
//! refresh-token rotation, and an async audit trail. Storage, rate
//! limiting, token signing, and audit recording sit behind provider traits;
//! Redis adapters are included, and in-memory mocks ship behind the
//! `test-utils` feature (on by default).
//!
//! # Architecture
//!
//! - [`manager::SessionManager`] orchestrates the lifecycle state machine
//!   and owns ordering: rate gate, eviction, rotation, fail-closed lookups.
//! - [`security::SecurityEvaluator`] is the policy layer: every validity
//!   and suspicion decision lives here.
//! - [`middleware::RequestAuthenticator`] bridges bearer tokens to sessions
//!   for the request path and never errors; failures degrade to anonymous.
//! - [`stores`] adapts Redis behind the provider traits, with retry, a
//!   circuit breaker, and per-call timeouts from [`resilience`].
//!
//! # Example
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> Result<(), tenant_sessions::error::SessionError> {
//! use std::sync::Arc;
//! use tenant_sessions::config::SessionConfig;
//! use tenant_sessions::fingerprint::RequestMeta;
//! use tenant_sessions::manager::SessionManager;
//! use tenant_sessions::mocks::{
//!     MockAuditSink, MockRateLimiter, MockSessionStore, MockTokenIssuer,
//! };
//! use tenant_sessions::state::{TenantId, UserId};
//!
//! let manager = SessionManager::new(
//!     Arc::new(MockSessionStore::new()),
//!     Arc::new(MockRateLimiter::default()),
//!     Arc::new(MockTokenIssuer::new()),
//!     Arc::new(MockAuditSink::new()),
//!     SessionConfig::default(),
//! );
//!
//! let meta = RequestMeta::new().with_header("User-Agent", "Mozilla/5.0");
//! let session = manager
//!     .create_session(TenantId::new(), UserId::new(), "member", "access-token", &meta)
//!     .await?;
//! assert!(session.refresh_token.is_some());
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod middleware;
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;
pub mod providers;
pub mod resilience;
pub mod security;
pub mod state;
pub mod stores;

pub use config::{RateLimitConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use middleware::{AuthOutcome, RequestAuthenticator, RequestContext, RequestScope};
pub use security::SecurityEvaluator;
pub use state::{Session, SessionId, TenantId, UserId};
