//! Token issuer trait.
//!
//! The token-signing primitive is an external collaborator: this subsystem
//! consumes signed, expiring bearer tokens but does not redesign them.

use crate::error::Result;
use crate::state::{SessionId, TenantId, UserId};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Claims carried by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject identity.
    pub user_id: UserId,
    /// Tenant the subject belongs to.
    pub tenant_id: TenantId,
    /// Role label.
    pub role: String,
    /// Opaque session identifier, when the token is session-bound.
    pub session_id: Option<SessionId>,
}

/// Mints and verifies signed, expiring bearer tokens.
///
/// # Claim extraction
///
/// Verification failures are distinct: a missing subject, tenant, or role
/// each produce their own `InvalidToken { reason }`, not a single
/// catch-all. Callers that proceed unauthenticated on failure still get a
/// useful reason to log.
pub trait TokenIssuer: Send + Sync {
    /// Mint a signed token for the given claims, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns error if the signing backend is unavailable.
    fn issue(
        &self,
        claims: &TokenClaims,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Verify a token's signature and expiry, then extract its claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` with a step-specific reason if the signature
    /// is bad, the token is expired, or any claim is missing or malformed.
    fn verify(&self, token: &str) -> impl std::future::Future<Output = Result<TokenClaims>> + Send;
}
