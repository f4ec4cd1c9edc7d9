//! Session store trait.

use crate::error::Result;
use crate::state::{Session, SessionId, TenantId, UserId};
use chrono::Duration;

/// TTL-capable session store.
///
/// This trait abstracts over session storage (Redis in production).
///
/// # Failure contract
///
/// Absence is `Ok(None)`; transport failure is `Err(StoreUnavailable)`.
/// Callers must treat transport failure as "state unknown," never as
/// "absent" — the distinction is what lets the authentication path
/// fail closed instead of trusting a degraded store.
pub trait SessionStore: Send + Sync {
    /// Write the session record, its per-user index entry, and (when a
    /// refresh token is present) the refresh-token pointer.
    ///
    /// The three writes are best-effort independent operations: only a
    /// failure to write the session payload itself is an error.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the payload write fails.
    fn put(&self, session: &Session) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn get(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> impl std::future::Future<Output = Result<Option<Session>>> + Send;

    /// All live sessions for a (tenant, user) pair.
    ///
    /// Resolves the index set, then fans out individual fetches. Index
    /// entries that fail to resolve are discarded: the store is allowed to
    /// be eventually consistent between index and payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the index itself cannot be read.
    fn list_by_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Session>>> + Send;

    /// Cardinality of the per-user session index.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn count_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// The session with the smallest `created_at` for the pair, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn oldest(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<Option<Session>>> + Send;

    /// Remove the session payload, its index entry, and its refresh-token
    /// pointer. Deleting an absent session is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn delete(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Mark a token unusable for `ttl`. Entries expire naturally and are
    /// never explicitly deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn blacklist_token(
        &self,
        token: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `true` if the token has been blacklisted and has not yet expired.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn is_token_blacklisted(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Resolve a session by its refresh token.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure.
    fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<Session>>> + Send;
}
